use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use channel_crypto::deterministic::preimage_from_label;
use channel_crypto::hashes::hash_lock_of;
use channel_engine::{ChannelService, HtlcParams, SettlementSink};
use serde::{Deserialize, Serialize};
use state_boc::WireEncoding;
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    Transfer {
        from: usize,
        to: usize,
        amount: u64,
    },
    /// `preimage` is a label; the actual preimage is derived from it.
    OpenHtlc {
        amount: u64,
        preimage: String,
        time_lock: u64,
        #[serde(default)]
        sender: usize,
        #[serde(default = "default_recipient")]
        recipient: usize,
    },
    Claim {
        htlc: u64,
        preimage: String,
        now: u64,
    },
    Refund {
        htlc: u64,
        now: u64,
    },
    Settle,
}

fn default_recipient() -> usize {
    1
}

pub fn load(path: &Path) -> Result<Vec<Step>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing script {}", path.display()))
}

/// Script used when none is given: a payment each way, one HTLC, then settlement.
pub fn demo() -> Vec<Step> {
    vec![
        Step::Transfer {
            from: 0,
            to: 1,
            amount: 30,
        },
        Step::Transfer {
            from: 1,
            to: 0,
            amount: 5,
        },
        Step::OpenHtlc {
            amount: 10,
            preimage: "demo-secret".into(),
            time_lock: 100,
            sender: 0,
            recipient: 1,
        },
        Step::Claim {
            htlc: 0,
            preimage: "demo-secret".into(),
            now: 50,
        },
        Step::Settle,
    ]
}

#[derive(Debug, Default, Serialize)]
pub struct Report {
    pub committed: usize,
    pub rejected: usize,
}

/// Runs every step. Rejected steps are logged and counted; they do not stop the run.
pub async fn run(
    service: &ChannelService,
    steps: &[Step],
    sink: Option<&mut dyn SettlementSink>,
    encoding: WireEncoding,
) -> Result<Report> {
    let mut report = Report::default();
    let mut sink = sink;
    for (index, step) in steps.iter().enumerate() {
        let result = match step {
            Step::Transfer { from, to, amount } => service.transfer(*from, *to, *amount).await,
            Step::OpenHtlc {
                amount,
                preimage,
                time_lock,
                sender,
                recipient,
            } => service
                .open_htlc(HtlcParams {
                    amount: *amount,
                    hash_lock: hash_lock_of(&preimage_from_label(preimage)).to_vec(),
                    time_lock: *time_lock,
                    sender: *sender,
                    recipient: *recipient,
                })
                .await
                .map(|(id, update)| {
                    info!(htlc = id, "opened htlc");
                    update
                }),
            Step::Claim {
                htlc,
                preimage,
                now,
            } => {
                service
                    .claim_htlc(*htlc, preimage_from_label(preimage).to_vec(), *now)
                    .await
            }
            Step::Refund { htlc, now } => service.refund_htlc(*htlc, *now).await,
            Step::Settle => service.settle().await,
        };
        match result {
            Ok(update) => {
                report.committed += 1;
                info!(
                    step = index,
                    nonce = update.nonce,
                    root = %hex::encode(update.new_root),
                    proof_len = update.proof.encoded_len(),
                    "step committed"
                );
                if matches!(step, Step::Settle) {
                    if let Some(sink) = sink.as_deref_mut() {
                        let framed = service
                            .export_snapshot(encoding)
                            .await
                            .context("exporting final snapshot")?;
                        sink.submit(&update.new_root, &framed)
                            .context("submitting settlement")?;
                    }
                }
            }
            Err(err) => {
                report.rejected += 1;
                warn!(step = index, %err, "step rejected");
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use channel_engine::{ChannelConfig, ChannelStateMachine, MemorySink, ParticipantId};

    fn service() -> ChannelService {
        let parties = [ParticipantId::from_label("alice"), ParticipantId::from_label("bob")];
        ChannelService::new(ChannelStateMachine::open(ChannelConfig::default(), parties, [100, 100]).unwrap())
    }

    #[tokio::test]
    async fn demo_script_settles() {
        let service = service();
        let mut sink = MemorySink::default();
        let report = run(&service, &demo(), Some(&mut sink), WireEncoding::Binary)
            .await
            .unwrap();
        assert_eq!(report.committed, 5);
        assert_eq!(report.rejected, 0);
        assert_eq!(service.balances(), [65, 135]);
        assert!(service.state().settled);
        assert_eq!(sink.submissions.len(), 1);
    }

    #[tokio::test]
    async fn rejected_steps_are_counted() {
        let service = service();
        let steps = vec![
            Step::Transfer {
                from: 1,
                to: 0,
                amount: 500,
            },
            Step::Refund { htlc: 3, now: 0 },
        ];
        let report = run(&service, &steps, None, WireEncoding::Json).await.unwrap();
        assert_eq!(report.committed, 0);
        assert_eq!(report.rejected, 2);
        assert_eq!(service.nonce(), 0);
    }

    #[test]
    fn script_json_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.json");
        fs::write(
            &path,
            r#"[{"step":"transfer","from":0,"to":1,"amount":3},
                {"step":"open_htlc","amount":2,"preimage":"x","time_lock":9},
                {"step":"settle"}]"#,
        )
        .unwrap();
        let steps = load(&path).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(
            steps[1],
            Step::OpenHtlc {
                amount: 2,
                preimage: "x".into(),
                time_lock: 9,
                sender: 0,
                recipient: 1,
            }
        );
    }
}
