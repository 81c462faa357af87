use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use state_boc::WireEncoding;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{ChannelError, ChannelResult};
use crate::htlc::{HtlcId, HtlcParams};
use crate::machine::{prove, ChannelStateMachine, ChannelTransaction, ChannelUpdate, Intent, Transfer};
use crate::state::{ChannelState, PARTICIPANTS};

/// Cloneable async handle to one channel.
///
/// Writers queue on a single async mutex that stays held while the proof is generated on the
/// blocking pool, so transitions on a channel never interleave. Readers see the last committed
/// [`ChannelState`] without waiting for the writer.
#[derive(Clone)]
pub struct ChannelService {
    inner: Arc<Inner>,
}

struct Inner {
    machine: Mutex<ChannelStateMachine>,
    published: RwLock<ChannelState>,
    proof_timeout: Duration,
}

impl ChannelService {
    pub fn new(machine: ChannelStateMachine) -> Self {
        let published = RwLock::new(machine.state());
        let proof_timeout = machine.config().proof_timeout();
        Self {
            inner: Arc::new(Inner {
                machine: Mutex::new(machine),
                published,
                proof_timeout,
            }),
        }
    }

    /// Last committed state.
    pub fn state(&self) -> ChannelState {
        self.inner.published.read().clone()
    }

    pub fn balances(&self) -> [u64; PARTICIPANTS] {
        self.inner.published.read().balances
    }

    pub fn nonce(&self) -> u64 {
        self.inner.published.read().nonce
    }

    pub async fn transfer(&self, from: usize, to: usize, amount: u64) -> ChannelResult<ChannelUpdate> {
        self.run(Intent::Transfer(Transfer { from, to, amount }))
            .await
            .map(|(update, _)| update)
    }

    pub async fn process_transaction(&self, transaction: ChannelTransaction) -> ChannelResult<ChannelUpdate> {
        self.run(Intent::Transaction(transaction))
            .await
            .map(|(update, _)| update)
    }

    pub async fn open_htlc(&self, params: HtlcParams) -> ChannelResult<(HtlcId, ChannelUpdate)> {
        let (update, opened) = self.run(Intent::OpenHtlc(params)).await?;
        let id = opened.ok_or(ChannelError::InvalidOperation("htlc was not recorded"))?;
        Ok((id, update))
    }

    pub async fn claim_htlc(&self, id: HtlcId, preimage: Vec<u8>, now: u64) -> ChannelResult<ChannelUpdate> {
        self.run(Intent::ClaimHtlc { id, preimage, now })
            .await
            .map(|(update, _)| update)
    }

    pub async fn refund_htlc(&self, id: HtlcId, now: u64) -> ChannelResult<ChannelUpdate> {
        self.run(Intent::RefundHtlc { id, now })
            .await
            .map(|(update, _)| update)
    }

    pub async fn settle(&self) -> ChannelResult<ChannelUpdate> {
        self.run(Intent::Settle).await.map(|(update, _)| update)
    }

    pub async fn receive_update(&self, update: ChannelUpdate, snapshot: Vec<u8>) -> ChannelResult<()> {
        let mut machine = self.inner.machine.lock().await;
        machine.receive_update(&update, &snapshot)?;
        *self.inner.published.write() = machine.state();
        Ok(())
    }

    pub async fn export_snapshot(&self, encoding: WireEncoding) -> ChannelResult<Vec<u8>> {
        self.inner.machine.lock().await.export_snapshot(encoding)
    }

    pub async fn updates(&self) -> Vec<ChannelUpdate> {
        self.inner.machine.lock().await.updates().to_vec()
    }

    async fn run(&self, intent: Intent) -> ChannelResult<(ChannelUpdate, Option<HtlcId>)> {
        let mut machine = self.inner.machine.lock().await;
        let staged = match machine.stage(&intent) {
            Ok(staged) => staged,
            Err(err) => {
                warn!(intent = intent.name(), nonce = machine.nonce(), %err, "transition rolled back");
                return Err(err);
            }
        };
        let oracle = machine.oracle();
        let timeout = self.inner.proof_timeout;

        let task = tokio::task::spawn_blocking(move || {
            let proof = prove(oracle.as_ref(), &staged);
            (staged, proof)
        });
        let (staged, proof) = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(done)) => done,
            Ok(Err(join)) => {
                warn!(intent = intent.name(), %join, "proof task failed, transition discarded");
                return Err(ChannelError::ProofTask(join.to_string()));
            }
            Err(_) => {
                let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(intent = intent.name(), timeout_ms = millis, "proof timed out, transition discarded");
                return Err(ChannelError::ProofTimeout(millis));
            }
        };
        let proof = match proof {
            Ok(proof) => proof,
            Err(err) => {
                warn!(intent = intent.name(), %err, "transition rolled back");
                return Err(err);
            }
        };

        let opened = staged.opened_htlc();
        let update = machine.commit(staged, proof)?;
        *self.inner.published.write() = machine.state();
        Ok((update, opened))
    }
}
