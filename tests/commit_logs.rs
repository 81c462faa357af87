use std::io;
use std::sync::{Arc, Mutex};

use channel_crypto::hashes::hash_lock_of;
use channel_engine::{
    prove, ChannelConfig, ChannelError, ChannelService, ChannelStateMachine, HtlcParams, Intent,
    ParticipantId,
};

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn subscriber(captured: &Captured) -> impl tracing::Subscriber + Send + Sync {
    let writer = captured.clone();
    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(move || writer.clone())
        .finish()
}

fn open(a: u64, b: u64) -> ChannelStateMachine {
    let parties = [ParticipantId::from_label("alice"), ParticipantId::from_label("bob")];
    ChannelStateMachine::open(ChannelConfig::default(), parties, [a, b]).unwrap()
}

#[test]
fn htlc_resolution_is_announced_only_after_commit() {
    let mut channel = open(100, 100);
    let (id, _) = channel
        .open_htlc(HtlcParams {
            amount: 10,
            hash_lock: hash_lock_of(b"secret").to_vec(),
            time_lock: 50,
            sender: 0,
            recipient: 1,
        })
        .unwrap();

    let captured = Captured::default();
    tracing::subscriber::with_default(subscriber(&captured), || {
        let claim = Intent::ClaimHtlc {
            id,
            preimage: b"secret".to_vec(),
            now: 1,
        };
        let staged = channel.stage(&claim).unwrap();
        let proof = prove(channel.oracle().as_ref(), &staged).unwrap();
        assert!(!captured.text().contains("htlc resolved"));

        // A second staged claim is dropped without committing.
        let _abandoned = channel.stage(&claim).unwrap();
        assert!(!captured.text().contains("htlc resolved"));

        channel.commit(staged, proof).unwrap();
    });

    let logs = captured.text();
    assert_eq!(logs.matches("htlc resolved").count(), 1);
    let committed = logs.find("committed channel update").unwrap();
    assert!(logs.find("htlc resolved").unwrap() > committed);
    assert_eq!(channel.balances(), [90, 110]);
}

#[tokio::test]
async fn service_rejections_are_logged() {
    let service = ChannelService::new(open(10, 10));
    let captured = Captured::default();
    let _guard = tracing::subscriber::set_default(subscriber(&captured));

    assert!(matches!(
        service.transfer(0, 1, 50).await,
        Err(ChannelError::InsufficientBalance { .. })
    ));
    assert!(matches!(
        service.refund_htlc(7, 0).await,
        Err(ChannelError::HtlcNotFound(7))
    ));

    let logs = captured.text();
    assert_eq!(logs.matches("transition rolled back").count(), 2);
    assert!(logs.contains("transfer"));
    assert!(logs.contains("refund_htlc"));
    assert_eq!(service.balances(), [10, 10]);
    assert_eq!(service.nonce(), 0);
}
