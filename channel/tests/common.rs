#![allow(dead_code)]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use channel_crypto::hashes::hash_lock_of;
use channel_engine::{ChannelConfig, ChannelStateMachine, HtlcParams, ParticipantId, PARTICIPANTS};
use transition_proof::{HashOracle, Proof, ProofError, ProofOracle, Root, Witness};

pub const PREIMAGE: &[u8] = b"channel preimage";

pub fn parties() -> [ParticipantId; PARTICIPANTS] {
    [ParticipantId::from_label("alice"), ParticipantId::from_label("bob")]
}

pub fn open(a: u64, b: u64) -> ChannelStateMachine {
    ChannelStateMachine::open(ChannelConfig::default(), parties(), [a, b]).expect("open channel")
}

pub fn open_with(oracle: Arc<dyn ProofOracle>, a: u64, b: u64) -> ChannelStateMachine {
    ChannelStateMachine::open_with_oracle(ChannelConfig::default(), parties(), [a, b], oracle)
        .expect("open channel")
}

pub fn htlc_params(amount: u64, time_lock: u64) -> HtlcParams {
    HtlcParams {
        amount,
        hash_lock: hash_lock_of(PREIMAGE).to_vec(),
        time_lock,
        sender: 0,
        recipient: 1,
    }
}

/// Produces proofs that never verify.
pub struct RejectingOracle;

impl ProofOracle for RejectingOracle {
    fn generate_proof(&self, old: &Root, new: &Root, witness: &Witness) -> Result<Proof, ProofError> {
        HashOracle::default().generate_proof(old, new, witness)
    }

    fn verify_proof(&self, _proof: &Proof, _old: &Root, _new: &Root) -> bool {
        false
    }
}

/// Refuses to prove anything.
pub struct FailingOracle;

impl ProofOracle for FailingOracle {
    fn generate_proof(&self, _old: &Root, _new: &Root, _witness: &Witness) -> Result<Proof, ProofError> {
        Err(ProofError::Rejected("prover offline".into()))
    }

    fn verify_proof(&self, _proof: &Proof, _old: &Root, _new: &Root) -> bool {
        false
    }
}

/// Honest oracle that sleeps before proving.
pub struct SlowOracle {
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl SlowOracle {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }
}

impl ProofOracle for SlowOracle {
    fn generate_proof(&self, old: &Root, new: &Root, witness: &Witness) -> Result<Proof, ProofError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        HashOracle::default().generate_proof(old, new, witness)
    }

    fn verify_proof(&self, proof: &Proof, old: &Root, new: &Root) -> bool {
        HashOracle::default().verify_proof(proof, old, new)
    }
}
