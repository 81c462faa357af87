use state_boc::SnapshotError;
use state_dag::CellError;
use thiserror::Error;
use transition_proof::ProofError;

use crate::machine::ChannelUpdate;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HtlcError {
    #[error("hash lock must be 32 bytes, got {0}")]
    InvalidHashLock(usize),
    #[error("htlc amount must be non-zero")]
    ZeroAmount,
    #[error("preimage does not match hash lock")]
    InvalidPreimage,
    #[error("htlc already resolved")]
    AlreadyResolved,
    #[error("time lock not expired: now {now}, time lock {time_lock}")]
    TimeLockNotExpired { now: u64, time_lock: u64 },
    #[error("htlc expired: now {now}, time lock {time_lock}")]
    Expired { now: u64, time_lock: u64 },
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),
    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: u64, available: u64 },
    #[error("balance overflow")]
    BalanceOverflow,
    #[error("nonce overflow")]
    NonceOverflow,
    #[error("unexpected nonce: expected {expected}, got {actual}")]
    InvalidNonce { expected: u64, actual: u64 },
    #[error("channel value not conserved: {before} before, {after} after")]
    ValueNotConserved { before: u128, after: u128 },
    #[error("state root mismatch: expected {expected}, got {actual}")]
    RootMismatch { expected: String, actual: String },
    #[error("proof verification failed")]
    Verification,
    #[error("proof generation timed out after {0} ms")]
    ProofTimeout(u64),
    #[error("proof task failed: {0}")]
    ProofTask(String),
    #[error("htlc {0} not found")]
    HtlcNotFound(u64),
    #[error("htlc error: {0}")]
    Htlc(#[from] HtlcError),
    #[error("cell store error: {0}")]
    Store(#[from] CellError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("proof error: {0}")]
    Proof(#[from] ProofError),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("settlement sink error: {0}")]
    Sink(String),
    /// The channel is settled but the sink did not take the final snapshot.
    #[error("channel settled at nonce {} but the final snapshot was not delivered: {source}", .update.nonce)]
    SettlementUndelivered {
        update: Box<ChannelUpdate>,
        source: Box<ChannelError>,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ChannelResult<T> = Result<T, ChannelError>;
