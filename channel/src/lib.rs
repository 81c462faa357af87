//! Two-party payment channel whose state lives in a cell DAG.
//!
//! Balances, the nonce and the HTLC table are all stored as cells, so the state root commits to
//! them and every transition carries a proof binding the old root to the new one.

pub mod codec;
pub mod config;
pub mod error;
pub mod htlc;
pub mod machine;
pub mod service;
pub mod sink;
pub mod state;

pub use config::{ChannelConfig, ClaimPolicy, Network};
pub use error::{ChannelError, ChannelResult, HtlcError};
pub use htlc::{Htlc, HtlcId, HtlcParams, HtlcRegistry, HtlcState};
pub use machine::{
    prove, ChannelStateMachine, ChannelTransaction, ChannelUpdate, Intent, SharedHandler,
    StagedTransition, Transfer,
};
pub use service::ChannelService;
pub use sink::{FileSink, MemorySink, SettlementSink};
pub use state::{ChannelState, Ledger, ParticipantId, LEDGER_CELL, PARTICIPANTS};
