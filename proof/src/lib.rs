//! The boundary between the channel engine and whatever proves its state transitions.
//!
//! The engine only ever calls [`ProofOracle::generate_proof`] and [`ProofOracle::verify_proof`].
//! [`HashOracle`] is the in-tree implementation used by default and in tests.

pub mod error;
pub mod hash_oracle;
pub mod oracle;

pub use error::ProofError;
pub use hash_oracle::{HashOracle, SUPPORTED_SECURITY_BITS};
pub use oracle::{Proof, ProofOracle, Root, Witness};
