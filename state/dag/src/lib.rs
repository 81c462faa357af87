//! Content-addressed cell DAG: an arena of cells joined by reference edges.
//!
//! The store keeps the reference graph acyclic and bounded in depth, keeps every referenced,
//! rooted, or key-bound id pointing at a live cell, and applies each [`OpCode`] atomically.

pub mod cell;
pub mod error;
pub mod key;
pub mod op;
pub mod store;

pub use cell::{Cell, CellId, CellKind, ContentKind, Slice};
pub use error::CellError;
pub use key::StateKey;
pub use op::{OpCode, OpOutcome};
pub use store::{CellStore, CustomOpHandler, DEFAULT_MAX_DEPTH, RejectCustom, StoreLimits};
