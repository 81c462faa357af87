use thiserror::Error;

use crate::cell::CellId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CellError {
    #[error("cell {0} not found")]
    NotFound(CellId),
    #[error("reference {from} -> {to} not found")]
    ReferenceNotFound { from: CellId, to: CellId },
    #[error("cell index {0} is out of bounds")]
    IndexOutOfBounds(CellId),
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),
    #[error("reference {from} -> {to} would create a cycle")]
    CycleDetected { from: CellId, to: CellId },
    #[error("reference depth {depth} exceeds maximum {max}")]
    MaxDepthExceeded { depth: usize, max: usize },
    #[error("slice {start}..{end} is out of range for payload of {len} bytes")]
    InvalidSlice { start: u64, end: u64, len: usize },
    #[error("invalid state key: {0}")]
    InvalidKey(String),
    #[error("custom op {tag:#04x} failed: {reason}")]
    Custom { tag: u8, reason: String },
}
