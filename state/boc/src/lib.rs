//! Flattened "bag of cells" snapshots of a cell store, their canonical root hash, and the
//! byte formats used to move them between peers and onto disk.

pub mod commitment;
pub mod error;
pub mod snapshot;
pub mod wire;

pub use commitment::compute_hash;
pub use error::SnapshotError;
pub use snapshot::{state_root, SnapshotCell, StateRoot, StateSnapshot};
pub use wire::{
    decode_framed, deserialize, encode_framed, read_snapshot, serialize, write_snapshot,
    WireEncoding,
};
