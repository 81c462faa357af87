use state_dag::CellError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot encoding failed: {0}")]
    Encode(String),
    #[error("snapshot decoding failed: {0}")]
    Decode(String),
    #[error("snapshot hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch { expected: String, computed: String },
    #[error("malformed snapshot: {0}")]
    Malformed(String),
    #[error("snapshot does not describe a valid store: {0}")]
    Store(#[from] CellError),
    #[error("bad snapshot frame magic")]
    BadMagic,
    #[error("unsupported snapshot format version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown wire encoding tag {0}")]
    UnknownEncoding(u8),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for SnapshotError {
    fn from(err: bincode::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
