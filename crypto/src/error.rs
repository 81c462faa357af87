use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid length: expected {expected} bytes, found {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("output length must be between 1 and {max} bytes, got {requested}")]
    OutputLength { requested: usize, max: usize },
}
