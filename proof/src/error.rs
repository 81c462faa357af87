use channel_crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProofError {
    #[error("unsupported security level: {0} bits")]
    UnsupportedSecurity(u32),
    #[error("malformed proof: {0}")]
    Malformed(String),
    #[error("proof backend rejected the transition: {0}")]
    Rejected(String),
    #[error("hashing failed: {0}")]
    Crypto(#[from] CryptoError),
}
