pub mod deterministic;
pub mod error;
pub mod hashes;

pub use error::CryptoError;
pub use hashes::Digest32;
