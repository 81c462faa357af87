use blake3::Hasher as Blake3Hasher;
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// 256-bit digest used for state roots and hash locks.
pub type Digest32 = [u8; 32];

/// Upper bound on domain-separated XOF output.
pub const MAX_XOF_LEN: usize = 64;

pub fn sha256(data: &[u8]) -> Digest32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn blake3_256(data: &[u8]) -> Digest32 {
    let mut hasher = Blake3Hasher::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    hasher.finalize_xof().fill(&mut out);
    out
}

/// BLAKE3 in XOF mode over a domain tag followed by length-prefixed parts.
///
/// Each part is prefixed with its length as a little-endian `u64` so that
/// `["ab", "c"]` and `["a", "bc"]` never collide.
pub fn blake3_xof(domain: &[u8], parts: &[&[u8]], len: usize) -> Result<Vec<u8>, CryptoError> {
    if len == 0 || len > MAX_XOF_LEN {
        return Err(CryptoError::OutputLength {
            requested: len,
            max: MAX_XOF_LEN,
        });
    }
    let mut hasher = Blake3Hasher::new();
    hasher.update(&(domain.len() as u64).to_le_bytes());
    hasher.update(domain);
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    let mut out = vec![0u8; len];
    hasher.finalize_xof().fill(&mut out);
    Ok(out)
}

/// Hash a preimage into the form stored in a hash lock.
pub fn hash_lock_of(preimage: &[u8]) -> Digest32 {
    sha256(preimage)
}

pub fn digest_from_slice(bytes: &[u8]) -> Result<Digest32, CryptoError> {
    bytes.try_into().map_err(|_| CryptoError::InvalidLength {
        expected: 32,
        actual: bytes.len(),
    })
}
