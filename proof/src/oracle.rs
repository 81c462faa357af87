use std::sync::Arc;

use channel_crypto::hashes::{blake3_256, digest_from_slice};
use channel_crypto::Digest32;
use serde::{Deserialize, Serialize};

use crate::error::ProofError;

pub type Root = [u8; 32];

/// Opaque transition record handed to the prover. The engine decides what goes in it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Witness(Vec<u8>);

impl Witness {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn digest(&self) -> Digest32 {
        blake3_256(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub security_bits: u32,
    pub witness_digest: Digest32,
    pub tag: Vec<u8>,
}

impl Proof {
    /// `security_bits` (u32 LE), witness digest, tag.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 32 + self.tag.len());
        out.extend_from_slice(&self.security_bits.to_le_bytes());
        out.extend_from_slice(&self.witness_digest);
        out.extend_from_slice(&self.tag);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProofError> {
        if bytes.len() < 4 + 32 {
            return Err(ProofError::Malformed(format!(
                "proof is {} bytes, header alone needs 36",
                bytes.len()
            )));
        }
        let mut bits = [0u8; 4];
        bits.copy_from_slice(&bytes[..4]);
        Ok(Self {
            security_bits: u32::from_le_bytes(bits),
            witness_digest: digest_from_slice(&bytes[4..36])?,
            tag: bytes[36..].to_vec(),
        })
    }

    pub fn encoded_len(&self) -> usize {
        4 + 32 + self.tag.len()
    }
}

/// Generates and checks proofs that bind an old state root to a new one.
///
/// Proof size and verification cost must not grow with the size of the state.
pub trait ProofOracle: Send + Sync {
    fn generate_proof(&self, old: &Root, new: &Root, witness: &Witness) -> Result<Proof, ProofError>;

    fn verify_proof(&self, proof: &Proof, old: &Root, new: &Root) -> bool;
}

impl<T: ProofOracle + ?Sized> ProofOracle for Arc<T> {
    fn generate_proof(&self, old: &Root, new: &Root, witness: &Witness) -> Result<Proof, ProofError> {
        (**self).generate_proof(old, new, witness)
    }

    fn verify_proof(&self, proof: &Proof, old: &Root, new: &Root) -> bool {
        (**self).verify_proof(proof, old, new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_bytes_round_trip() {
        let proof = Proof {
            security_bits: 128,
            witness_digest: [5u8; 32],
            tag: vec![1, 2, 3],
        };
        let bytes = proof.to_bytes();
        assert_eq!(bytes.len(), proof.encoded_len());
        assert_eq!(Proof::from_bytes(&bytes).unwrap(), proof);
    }

    #[test]
    fn short_proof_is_malformed() {
        assert!(matches!(Proof::from_bytes(&[0u8; 10]), Err(ProofError::Malformed(_))));
    }
}
