use channel_crypto::hashes::blake3_xof;
use tracing::debug;

use crate::error::ProofError;
use crate::oracle::{Proof, ProofOracle, Root, Witness};

const DOMAIN: &[u8] = b"transition-proof/hash-oracle/v1";

pub const SUPPORTED_SECURITY_BITS: [u32; 3] = [128, 192, 256];

/// Reference oracle: the proof is a domain-separated BLAKE3 binding of both roots and the
/// witness digest. Tag length is `security_bits / 4` bytes, so a proof is always
/// `36 + security_bits / 4` bytes and verification is a single hash.
#[derive(Clone, Copy, Debug)]
pub struct HashOracle {
    security_bits: u32,
}

impl HashOracle {
    pub fn new(security_bits: u32) -> Result<Self, ProofError> {
        if !SUPPORTED_SECURITY_BITS.contains(&security_bits) {
            return Err(ProofError::UnsupportedSecurity(security_bits));
        }
        Ok(Self { security_bits })
    }

    pub fn security_bits(&self) -> u32 {
        self.security_bits
    }

    fn tag(
        security_bits: u32,
        old: &Root,
        new: &Root,
        witness_digest: &[u8; 32],
    ) -> Result<Vec<u8>, ProofError> {
        let bits = security_bits.to_le_bytes();
        Ok(blake3_xof(
            DOMAIN,
            &[bits.as_slice(), old.as_slice(), new.as_slice(), witness_digest.as_slice()],
            (security_bits / 4) as usize,
        )?)
    }
}

impl Default for HashOracle {
    fn default() -> Self {
        Self { security_bits: 128 }
    }
}

impl ProofOracle for HashOracle {
    fn generate_proof(&self, old: &Root, new: &Root, witness: &Witness) -> Result<Proof, ProofError> {
        let witness_digest = witness.digest();
        let tag = Self::tag(self.security_bits, old, new, &witness_digest)?;
        debug!(
            old = %hex::encode(old),
            new = %hex::encode(new),
            bits = self.security_bits,
            "generated transition proof"
        );
        Ok(Proof {
            security_bits: self.security_bits,
            witness_digest,
            tag,
        })
    }

    fn verify_proof(&self, proof: &Proof, old: &Root, new: &Root) -> bool {
        if proof.security_bits != self.security_bits {
            return false;
        }
        match Self::tag(proof.security_bits, old, new, &proof.witness_digest) {
            Ok(expected) => expected == proof.tag,
            Err(_) => false,
        }
    }
}
