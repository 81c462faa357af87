//! Deterministic bincode used for ledger and HTLC cell payloads and for proof witnesses.

use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{ChannelError, ChannelResult};

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

pub fn encode<T: Serialize>(value: &T) -> ChannelResult<Vec<u8>> {
    options()
        .serialize(value)
        .map_err(|err| ChannelError::Codec(err.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ChannelResult<T> {
    options()
        .deserialize(bytes)
        .map_err(|err| ChannelError::Codec(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_fixed_width_little_endian() {
        assert_eq!(encode(&0x0102_0304u32).unwrap(), vec![4, 3, 2, 1]);
        assert_eq!(encode(&1u64).unwrap().len(), 8);
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = encode(&7u64).unwrap();
        bytes.push(0);
        assert!(matches!(decode::<u64>(&bytes), Err(ChannelError::Codec(_))));
    }
}
