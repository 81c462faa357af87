use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CellError;

/// Canonical lookup key: the raw key bytes as lower-case hex.
///
/// Two keys are equal exactly when their raw bytes are equal, and ordering follows the hex text,
/// so iteration over bound keys is reproducible everywhere.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StateKey(String);

impl StateKey {
    pub fn from_bytes(raw: &[u8]) -> Self {
        Self(hex::encode(raw))
    }

    pub fn from_hex(value: &str) -> Result<Self, CellError> {
        let raw = hex::decode(value).map_err(|err| CellError::InvalidKey(err.to_string()))?;
        Ok(Self::from_bytes(&raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Constructors only admit valid hex.
        hex::decode(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StateKey {
    type Error = CellError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<StateKey> for String {
    fn from(key: StateKey) -> Self {
        key.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_is_normalised() {
        let upper = StateKey::from_hex("ABCD").unwrap();
        let lower = StateKey::from_bytes(&[0xab, 0xcd]);
        assert_eq!(upper, lower);
        assert_eq!(upper.as_str(), "abcd");
        assert_eq!(upper.to_bytes(), vec![0xab, 0xcd]);
    }

    #[test]
    fn rejects_non_hex() {
        assert!(matches!(StateKey::from_hex("xyz"), Err(CellError::InvalidKey(_))));
    }
}
