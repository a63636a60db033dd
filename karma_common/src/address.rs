use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 20-byte EVM-style account identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Address(pub [u8; 20]);

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("address must be 0x-prefixed")]
    MissingPrefix,
    #[error("address must be 40 hex characters, got {len}")]
    WrongLength { len: usize },
    #[error("invalid hex in address: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

impl Address {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").ok_or(AddressError::MissingPrefix)?;
        if stripped.len() != 40 {
            return Err(AddressError::WrongLength {
                len: stripped.len(),
            });
        }
        let mut buf = [0u8; 20];
        hex::decode_to_slice(stripped, &mut buf)?;
        Ok(Self(buf))
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_roundtrip_via_display_and_parse() {
        let addr = Address([0xABu8; 20]);
        let text = addr.to_string();
        let parsed: Address = text.parse().unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn address_serde_roundtrip() {
        let addr = Address([7u8; 20]);
        let data = serde_json::to_vec(&addr).unwrap();
        let decoded: Address = serde_json::from_slice(&data).unwrap();
        assert_eq!(addr, decoded);
    }

    #[test]
    fn address_rejects_missing_prefix() {
        let err = "abcd".parse::<Address>().unwrap_err();
        assert!(matches!(err, AddressError::MissingPrefix));
    }

    #[test]
    fn address_rejects_wrong_length() {
        let err = "0xabcd".parse::<Address>().unwrap_err();
        assert!(matches!(err, AddressError::WrongLength { .. }));
    }
}
