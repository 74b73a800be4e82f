// Core blockchain identifiers shared across the service. Both identifiers are
// 32-byte values that travel as hex strings through JSON and the database.

use std::fmt;
use std::str::FromStr;

use bson::Bson;
use num_bigint::BigUint;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Number of decimal places of a siacoin, i.e. one siacoin equals 10^24
/// hastings. All amounts handled by the service are denominated in hastings.
pub const SIACOIN_PRECISION_DECIMALS: usize = 24;

/// Returns the number of hastings that make up one siacoin.
pub fn siacoin_precision() -> BigUint {
    num_traits::pow(BigUint::from(10u32), SIACOIN_PRECISION_DECIMALS)
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseHashError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("expected {expected} bytes but got {got}")]
    Length { expected: usize, got: usize },
}

fn decode_hash32(s: &str) -> Result<[u8; 32], ParseHashError> {
    let bytes = hex::decode(s)?;
    let got = bytes.len();
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| ParseHashError::Length { expected: 32, got })
}

/// A blockchain unlock hash, the address coins can be sent to.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UnlockHash([u8; 32]);

impl UnlockHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for UnlockHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for UnlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for UnlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnlockHash({})", self)
    }
}

impl FromStr for UnlockHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_hash32(s).map(Self)
    }
}

impl Serialize for UnlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for UnlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

impl From<UnlockHash> for Bson {
    fn from(hash: UnlockHash) -> Self {
        Bson::String(hash.to_string())
    }
}

/// The id of a blockchain transaction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TransactionId([u8; 32]);

impl TransactionId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for TransactionId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self)
    }
}

impl FromStr for TransactionId {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_hash32(s).map(Self)
    }
}

impl Serialize for TransactionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TransactionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

impl From<TransactionId> for Bson {
    fn from(id: TransactionId) -> Self {
        Bson::String(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlock_hash_roundtrip() {
        let bytes: [u8; 32] = rand::random();
        let hash = UnlockHash::from(bytes);
        let encoded = hash.to_string();
        assert_eq!(encoded.len(), 64);
        assert_eq!(encoded.parse::<UnlockHash>().unwrap(), hash);
    }

    #[test]
    fn test_unlock_hash_serde() {
        let hash = UnlockHash::from([0xab; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let decoded: UnlockHash = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, hash);
    }

    #[test]
    fn test_parse_errors() {
        // Too short.
        let err = "abcd".parse::<UnlockHash>().unwrap_err();
        assert_eq!(
            err,
            ParseHashError::Length {
                expected: 32,
                got: 2
            }
        );

        // Not hex at all.
        assert!("zz".repeat(32).parse::<TransactionId>().is_err());
    }

    #[test]
    fn test_siacoin_precision() {
        assert_eq!(siacoin_precision().to_string(), format!("1{}", "0".repeat(24)));
    }
}
