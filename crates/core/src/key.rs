//! Orchestration key derivation.
//!
//! A key is the lower-case hex SHA-256 of `"{category}:{qualifier}"`, so the
//! same logical source always maps to the same controller.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("orchestration key must be 64 lower-case hex characters, got {0:?}")]
    Malformed(String),
}

/// Stable identity of one logical source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrchestrationKey(String);

impl OrchestrationKey {
    pub fn derive(category: &str, qualifier: &str) -> Self {
        let digest = Sha256::digest(format!("{}:{}", category, qualifier).as_bytes());
        Self(format!("{:x}", digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for OrchestrationKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == 64
            && s
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(KeyError::Malformed(s.to_string()))
        }
    }
}

impl TryFrom<String> for OrchestrationKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OrchestrationKey> for String {
    fn from(key: OrchestrationKey) -> Self {
        key.0
    }
}

impl fmt::Display for OrchestrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_known_vectors() {
        assert_eq!(
            OrchestrationKey::derive("blobs", "incoming/batch1").as_str(),
            "dff9e6592e5da493fc82fbd9e0239b81aabd312743a94564116304df462cc638"
        );
        assert_eq!(
            OrchestrationKey::derive("content-reference-type", "ExternalFile").as_str(),
            "9c6c2a18f8fc90ca0a0bb9a5540a6f8552f7e74e7d2451033896884e97de6a35"
        );
    }

    #[test]
    fn test_derive_is_stable_and_distinct() {
        let a = OrchestrationKey::derive("blobs", "a");
        assert_eq!(a, OrchestrationKey::derive("blobs", "a"));
        assert_ne!(a, OrchestrationKey::derive("blobs", "b"));
        // separator is part of the hashed input
        assert_ne!(
            OrchestrationKey::derive("ab", "c"),
            OrchestrationKey::derive("a", "bc")
        );
    }

    #[test]
    fn test_parse_round_trips_display() {
        let key = OrchestrationKey::derive("blobs", "x");
        let parsed: OrchestrationKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("abc".parse::<OrchestrationKey>().is_err());
        let upper = "DFF9E6592E5DA493FC82FBD9E0239B81AABD312743A94564116304DF462CC638";
        assert!(upper.parse::<OrchestrationKey>().is_err());
        let non_hex = "g".repeat(64);
        assert!(non_hex.parse::<OrchestrationKey>().is_err());
    }

    #[test]
    fn test_serde_validates() {
        let bad: Result<OrchestrationKey, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());

        let key = OrchestrationKey::derive("blobs", "x");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key));
    }
}
