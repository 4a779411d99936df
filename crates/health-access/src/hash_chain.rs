//! Deterministic fingerprints for structured records
//!
//! Every fingerprint is SHA-256 over a canonical JSON encoding:
//! - Object keys sorted lexicographically (byte order) at every depth
//! - No whitespace between tokens
//! - serde_json number and string formatting
//!
//! Two values that are logically equal produce the same fingerprint no matter
//! what order their keys were inserted in.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Length of a fingerprint in bytes
pub const HASH_LEN: usize = 32;

/// Root anchor of every chain: the `previous_hash` of block 0.
pub const GENESIS_HASH: Hash = Hash([0u8; HASH_LEN]);

/// A 256-bit SHA-256 fingerprint
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    /// Wrap raw digest bytes
    pub const fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Hash(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Lowercase hex encoding (64 characters)
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Whether this is the genesis anchor
    pub fn is_genesis(&self) -> bool {
        *self == GENESIS_HASH
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

/// Error parsing a hex fingerprint
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseHashError {
    #[error("invalid hex in fingerprint: {0}")]
    InvalidHex(String),
    #[error("fingerprint must be {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

impl FromStr for Hash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| ParseHashError::InvalidHex(e.to_string()))?;
        let bytes: [u8; HASH_LEN] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| ParseHashError::InvalidLength {
                    expected: HASH_LEN,
                    got: bytes.len(),
                })?;
        Ok(Hash(bytes))
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// SHA-256 of raw bytes
pub fn sha256(input: &[u8]) -> Hash {
    let digest = Sha256::digest(input);
    let mut bytes = [0u8; HASH_LEN];
    bytes.copy_from_slice(&digest);
    Hash(bytes)
}

/// Fingerprint a structured record.
///
/// Deterministic: identical logical input always yields identical output.
pub fn fingerprint(fields: &Value) -> Hash {
    sha256(canonical_json(fields).as_bytes())
}

/// Fingerprint anything that serializes to JSON.
pub fn fingerprint_of<T: Serialize>(fields: &T) -> Result<Hash, serde_json::Error> {
    let value = serde_json::to_value(fields)?;
    Ok(fingerprint(&value))
}

/// Canonical compact JSON text for a value
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    emit_value(value, &mut out);
    out
}

fn emit_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                emit_string(key, out);
                out.push(':');
                emit_value(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                emit_value(item, out);
            }
            out.push(']');
        }
        Value::String(s) => emit_string(s, out),
        // Null, Bool and Number display as their compact JSON form
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn emit_string(s: &str, out: &mut String) {
    // serde_json escaping for a bare string cannot fail
    out.push_str(&Value::String(s.to_owned()).to_string());
}
