use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Error parsing a hex-encoded content hash.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashParseError {
    #[error("content hash must be 64 hex characters, got {0}")]
    Length(usize),
    #[error("content hash is not valid hex: {0}")]
    Encoding(String),
}

/// A validated SHA-256 content digest.
///
/// This is the identity of every stored object: equal hashes reference
/// byte-identical content. On the wire and in side-files it travels as a
/// 64-character lowercase hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Digest the given bytes.
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Wrap a finished 32-byte digest.
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    /// Parse a 64-character hex digest.
    pub fn from_hex(s: &str) -> Result<Self, HashParseError> {
        if s.len() != 64 {
            return Err(HashParseError::Length(s.len()));
        }
        let bytes = hex::decode(s).map_err(|e| HashParseError::Encoding(e.to_string()))?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|_| HashParseError::Length(s.len()))?;
        Ok(Self(digest))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Directory name for the git-style sharded object layout
    /// (`<shard_dir>/<object_name>`): the first two hex characters.
    pub fn shard_dir(&self) -> String {
        hex::encode(&self.0[..1])
    }

    /// Filename within the shard directory: the remaining 62 hex characters.
    pub fn object_name(&self) -> String {
        hex::encode(&self.0[1..])
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
