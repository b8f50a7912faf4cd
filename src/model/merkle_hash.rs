//! The 32-byte node hash used throughout the Merkle file tree and document
//! trees (§4.2). Leaf hashes are SHA-256 digests of file/record content;
//! internal node hashes are `combine`d from their two children.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::util::hasher::hash_buffer;

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MerkleHash([u8; 32]);

impl MerkleHash {
    pub const LEN: usize = 32;

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EngineError> {
        if bytes.len() != Self::LEN {
            return Err(EngineError::integrity(format!(
                "expected a {}-byte hash, got {}",
                Self::LEN,
                bytes.len()
            )));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Hash of `data`, used to derive a leaf's content hash.
    pub fn of(data: &[u8]) -> Self {
        Self(hash_buffer(data))
    }

    /// The hash an internal node takes on given its two children's hashes:
    /// `H(left.hash || right.hash)` (§4.2).
    pub fn combine(left: &MerkleHash, right: &MerkleHash) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&left.0);
        buf.extend_from_slice(&right.0);
        Self(hash_buffer(&buf))
    }
}

impl FromStr for MerkleHash {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|e| EngineError::integrity(format!("invalid hex hash {s:?}: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for MerkleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for MerkleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MerkleHash({})", self.to_hex())
    }
}
