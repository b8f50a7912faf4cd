//! A leaf of the document-side "tree-of-trees" (§3 GLOSSARY): a shard's
//! tree leaf is `(recordId, recordHash)`, a collection's is `(shardId,
//! shardRootHash)`, and the database's is `(collectionName,
//! collectionRootHash)`. All three levels share this same shape — only
//! what `key` names differs.

use serde::{Deserialize, Serialize};

use crate::model::merkle_hash::MerkleHash;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocLeaf {
    pub key: String,
    pub hash: MerkleHash,
}

impl DocLeaf {
    pub fn new(key: impl Into<String>, hash: MerkleHash) -> Self {
        Self {
            key: key.into(),
            hash,
        }
    }
}
