//! The document-side "tree-of-trees" (§3 GLOSSARY, §4.4): the same small
//! keyed-hash Merkle tree shape is reused at all three levels — a shard's
//! tree over `(recordId, recordHash)`, a collection's over `(shardId,
//! shardRootHash)`, and the database's over `(collectionName,
//! collectionRootHash)`. Unlike the files tree (§4.2, fixed binary wire
//! format), these trees have no externally mandated encoding — only their
//! storage path is fixed (§6) — so they persist as an rmp-serde-encoded
//! sorted leaf list.

use std::collections::BTreeMap;

use crate::core::merkle::combine_sorted_hashes;
use crate::error::EngineError;
use crate::model::{DocLeaf, MerkleHash};
use crate::storage::Storage;

#[derive(Debug, Clone, Default)]
pub struct DocTree {
    leaves: BTreeMap<String, MerkleHash>,
}

impl DocTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_leaves(leaves: Vec<DocLeaf>) -> Self {
        Self {
            leaves: leaves.into_iter().map(|l| (l.key, l.hash)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn get(&self, key: &str) -> Option<MerkleHash> {
        self.leaves.get(key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.leaves.keys()
    }

    /// Insert or overwrite the entry for `key`.
    pub fn set(&mut self, key: impl Into<String>, hash: MerkleHash) {
        self.leaves.insert(key.into(), hash);
    }

    /// Remove `key`'s entry, used when a shard empties or a record is
    /// deleted by sync/replicate (§4.7, §4.8).
    pub fn remove(&mut self, key: &str) -> Option<MerkleHash> {
        self.leaves.remove(key)
    }

    pub fn root_hash(&self) -> Option<MerkleHash> {
        combine_sorted_hashes(self.leaves.values().copied())
    }

    fn to_leaves(&self) -> Vec<DocLeaf> {
        self.leaves
            .iter()
            .map(|(k, h)| DocLeaf::new(k.clone(), *h))
            .collect()
    }
}

/// Difference between two keyed trees, in the same shape as
/// [`crate::core::merkle::TreeDiff`]: a key with a differing hash appears
/// in both `only_in_a` and `only_in_b`; a key unique to one side appears
/// only there.
#[derive(Debug, Clone, Default)]
pub struct DocTreeDiff {
    pub only_in_a: Vec<String>,
    pub only_in_b: Vec<String>,
}

pub fn diff(a: &DocTree, b: &DocTree) -> DocTreeDiff {
    let mut only_in_a = Vec::new();
    let mut only_in_b = Vec::new();

    let mut keys: Vec<&String> = a.leaves.keys().chain(b.leaves.keys()).collect();
    keys.sort();
    keys.dedup();

    for key in keys {
        match (a.leaves.get(key), b.leaves.get(key)) {
            (Some(ha), Some(hb)) => {
                if ha != hb {
                    only_in_a.push(key.clone());
                    only_in_b.push(key.clone());
                }
            }
            (Some(_), None) => only_in_a.push(key.clone()),
            (None, Some(_)) => only_in_b.push(key.clone()),
            (None, None) => unreachable!(),
        }
    }

    DocTreeDiff {
        only_in_a,
        only_in_b,
    }
}

pub async fn load(storage: &dyn Storage, path: &str) -> Result<DocTree, EngineError> {
    if !storage.file_exists(path).await? {
        return Ok(DocTree::new());
    }
    let bytes = storage.read(path).await?;
    if bytes.is_empty() {
        return Ok(DocTree::new());
    }
    let leaves: Vec<DocLeaf> = rmp_serde::from_slice(&bytes)?;
    Ok(DocTree::from_leaves(leaves))
}

pub async fn save(storage: &dyn Storage, path: &str, tree: &DocTree) -> Result<(), EngineError> {
    let bytes = rmp_serde::to_vec(&tree.to_leaves())?;
    storage.write_atomic(path, &bytes).await
}
