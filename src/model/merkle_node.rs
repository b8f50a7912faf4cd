//! The file Merkle tree (§4.2, §6 wire format). A leaf is one asset file
//! identified by its storage-relative name; internal nodes pair two
//! children left-to-right, promoting an odd tail unchanged so a
//! single-child internal node's hash equals its child's.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::merkle_hash::MerkleHash;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileLeaf {
    pub name: String,
    pub content_hash: MerkleHash,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MerkleNode {
    Leaf(FileLeaf),
    Internal {
        hash: MerkleHash,
        left: Box<MerkleNode>,
        right: Option<Box<MerkleNode>>,
    },
}

impl MerkleNode {
    pub fn hash(&self) -> MerkleHash {
        match self {
            MerkleNode::Leaf(leaf) => leaf.content_hash,
            MerkleNode::Internal { hash, .. } => *hash,
        }
    }

    pub fn leaf(entry: FileLeaf) -> Self {
        MerkleNode::Leaf(entry)
    }

    /// Pair two children, or pass a single child through unchanged —
    /// `buildMerkleTree`'s "promote odd tail" rule applied one level at a
    /// time (§4.2).
    pub fn pair(left: MerkleNode, right: Option<MerkleNode>) -> Self {
        match right {
            None => left,
            Some(right) => {
                let hash = MerkleHash::combine(&left.hash(), &right.hash());
                MerkleNode::Internal {
                    hash,
                    left: Box::new(left),
                    right: Some(Box::new(right)),
                }
            }
        }
    }

    /// In-order leaf names, per `iterateLeaves` (§4.2).
    pub fn iter_leaf_names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_leaf_names(&mut out);
        out
    }

    fn collect_leaf_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            MerkleNode::Leaf(leaf) => out.push(&leaf.name),
            MerkleNode::Internal { left, right, .. } => {
                left.collect_leaf_names(out);
                if let Some(right) = right {
                    right.collect_leaf_names(out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str, content: &[u8]) -> MerkleNode {
        MerkleNode::Leaf(FileLeaf {
            name: name.to_string(),
            content_hash: MerkleHash::of(content),
            size: content.len() as u64,
            last_modified: Utc::now(),
        })
    }

    #[test]
    fn test_single_child_internal_hash_equals_child_hash() {
        let a = leaf("a", b"a");
        let promoted = MerkleNode::pair(a.clone(), None);
        assert_eq!(promoted.hash(), a.hash());
    }

    #[test]
    fn test_iter_leaf_names_is_in_order() {
        let a = leaf("a", b"a");
        let b = leaf("b", b"b");
        let node = MerkleNode::pair(a, Some(b));
        assert_eq!(node.iter_leaf_names(), vec!["a", "b"]);
    }
}
