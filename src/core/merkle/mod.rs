//! Building, diffing, and persisting the files Merkle tree (§4.2, §6).
//!
//! The tree is rebuilt from its sorted leaf sequence on every mutation
//! rather than rebalanced in place — at the scale of one database's file
//! list this is cheap, and it keeps `findMerkleTreeDifferences` simple:
//! both sides are always a clean binary pairing of the same sorted leaf
//! set.

use std::collections::BTreeMap;

use byteorder_helpers::{read_u16, read_u64, write_u16, write_u64};
use chrono::{DateTime, TimeZone, Utc};

use crate::error::EngineError;
use crate::model::{FileLeaf, MerkleHash, MerkleNode};

/// A sorted, deduplicated-by-name leaf sequence plus a `dirty` flag,
/// matching `addItem`/`upsertItem`/`pruneTree`'s bookkeeping (§4.2).
#[derive(Debug, Clone, Default)]
pub struct FileTree {
    leaves: BTreeMap<String, FileLeaf>,
    dirty: bool,
}

impl FileTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_leaves(leaves: Vec<FileLeaf>) -> Self {
        let leaves = leaves.into_iter().map(|l| (l.name.clone(), l)).collect();
        Self {
            leaves,
            dirty: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FileLeaf> {
        self.leaves.get(name)
    }

    pub fn add_item(&mut self, leaf: FileLeaf) {
        self.leaves.insert(leaf.name.clone(), leaf);
        self.dirty = true;
    }

    /// Alias kept distinct from `add_item` for call-site clarity: inserting
    /// a name that already exists replaces it either way.
    pub fn upsert_item(&mut self, leaf: FileLeaf) {
        self.add_item(leaf);
    }

    pub fn prune_item(&mut self, name: &str) -> Option<FileLeaf> {
        let removed = self.leaves.remove(name);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn iter_leaves(&self) -> impl Iterator<Item = &FileLeaf> {
        self.leaves.values()
    }

    /// `buildMerkleTree`: pair adjacent nodes left-to-right, promoting an
    /// odd tail unchanged, one level at a time until a single root
    /// remains. Returns `None` for an empty tree.
    pub fn build_root(&self) -> Option<MerkleNode> {
        let mut level: Vec<MerkleNode> = self
            .leaves
            .values()
            .cloned()
            .map(MerkleNode::Leaf)
            .collect();
        if level.is_empty() {
            return None;
        }
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            let mut it = level.into_iter();
            while let Some(left) = it.next() {
                let right = it.next();
                next.push(MerkleNode::pair(left, right));
            }
            level = next;
        }
        level.into_iter().next()
    }

    pub fn root_hash(&self) -> Option<MerkleHash> {
        self.build_root().map(|n| n.hash())
    }
}

/// Roll up an already name-sorted sequence of child hashes into one root,
/// by the same pairwise-left-to-right rule as [`FileTree::build_root`].
/// Used for the shard/collection/database "tree-of-trees" (§4.4, GLOSSARY)
/// where a leaf's payload (a record, or a subtree's own root) lives
/// elsewhere and only its hash needs rolling up here.
pub fn combine_sorted_hashes(hashes: impl IntoIterator<Item = MerkleHash>) -> Option<MerkleHash> {
    let mut level: Vec<MerkleHash> = hashes.into_iter().collect();
    if level.is_empty() {
        return None;
    }
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut it = level.into_iter();
        while let Some(left) = it.next() {
            match it.next() {
                Some(right) => next.push(MerkleHash::combine(&left, &right)),
                None => next.push(left),
            }
        }
        level = next;
    }
    level.into_iter().next()
}

/// `findMerkleTreeDifferences`: names present only in `a`, and names
/// present only in `b` (by differing leaf hash or outright absence). Both
/// trees are rebuilt from their sorted leaf maps, so this walks the
/// sorted name sequences in lockstep rather than descending a shared
/// binary structure — an equivalent, simpler formulation of the same
/// prune-on-equal-hash recursion for this flat leaf layout.
pub struct TreeDiff {
    pub only_in_a: Vec<FileLeaf>,
    pub only_in_b: Vec<FileLeaf>,
}

pub fn find_differences(a: &FileTree, b: &FileTree) -> TreeDiff {
    let mut only_in_a = Vec::new();
    let mut only_in_b = Vec::new();

    let mut names: Vec<&String> = a.leaves.keys().chain(b.leaves.keys()).collect();
    names.sort();
    names.dedup();

    for name in names {
        match (a.leaves.get(name), b.leaves.get(name)) {
            (Some(la), Some(lb)) => {
                if la.content_hash != lb.content_hash {
                    only_in_a.push(la.clone());
                    only_in_b.push(lb.clone());
                }
            }
            (Some(la), None) => only_in_a.push(la.clone()),
            (None, Some(lb)) => only_in_b.push(lb.clone()),
            (None, None) => unreachable!(),
        }
    }

    TreeDiff {
        only_in_a,
        only_in_b,
    }
}

/// Binary wire format (§6): length-prefixed leaves sorted by name —
/// `{nameLen:u16, name, hash[32], size:u64, lastModifiedMs:i64}` —
/// followed by a trailing header of leaf count and root hash.
pub fn encode(tree: &FileTree) -> Result<Vec<u8>, EngineError> {
    let mut buf = Vec::new();
    let mut count: u64 = 0;
    for leaf in tree.iter_leaves() {
        let name_bytes = leaf.name.as_bytes();
        let name_len: u16 = name_bytes
            .len()
            .try_into()
            .map_err(|_| EngineError::integrity(format!("leaf name too long: {}", leaf.name)))?;
        write_u16(&mut buf, name_len);
        buf.extend_from_slice(name_bytes);
        buf.extend_from_slice(leaf.content_hash.as_bytes());
        write_u64(&mut buf, leaf.size);
        write_u64(&mut buf, leaf.last_modified.timestamp_millis() as u64);
        count += 1;
    }

    let root_hash = tree.root_hash().unwrap_or_else(|| MerkleHash::of(b""));
    write_u64(&mut buf, count);
    buf.extend_from_slice(root_hash.as_bytes());
    Ok(buf)
}

pub fn decode(bytes: &[u8]) -> Result<FileTree, EngineError> {
    let trailer_len = 8 + MerkleHash::LEN;
    if bytes.len() < trailer_len {
        return Err(EngineError::integrity("truncated files Merkle tree file"));
    }
    let (body, trailer) = bytes.split_at(bytes.len() - trailer_len);
    let claimed_count = read_u64(trailer, 0)?;
    let claimed_root = MerkleHash::from_bytes(&trailer[8..8 + MerkleHash::LEN])?;

    let mut cursor = 0usize;
    let mut leaves = Vec::new();
    while cursor < body.len() {
        let name_len = read_u16(body, cursor)? as usize;
        cursor += 2;
        if cursor + name_len > body.len() {
            return Err(EngineError::integrity("truncated leaf name"));
        }
        let name = String::from_utf8(body[cursor..cursor + name_len].to_vec())
            .map_err(|e| EngineError::integrity(format!("invalid leaf name utf-8: {e}")))?;
        cursor += name_len;

        if cursor + MerkleHash::LEN > body.len() {
            return Err(EngineError::integrity("truncated leaf hash"));
        }
        let content_hash = MerkleHash::from_bytes(&body[cursor..cursor + MerkleHash::LEN])?;
        cursor += MerkleHash::LEN;

        let size = read_u64(body, cursor)?;
        cursor += 8;
        let last_modified_ms = read_u64(body, cursor)? as i64;
        cursor += 8;
        let last_modified: DateTime<Utc> = Utc
            .timestamp_millis_opt(last_modified_ms)
            .single()
            .ok_or_else(|| EngineError::integrity("invalid lastModifiedMs"))?;

        leaves.push(FileLeaf {
            name,
            content_hash,
            size,
            last_modified,
        });
    }

    if leaves.len() as u64 != claimed_count {
        return Err(EngineError::integrity(format!(
            "leaf count mismatch: header says {claimed_count}, found {}",
            leaves.len()
        )));
    }

    let tree = FileTree::from_leaves(leaves);
    if let Some(actual_root) = tree.root_hash() {
        if actual_root != claimed_root {
            return Err(EngineError::integrity(
                "root hash in trailer does not match recomputed root",
            ));
        }
    }
    Ok(tree)
}

/// Tiny big-endian integer helpers so the wire format doesn't need a
/// general-purpose byte-order crate for four call sites.
mod byteorder_helpers {
    use crate::error::EngineError;

    pub fn write_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u64(buf: &mut Vec<u8>, v: u64) {
        buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn read_u16(buf: &[u8], at: usize) -> Result<u16, EngineError> {
        let slice = buf
            .get(at..at + 2)
            .ok_or_else(|| EngineError::integrity("truncated u16"))?;
        Ok(u16::from_be_bytes(slice.try_into().unwrap()))
    }

    pub fn read_u64(buf: &[u8], at: usize) -> Result<u64, EngineError> {
        let slice = buf
            .get(at..at + 8)
            .ok_or_else(|| EngineError::integrity("truncated u64"))?;
        Ok(u64::from_be_bytes(slice.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str, content: &[u8]) -> FileLeaf {
        FileLeaf {
            name: name.to_string(),
            content_hash: MerkleHash::of(content),
            size: content.len() as u64,
            last_modified: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        }
    }

    #[test]
    fn test_build_root_is_stable_across_insertion_order() {
        let mut a = FileTree::new();
        a.add_item(leaf("a", b"1"));
        a.add_item(leaf("b", b"2"));
        a.add_item(leaf("c", b"3"));

        let mut b = FileTree::new();
        b.add_item(leaf("c", b"3"));
        b.add_item(leaf("a", b"1"));
        b.add_item(leaf("b", b"2"));

        assert_eq!(a.root_hash(), b.root_hash());
    }

    #[test]
    fn test_find_differences_detects_changed_and_missing_leaves() {
        let mut a = FileTree::new();
        a.add_item(leaf("a", b"1"));
        a.add_item(leaf("b", b"2"));

        let mut b = FileTree::new();
        b.add_item(leaf("a", b"1"));
        b.add_item(leaf("b", b"changed"));
        b.add_item(leaf("c", b"3"));

        let diff = find_differences(&a, &b);
        assert_eq!(diff.only_in_a.len(), 1);
        assert_eq!(diff.only_in_a[0].name, "b");
        assert_eq!(diff.only_in_b.len(), 2);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut tree = FileTree::new();
        tree.add_item(leaf("a", b"1"));
        tree.add_item(leaf("b", b"2"));

        let bytes = encode(&tree).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.root_hash(), tree.root_hash());
    }

    #[test]
    fn test_decode_rejects_truncated_input() {
        assert!(decode(&[0u8; 4]).is_err());
    }
}
