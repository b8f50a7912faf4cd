//! `HashCache` (§4.6, SPEC_FULL §3): skip re-hashing a file the importer
//! has already seen at the same `(path, size, mtime)` triple. Bounded via
//! `lru` in memory; an optional on-disk snapshot under
//! `.db/hash_cache.json` lets a restarted import process keep the
//! speedup instead of re-hashing everything from scratch.

use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::constants::{DB_HIDDEN_DIR, HASH_CACHE_FILENAME};
use crate::error::EngineError;
use crate::model::MerkleHash;
use crate::storage::Storage;

pub fn hash_cache_path() -> String {
    format!("{DB_HIDDEN_DIR}/{HASH_CACHE_FILENAME}")
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct CacheKey {
    path: String,
    size: u64,
    mtime_ms: i64,
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    key: CacheKey,
    hash: MerkleHash,
}

const DEFAULT_CAPACITY: usize = 10_000;

pub struct HashCache {
    inner: LruCache<CacheKey, MerkleHash>,
}

impl HashCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: LruCache::new(cap),
        }
    }

    pub fn get(&mut self, path: &str, size: u64, mtime_ms: i64) -> Option<MerkleHash> {
        let key = CacheKey {
            path: path.to_string(),
            size,
            mtime_ms,
        };
        self.inner.get(&key).copied()
    }

    pub fn insert(&mut self, path: impl Into<String>, size: u64, mtime_ms: i64, hash: MerkleHash) {
        let key = CacheKey {
            path: path.into(),
            size,
            mtime_ms,
        };
        self.inner.put(key, hash);
    }

    pub async fn load(storage: &dyn Storage) -> Result<Self, EngineError> {
        let path = hash_cache_path();
        if !storage.file_exists(&path).await? {
            return Ok(Self::new(DEFAULT_CAPACITY));
        }
        let bytes = storage.read(&path).await?;
        let entries: Vec<CacheEntry> = serde_json::from_slice(&bytes)?;
        let mut cache = Self::new(DEFAULT_CAPACITY.max(entries.len()));
        for entry in entries {
            cache.inner.put(entry.key, entry.hash);
        }
        Ok(cache)
    }

    pub async fn save(&self, storage: &dyn Storage) -> Result<(), EngineError> {
        let entries: Vec<CacheEntry> = self
            .inner
            .iter()
            .map(|(key, hash)| CacheEntry {
                key: key.clone(),
                hash: *hash,
            })
            .collect();
        let bytes = serde_json::to_vec(&entries)?;
        storage.write_atomic(&hash_cache_path(), &bytes).await
    }
}
