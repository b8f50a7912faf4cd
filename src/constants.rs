//! Filenames, directory layout, and tunable defaults for the on-disk database.
//!
//! Paths here are relative to a database root and mirror the layout fixed by
//! the wire-format section of the specification: a hidden `.db` directory
//! holding engine metadata, and top-level `collections/`, `asset/`,
//! `display/`, `thumb/` directories holding user-visible content.

pub const DB_HIDDEN_DIR: &str = ".db";
pub const FILES_TREE_FILENAME: &str = "files.dat";
pub const CONFIG_FILENAME: &str = "config.json";
pub const WRITE_LOCK_FILENAME: &str = "write.lock";
pub const ENCRYPTION_PUB_FILENAME: &str = "encryption.pub";
pub const HASH_CACHE_FILENAME: &str = "hash_cache.json";

pub const BSON_DIR: &str = "bson";
pub const TREE_FILENAME: &str = "tree.dat";
pub const COLLECTIONS_DIR: &str = "collections";
pub const SHARDS_DIR: &str = "shards";
pub const SORT_INDEXES_DIR: &str = "sort_indexes";

pub const ASSET_DIR: &str = "asset";
pub const DISPLAY_DIR: &str = "display";
pub const THUMB_DIR: &str = "thumb";

pub const METADATA_COLLECTION: &str = "metadata";

/// Default capacity of a single shard (§3 "Shard", typical 1k records).
pub const DEFAULT_SHARD_CAPACITY: usize = 1_000;
/// Default number of buckets a record ID is hashed into (§9 open question on `getShardId`).
pub const DEFAULT_SHARD_BUCKET_COUNT: usize = 1_024;
/// Default sort-index leaf page size (§3 "SortIndex", typical 1k entries).
pub const DEFAULT_SORT_INDEX_PAGE_SIZE: usize = 1_000;
/// Default batch size for `BatchSortIndex` accumulation before a flush (§4.3).
pub const DEFAULT_SORT_INDEX_BATCH_SIZE: usize = 500;
/// Lock staleness threshold T_stale (§4.5, "e.g., 5 min").
pub const DEFAULT_LOCK_STALE_SECONDS: i64 = 5 * 60;
/// Bound N on reader retries against a torn shard/page (§4.5, §9).
pub const DEFAULT_READ_RETRY_COUNT: u32 = 5;
/// Base delay for the exponential backoff used on `Transient` errors (§7).
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 50;

pub const SHA256_LEAF_HASH_LEN: usize = 32;
