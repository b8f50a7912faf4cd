//! Tunable capacities and thresholds the specification leaves to the
//! implementation (shard capacity `S`, sort-index page size `P` and batch
//! size `B`, lock staleness `T_stale`, retry bound `N`).

use chrono::Duration;

use crate::constants::{
    DEFAULT_LOCK_STALE_SECONDS, DEFAULT_READ_RETRY_COUNT, DEFAULT_SHARD_BUCKET_COUNT,
    DEFAULT_SHARD_CAPACITY, DEFAULT_SORT_INDEX_BATCH_SIZE, DEFAULT_SORT_INDEX_PAGE_SIZE,
};

#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    pub shard_capacity: usize,
    /// Fixed bucket count `getShardId` reduces a record ID modulo (§9 open
    /// question), resolved in DESIGN.md as a deterministic UUIDv5 of the
    /// bucket number rather than a persisted assignment table.
    pub shard_bucket_count: usize,
    pub sort_index_page_size: usize,
    pub sort_index_batch_size: usize,
    pub lock_stale_after: Duration,
    pub read_retry_count: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shard_capacity: DEFAULT_SHARD_CAPACITY,
            shard_bucket_count: DEFAULT_SHARD_BUCKET_COUNT,
            sort_index_page_size: DEFAULT_SORT_INDEX_PAGE_SIZE,
            sort_index_batch_size: DEFAULT_SORT_INDEX_BATCH_SIZE,
            lock_stale_after: Duration::seconds(DEFAULT_LOCK_STALE_SECONDS),
            read_retry_count: DEFAULT_READ_RETRY_COUNT,
        }
    }
}
