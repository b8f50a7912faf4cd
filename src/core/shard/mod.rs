//! Shard load/save (§4.4). A shard is a single rmp-serde document; saves
//! go through [`Storage::write_atomic`] so readers never observe a
//! half-written file.

use uuid::Uuid;

use crate::error::EngineError;
use crate::model::Shard;
use crate::storage::Storage;

pub fn shard_path(collection: &str, shard_id: Uuid) -> String {
    format!("collections/{collection}/shards/{shard_id}")
}

/// Path to a shard's own Merkle tree file, under the `.db/bson` metadata
/// subtree rather than alongside the shard's data file (§6).
pub fn shard_tree_path(collection: &str, shard_id: Uuid) -> String {
    format!(".db/bson/collections/{collection}/shards/{shard_id}/tree.dat")
}

/// Stable, deterministic bucketing of a record into a shard (§4.4
/// `getShardId`, §9 Open Question): the first four bytes of the record's
/// UUID, taken as a big-endian `u32` and reduced modulo the fixed bucket
/// count. The engine mints a shard's own ID lazily, so this returns the
/// *bucket number*; callers map it to an actual shard UUID via the
/// collection's shard directory.
pub fn bucket_for_record(record_id: Uuid, bucket_count: usize) -> usize {
    let bytes = record_id.as_bytes();
    let n = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    (n as usize) % bucket_count.max(1)
}

/// `getShardId(recordId)` (§4.4, §9 open question): a record's shard is
/// named deterministically from its bucket number rather than looked up
/// in a separate mapping file, so the function stays pure with no shared
/// state — a UUIDv5 of `"<collection>/<bucket>"` under the standard OID
/// namespace. Two records that hash into the same bucket always resolve
/// to the same shard ID; no directory of bucket-to-shard assignments is
/// ever persisted.
pub fn shard_id_for_record(collection: &str, record_id: Uuid, bucket_count: usize) -> Uuid {
    let bucket = bucket_for_record(record_id, bucket_count);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{collection}/{bucket}").as_bytes())
}

pub async fn load_shard(storage: &dyn Storage, collection: &str, shard_id: Uuid) -> Result<Shard, EngineError> {
    let bytes = storage.read(&shard_path(collection, shard_id)).await?;
    rmp_serde::from_slice(&bytes).map_err(EngineError::from)
}

pub async fn save_shard(storage: &dyn Storage, collection: &str, shard: &Shard) -> Result<(), EngineError> {
    let bytes = rmp_serde::to_vec(shard)?;
    storage
        .write_atomic(&shard_path(collection, shard.id), &bytes)
        .await
}

pub async fn delete_shard(storage: &dyn Storage, collection: &str, shard_id: Uuid) -> Result<(), EngineError> {
    storage.delete(&shard_path(collection, shard_id)).await
}
