//! mediagrove: a content-addressed, replicable media-asset database
//! engine — a file Merkle store, sharded BSON-like document collections
//! with per-field sort indices, a write-lock protocol, and replicate/
//! sync/repair reconciliation, all built over a pluggable [`Storage`]
//! backend.
//!
//! [`Engine`] is the thin facade this crate exposes; almost everything it
//! does forwards straight into `core::*`, which is where the actual
//! invariants live.

pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod model;
pub mod ports;
pub mod storage;
#[cfg(test)]
pub mod test;
pub mod util;

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::config::{DatabaseConfig, RuntimeConfig};
use crate::core::collection::Collection;
use crate::core::database::Database;
use crate::core::encryption;
use crate::core::files;
use crate::core::hash_cache::HashCache;
use crate::core::lock::{self, WriteLock};
use crate::core::media_db::{AddFileInput, AddFileOutcome, DatabaseSummary, MediaFileDatabase};
use crate::core::repair::{self, RepairOptions, RepairReport};
use crate::core::replicate::{self, ReplicateOptions, ReplicateReport};
use crate::core::sort_index::{SortIndex, SortIndexPageView};
use crate::core::sync::{self, SyncOptions, SyncReport};
use crate::error::EngineError;
use crate::model::{FieldValue, Record, SortDirection};
use crate::ports::{MediaTooling, TimestampProvider, UuidGenerator};
use crate::storage::Storage;
use crate::util::ProgressCallback;

/// One open database rooted at a [`Storage`] backend (§6 "Exposed
/// interface (summary)"): open/create; list collections, shards, records;
/// get/put/update/delete record; ensure/drop/list sort index; paged and
/// range queries; replicate/sync/repair; encrypt/decrypt in-place.
pub struct Engine<'s> {
    storage: &'s dyn Storage,
    media: &'s dyn MediaTooling,
    clock: &'s dyn TimestampProvider,
    uuids: &'s dyn UuidGenerator,
    config: RuntimeConfig,
}

impl<'s> Engine<'s> {
    pub fn new(
        storage: &'s dyn Storage,
        media: &'s dyn MediaTooling,
        clock: &'s dyn TimestampProvider,
        uuids: &'s dyn UuidGenerator,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            storage,
            media,
            clock,
            uuids,
            config,
        }
    }

    /// `open` (§6): fails with `NotFound` if nothing has been created yet.
    pub async fn open(&self) -> Result<DatabaseConfig, EngineError> {
        files::open_database(self.storage).await
    }

    /// `create` (§6): fails with `AlreadyExists` if already initialized.
    pub async fn create(&self) -> Result<DatabaseConfig, EngineError> {
        files::create_database(self.storage, self.uuids).await
    }

    /// `close` is a no-op at the engine level: `Storage` owns no
    /// process-wide handle to release, and the one piece of session state
    /// (the write-lock) is released explicitly via [`Engine::release_lock`]
    /// rather than implicitly on drop, since release must be fallible and
    /// observed (§4.5).
    pub fn close(&self) {}

    pub fn database(&self) -> Database<'s> {
        Database::new(self.storage, self.config)
    }

    pub fn collection(&self, name: &str) -> Collection<'s> {
        Collection::new(self.storage, name, self.config)
    }

    pub fn media_database(&self) -> MediaFileDatabase<'s> {
        MediaFileDatabase::new(self.storage, self.media, self.clock, self.uuids, self.config)
    }

    pub async fn list_collections(&self) -> Result<Vec<String>, EngineError> {
        self.database().list_collections().await
    }

    pub async fn list_shards(&self, collection: &str) -> Result<Vec<Uuid>, EngineError> {
        self.collection(collection).shard_ids().await
    }

    pub async fn list_records(&self, collection: &str) -> Result<Vec<Record>, EngineError> {
        self.collection(collection).all_records().await
    }

    pub async fn get_record(&self, collection: &str, id: Uuid) -> Result<Option<Record>, EngineError> {
        self.collection(collection).get_one(id).await
    }

    /// `putRecord`/`updateRecord` (§6): the same last-write-wins field
    /// merge either way (§4.4 `updateOne` has no separate insert path — a
    /// record that doesn't exist yet is created on its first update).
    pub async fn put_record(
        &self,
        collection: &str,
        id: Uuid,
        fields: BTreeMap<String, FieldValue>,
    ) -> Result<Record, EngineError> {
        self.collection(collection)
            .update_one(id, fields, self.clock.now())
            .await
    }

    pub async fn delete_record(&self, collection: &str, id: Uuid) -> Result<(), EngineError> {
        self.collection(collection).delete_record(id).await
    }

    pub async fn ensure_sort_index(
        &self,
        collection: &str,
        field: &str,
        direction: SortDirection,
        progress: &ProgressCallback,
    ) -> Result<(), EngineError> {
        self.collection(collection)
            .ensure_sort_index(field, direction, progress)
            .await
    }

    pub async fn drop_sort_index(
        &self,
        collection: &str,
        field: &str,
        direction: SortDirection,
    ) -> Result<(), EngineError> {
        self.collection(collection).drop_sort_index(field, direction).await
    }

    /// `listSortIndexes` (§6): directory names under a collection's
    /// `sort_indexes/` are already `<field>_asc`/`<field>_desc`, so there is
    /// no separate registry to keep in sync — listing the directory back
    /// out is enough.
    pub async fn list_sort_indexes(&self, collection: &str) -> Result<Vec<(String, SortDirection)>, EngineError> {
        let prefix = format!("collections/{collection}/sort_indexes");
        let entries = self.storage.list(&prefix).await?;
        let mut out = Vec::new();
        for entry in entries {
            let name = entry.rsplit('/').next().unwrap_or(&entry);
            if let Some(field) = name.strip_suffix("_asc") {
                out.push((field.to_string(), SortDirection::Ascending));
            } else if let Some(field) = name.strip_suffix("_desc") {
                out.push((field.to_string(), SortDirection::Descending));
            }
        }
        Ok(out)
    }

    pub async fn get_sort_index_page(
        &self,
        collection: &str,
        field: &str,
        direction: SortDirection,
        page_id: Option<Uuid>,
    ) -> Result<SortIndexPageView, EngineError> {
        let index = SortIndex::load(
            self.storage,
            collection,
            field,
            direction,
            self.config.sort_index_page_size,
        )
        .await?;
        index.get_page(page_id).await
    }

    pub async fn find_by_value(
        &self,
        collection: &str,
        field: &str,
        direction: SortDirection,
        value: &FieldValue,
    ) -> Result<Vec<Uuid>, EngineError> {
        let index = SortIndex::load(
            self.storage,
            collection,
            field,
            direction,
            self.config.sort_index_page_size,
        )
        .await?;
        index.find_by_value(value).await
    }

    pub async fn find_by_range(
        &self,
        collection: &str,
        field: &str,
        direction: SortDirection,
        lower: Option<&FieldValue>,
        upper: Option<&FieldValue>,
    ) -> Result<Vec<Uuid>, EngineError> {
        let index = SortIndex::load(
            self.storage,
            collection,
            field,
            direction,
            self.config.sort_index_page_size,
        )
        .await?;
        index.find_by_range(lower, upper).await
    }

    pub async fn add_file(
        &self,
        input: AddFileInput,
        hash_cache: &mut HashCache,
    ) -> Result<AddFileOutcome, EngineError> {
        self.media_database().add_file(input, hash_cache).await
    }

    pub async fn get_database_summary(&self) -> Result<DatabaseSummary, EngineError> {
        self.media_database().get_database_summary().await
    }

    pub async fn acquire_lock(&self, session_id: Uuid) -> Result<WriteLock, EngineError> {
        lock::acquire(self.storage, session_id, self.clock, self.config.lock_stale_after).await
    }

    pub async fn release_lock(&self, held: &WriteLock) -> Result<(), EngineError> {
        lock::release(self.storage, held).await
    }

    pub async fn replicate(
        &self,
        destination: &dyn Storage,
        options: ReplicateOptions,
        progress: &ProgressCallback,
    ) -> Result<ReplicateReport, EngineError> {
        replicate::replicate(self.storage, destination, self.config, options, progress).await
    }

    pub async fn sync(
        &self,
        other: &dyn Storage,
        session_id: Uuid,
        options: SyncOptions,
        progress: &ProgressCallback,
    ) -> Result<SyncReport, EngineError> {
        sync::sync(self.storage, other, session_id, self.clock, self.config, options, progress).await
    }

    pub async fn repair(
        &self,
        source: &dyn Storage,
        options: RepairOptions,
        progress: &ProgressCallback,
    ) -> Result<RepairReport, EngineError> {
        repair::repair(self.storage, source, self.config, options, progress).await
    }

    pub async fn enable_encryption(&self) -> Result<(), EngineError> {
        encryption::enable(self.storage).await
    }

    pub async fn disable_encryption(&self) -> Result<(), EngineError> {
        encryption::disable(self.storage).await
    }

    pub async fn is_encrypted(&self) -> Result<bool, EngineError> {
        encryption::is_encrypted(self.storage).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::test_doubles::NoopMediaTooling;
    use crate::ports::{SystemClock, UuidV4Generator};
    use crate::storage::LocalStorage;

    #[tokio::test]
    async fn test_create_open_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let media = NoopMediaTooling;
        let clock = SystemClock;
        let uuids = UuidV4Generator;
        let engine = Engine::new(&storage, &media, &clock, &uuids, RuntimeConfig::default());

        engine.create().await.unwrap();
        assert!(engine.open().await.is_ok());

        let id = Uuid::new_v4();
        let fields = BTreeMap::from([("title".to_string(), FieldValue::String("hi".into()))]);
        engine.put_record("metadata", id, fields).await.unwrap();

        let fetched = engine.get_record("metadata", id).await.unwrap().unwrap();
        assert_eq!(fetched.fields["title"], FieldValue::String("hi".into()));
        assert_eq!(
            engine.list_collections().await.unwrap(),
            vec!["metadata".to_string()]
        );
    }

    #[tokio::test]
    async fn test_list_sort_indexes_reflects_ensure_and_drop() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let media = NoopMediaTooling;
        let clock = SystemClock;
        let uuids = UuidV4Generator;
        let engine = Engine::new(&storage, &media, &clock, &uuids, RuntimeConfig::default());
        engine.create().await.unwrap();

        let id = Uuid::new_v4();
        let fields = BTreeMap::from([("score".to_string(), FieldValue::Int(5))]);
        engine.put_record("metadata", id, fields).await.unwrap();

        let progress = crate::util::noop_progress();
        engine
            .ensure_sort_index("metadata", "score", SortDirection::Ascending, &progress)
            .await
            .unwrap();

        let indexes = engine.list_sort_indexes("metadata").await.unwrap();
        assert!(indexes.contains(&("score".to_string(), SortDirection::Ascending)));

        engine
            .drop_sort_index("metadata", "score", SortDirection::Ascending)
            .await
            .unwrap();
        let indexes = engine.list_sort_indexes("metadata").await.unwrap();
        assert!(!indexes.contains(&("score".to_string(), SortDirection::Ascending)));
    }

    #[tokio::test]
    async fn test_double_create_fails_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let media = NoopMediaTooling;
        let clock = SystemClock;
        let uuids = UuidV4Generator;
        let engine = Engine::new(&storage, &media, &clock, &uuids, RuntimeConfig::default());

        engine.create().await.unwrap();
        let err = engine.create().await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists(_)));
    }
}
