//! `MediaFileDatabase` (§4.6): the orchestrator tying storage, hashing,
//! the metadata collection, and the files Merkle tree together on
//! import. Thumbnail/display derivation and EXIF extraction are
//! delegated to the [`MediaTooling`](crate::ports::MediaTooling)
//! collaborator — this module owns only the bookkeeping around it.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::config::{DatabaseConfig, RuntimeConfig};
use crate::constants::{ASSET_DIR, DISPLAY_DIR, METADATA_COLLECTION, THUMB_DIR};
use crate::core::collection::Collection;
use crate::core::database::Database;
use crate::core::files;
use crate::core::hash_cache::HashCache;
use crate::core::shard::shard_id_for_record;
use crate::core::sort_index::SortIndex;
use crate::error::EngineError;
use crate::model::{FieldValue, FileLeaf, MerkleHash, SortDirection};
use crate::ports::{MediaTooling, TimestampProvider, UuidGenerator};
use crate::storage::Storage;
use crate::util::noop_progress;

/// A candidate file handed to `add_file` by the external scanner
/// collaborator (§1 Non-goals: the scanner itself is out of scope).
pub struct AddFileInput {
    pub path: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub size: u64,
    pub mtime_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddFileOutcome {
    Imported {
        record_id: Uuid,
        asset_id: Uuid,
        display_id: Uuid,
        thumb_id: Uuid,
    },
    Duplicate {
        record_id: Uuid,
    },
}

#[derive(Debug, Clone, Default)]
pub struct DatabaseSummary {
    pub total_imports: u64,
    pub total_files: u64,
    pub total_size: u64,
    pub per_collection_counts: BTreeMap<String, usize>,
}

pub struct MediaFileDatabase<'s> {
    storage: &'s dyn Storage,
    media: &'s dyn MediaTooling,
    clock: &'s dyn TimestampProvider,
    uuids: &'s dyn UuidGenerator,
    config: RuntimeConfig,
}

impl<'s> MediaFileDatabase<'s> {
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

    fn metadata_collection(&self) -> Collection<'s> {
        Collection::new(self.storage, METADATA_COLLECTION, self.config)
    }

    /// §4.6 `addFile`: hash (consulting `hash_cache`), dedup by hash,
    /// validate, derive display/thumb, write all three blobs plus the
    /// metadata record, and roll the four new leaves into the files tree.
    pub async fn add_file(
        &self,
        input: AddFileInput,
        hash_cache: &mut HashCache,
    ) -> Result<AddFileOutcome, EngineError> {
        let hash = match hash_cache.get(&input.path, input.size, input.mtime_ms) {
            Some(h) => h,
            None => {
                let h = MerkleHash::of(&input.bytes);
                hash_cache.insert(input.path.clone(), input.size, input.mtime_ms, h);
                h
            }
        };

        let metadata = self.metadata_collection();
        self.ensure_hash_index(&metadata).await?;
        if let Some(existing_id) = self.find_duplicate(&hash).await? {
            return Ok(AddFileOutcome::Duplicate {
                record_id: existing_id,
            });
        }

        self.media.validate(&input.bytes).await?;
        let display_bytes = self.media.derive_display(&input.bytes).await?;
        let thumb_bytes = self.media.derive_thumb(&input.bytes).await?;

        let asset_id = self.uuids.generate();
        let display_id = self.uuids.generate();
        let thumb_id = self.uuids.generate();
        let record_id = self.uuids.generate();

        let asset_path = format!("{ASSET_DIR}/{asset_id}");
        let display_path = format!("{DISPLAY_DIR}/{display_id}");
        let thumb_path = format!("{THUMB_DIR}/{thumb_id}");

        self.storage.write(&asset_path, &input.bytes).await?;
        self.storage.write(&display_path, &display_bytes).await?;
        self.storage.write(&thumb_path, &thumb_bytes).await?;

        let now = self.clock.now();
        let mut updates = BTreeMap::new();
        updates.insert("path".to_string(), FieldValue::String(input.path.clone()));
        updates.insert("hash".to_string(), FieldValue::String(hash.to_hex()));
        updates.insert(
            "contentType".to_string(),
            FieldValue::String(input.content_type.clone()),
        );
        updates.insert("assetId".to_string(), FieldValue::String(asset_id.to_string()));
        updates.insert("displayId".to_string(), FieldValue::String(display_id.to_string()));
        updates.insert("thumbId".to_string(), FieldValue::String(thumb_id.to_string()));
        updates.insert("size".to_string(), FieldValue::Int(input.size as i64));
        metadata.update_one(record_id, updates, now).await?;

        let shard_id = shard_id_for_record(METADATA_COLLECTION, record_id, self.config.shard_bucket_count);
        let shard_path = crate::core::shard::shard_path(METADATA_COLLECTION, shard_id);
        let shard_bytes = self.storage.read(&shard_path).await?;
        let shard_hash = MerkleHash::of(&shard_bytes);

        let mut files_tree = files::load_files_tree(self.storage).await?;
        files_tree.upsert_item(FileLeaf {
            name: asset_path,
            content_hash: hash,
            size: input.size,
            last_modified: now,
        });
        files_tree.upsert_item(FileLeaf {
            name: display_path,
            content_hash: MerkleHash::of(&display_bytes),
            size: display_bytes.len() as u64,
            last_modified: now,
        });
        files_tree.upsert_item(FileLeaf {
            name: thumb_path,
            content_hash: MerkleHash::of(&thumb_bytes),
            size: thumb_bytes.len() as u64,
            last_modified: now,
        });
        files_tree.upsert_item(FileLeaf {
            name: shard_path,
            content_hash: shard_hash,
            size: shard_bytes.len() as u64,
            last_modified: now,
        });
        files::save_files_tree(self.storage, &mut files_tree).await?;

        let mut config = DatabaseConfig::load(self.storage).await?;
        config.files_imported += 1;
        config.touch_modified(now);
        config.save(self.storage).await?;

        Ok(AddFileOutcome::Imported {
            record_id,
            asset_id,
            display_id,
            thumb_id,
        })
    }

    async fn ensure_hash_index(&self, metadata: &Collection<'s>) -> Result<(), EngineError> {
        match SortIndex::load(
            self.storage,
            METADATA_COLLECTION,
            "hash",
            SortDirection::Ascending,
            self.config.sort_index_page_size,
        )
        .await
        {
            Ok(_) => Ok(()),
            Err(EngineError::NotFound(_)) => {
                metadata
                    .ensure_sort_index("hash", SortDirection::Ascending, &noop_progress())
                    .await
            }
            Err(e) => Err(e),
        }
    }

    async fn find_duplicate(&self, hash: &MerkleHash) -> Result<Option<Uuid>, EngineError> {
        let index = SortIndex::load(
            self.storage,
            METADATA_COLLECTION,
            "hash",
            SortDirection::Ascending,
            self.config.sort_index_page_size,
        )
        .await?;
        let matches = index.find_by_value(&FieldValue::String(hash.to_hex())).await?;
        Ok(matches.into_iter().next())
    }

    /// §4.6 `getDatabaseSummary`, extended (SPEC_FULL §3) with
    /// per-collection record counts since a database may host more than
    /// just `metadata`.
    pub async fn get_database_summary(&self) -> Result<DatabaseSummary, EngineError> {
        let config = DatabaseConfig::load(self.storage).await?;
        let files_tree = files::load_files_tree(self.storage).await?;
        let total_size: u64 = files_tree.iter_leaves().map(|l| l.size).sum();

        let database = Database::new(self.storage, self.config);
        let mut per_collection_counts = BTreeMap::new();
        for name in database.list_collections().await? {
            let count = database.collection(&name).count_records().await?;
            per_collection_counts.insert(name, count);
        }

        log::debug!(
            "database summary: {} files, {}",
            files_tree.len(),
            bytesize::ByteSize(total_size)
        );

        Ok(DatabaseSummary {
            total_imports: config.files_imported,
            total_files: files_tree.len() as u64,
            total_size,
            per_collection_counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::files::create_database;
    use crate::ports::test_doubles::NoopMediaTooling;
    use crate::ports::{SystemClock, UuidV4Generator};
    use crate::storage::LocalStorage;

    #[tokio::test]
    async fn test_add_file_twice_with_same_bytes_is_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let uuids = UuidV4Generator;
        create_database(&storage, &uuids).await.unwrap();

        let media = NoopMediaTooling;
        let clock = SystemClock;
        let db = MediaFileDatabase::new(&storage, &media, &clock, &uuids, RuntimeConfig::default());
        let mut cache = HashCache::new(16);

        let first = db
            .add_file(
                AddFileInput {
                    path: "img1.png".into(),
                    content_type: "image/png".into(),
                    bytes: b"pngbytes".to_vec(),
                    size: 8,
                    mtime_ms: 1,
                },
                &mut cache,
            )
            .await
            .unwrap();
        assert!(matches!(first, AddFileOutcome::Imported { .. }));

        let second = db
            .add_file(
                AddFileInput {
                    path: "img1-copy.png".into(),
                    content_type: "image/png".into(),
                    bytes: b"pngbytes".to_vec(),
                    size: 8,
                    mtime_ms: 2,
                },
                &mut cache,
            )
            .await
            .unwrap();
        assert!(matches!(second, AddFileOutcome::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_import_two_files_has_six_leaves_and_one_shard() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let uuids = UuidV4Generator;
        create_database(&storage, &uuids).await.unwrap();

        let media = NoopMediaTooling;
        let clock = SystemClock;
        let db = MediaFileDatabase::new(&storage, &media, &clock, &uuids, RuntimeConfig::default());
        let mut cache = HashCache::new(16);

        for i in 0..2 {
            db.add_file(
                AddFileInput {
                    path: format!("img{i}.png"),
                    content_type: "image/png".into(),
                    bytes: format!("png-{i}").into_bytes(),
                    size: 5,
                    mtime_ms: i,
                },
                &mut cache,
            )
            .await
            .unwrap();
        }

        let summary = db.get_database_summary().await.unwrap();
        assert_eq!(summary.total_imports, 2);
        assert_eq!(summary.per_collection_counts.get("metadata"), Some(&2));

        let files_tree = files::load_files_tree(&storage).await.unwrap();
        // 2 asset + 2 display + 2 thumb + however many distinct shard files
        // (likely one, since two records land in the same shard bucket).
        assert!(files_tree.len() >= 6);
    }
}
