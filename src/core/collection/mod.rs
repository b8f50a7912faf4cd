//! `Collection` (§4.4): owns a set of shards and their sort indices,
//! and keeps the shard → collection → database Merkle chain consistent on
//! every mutation. A collection's "shard set" (§3 "Collection") is not a
//! separately persisted list — it is exactly the key set of the
//! collection's own Merkle tree, so there is nothing to keep in sync
//! beyond that one file.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::constants::{BSON_DIR, COLLECTIONS_DIR, DB_HIDDEN_DIR};
use crate::core::doc_merkle::{self, DocTree};
use crate::core::shard::{self, shard_id_for_record};
use crate::core::sort_index::{BatchSortIndex, SortIndex};
use crate::error::EngineError;
use crate::model::{FieldValue, Record, Shard, SortDirection};
use crate::storage::Storage;
use crate::util::ProgressCallback;

pub fn database_tree_path() -> String {
    format!("{DB_HIDDEN_DIR}/{BSON_DIR}/tree.dat")
}

pub fn collection_tree_path(collection: &str) -> String {
    format!("{DB_HIDDEN_DIR}/{BSON_DIR}/{COLLECTIONS_DIR}/{collection}/tree.dat")
}

pub async fn load_database_tree(storage: &dyn Storage) -> Result<DocTree, EngineError> {
    doc_merkle::load(storage, &database_tree_path()).await
}

async fn save_database_tree(storage: &dyn Storage, tree: &DocTree) -> Result<(), EngineError> {
    doc_merkle::save(storage, &database_tree_path(), tree).await
}

pub async fn load_collection_tree(storage: &dyn Storage, collection: &str) -> Result<DocTree, EngineError> {
    doc_merkle::load(storage, &collection_tree_path(collection)).await
}

async fn save_collection_tree(storage: &dyn Storage, collection: &str, tree: &DocTree) -> Result<(), EngineError> {
    doc_merkle::save(storage, &collection_tree_path(collection), tree).await
}

pub async fn load_shard_tree(storage: &dyn Storage, collection: &str, shard_id: Uuid) -> Result<DocTree, EngineError> {
    doc_merkle::load(storage, &shard::shard_tree_path(collection, shard_id)).await
}

async fn save_shard_tree(
    storage: &dyn Storage,
    collection: &str,
    shard_id: Uuid,
    tree: &DocTree,
) -> Result<(), EngineError> {
    doc_merkle::save(storage, &shard::shard_tree_path(collection, shard_id), tree).await
}

/// Every collection name with at least one leaf in the database tree
/// (§4.4, §6).
pub async fn list_collections(storage: &dyn Storage) -> Result<Vec<String>, EngineError> {
    let tree = load_database_tree(storage).await?;
    Ok(tree.keys().cloned().collect())
}

/// Record IDs that differ (or exist only on one side) between two
/// replicas of the same collection, found by descending the tree-of-trees
/// level by level (§3 GLOSSARY "Tree-of-trees", §4.7, §4.8): collection
/// tree diff narrows to the differing shards, then each differing shard's
/// own tree narrows to the differing records.
#[derive(Debug, Clone, Default)]
pub struct RecordDiff {
    pub only_in_a: Vec<Uuid>,
    pub only_in_b: Vec<Uuid>,
}

pub async fn diff_records(a: &dyn Storage, b: &dyn Storage, collection: &str) -> Result<RecordDiff, EngineError> {
    let a_tree = load_collection_tree(a, collection).await?;
    let b_tree = load_collection_tree(b, collection).await?;
    let shard_diff = doc_merkle::diff(&a_tree, &b_tree);

    let mut shard_ids: Vec<String> = shard_diff
        .only_in_a
        .into_iter()
        .chain(shard_diff.only_in_b)
        .collect();
    shard_ids.sort();
    shard_ids.dedup();

    let mut only_in_a = Vec::new();
    let mut only_in_b = Vec::new();
    for shard_id_str in shard_ids {
        let shard_id = Uuid::parse_str(&shard_id_str)?;
        let a_shard_tree = load_shard_tree(a, collection, shard_id).await?;
        let b_shard_tree = load_shard_tree(b, collection, shard_id).await?;
        let rec_diff = doc_merkle::diff(&a_shard_tree, &b_shard_tree);
        for id in rec_diff.only_in_a {
            only_in_a.push(Uuid::parse_str(&id)?);
        }
        for id in rec_diff.only_in_b {
            only_in_b.push(Uuid::parse_str(&id)?);
        }
    }
    Ok(RecordDiff { only_in_a, only_in_b })
}

/// Collection names that differ (or exist only on one side) between two
/// replicas' database trees.
pub async fn diff_collection_names(
    a: &dyn Storage,
    b: &dyn Storage,
) -> Result<(Vec<String>, Vec<String>), EngineError> {
    let a_tree = load_database_tree(a).await?;
    let b_tree = load_database_tree(b).await?;
    let diff = doc_merkle::diff(&a_tree, &b_tree);
    Ok((diff.only_in_a, diff.only_in_b))
}

pub struct Collection<'s> {
    storage: &'s dyn Storage,
    name: String,
    config: RuntimeConfig,
}

impl<'s> Collection<'s> {
    pub fn new(storage: &'s dyn Storage, name: impl Into<String>, config: RuntimeConfig) -> Self {
        Self {
            storage,
            name: name.into(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn shard_id_for(&self, record_id: Uuid) -> Uuid {
        shard_id_for_record(&self.name, record_id, self.config.shard_bucket_count)
    }

    pub async fn shard_ids(&self) -> Result<Vec<Uuid>, EngineError> {
        let tree = load_collection_tree(self.storage, &self.name).await?;
        tree.keys()
            .map(|k| Uuid::parse_str(k).map_err(EngineError::from))
            .collect()
    }

    /// §4.4 `Collection.getOne`.
    pub async fn get_one(&self, id: Uuid) -> Result<Option<Record>, EngineError> {
        let shard_id = self.shard_id_for(id);
        match shard::load_shard(self.storage, &self.name, shard_id).await {
            Ok(s) => Ok(s.records.get(&id).cloned()),
            Err(EngineError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn load_or_new_shard(&self, shard_id: Uuid) -> Result<Shard, EngineError> {
        match shard::load_shard(self.storage, &self.name, shard_id).await {
            Ok(s) => Ok(s),
            Err(EngineError::NotFound(_)) => Ok(Shard::new(shard_id)),
            Err(e) => Err(e),
        }
    }

    /// §4.4 `updateOne`: load shard, merge fields (stamping each touched
    /// field's `_lastUpdated` with `at`), save shard, update sort indices
    /// whose fields changed, then recompute the shard → collection →
    /// database Merkle path.
    pub async fn update_one(
        &self,
        id: Uuid,
        updates: BTreeMap<String, FieldValue>,
        at: DateTime<Utc>,
    ) -> Result<Record, EngineError> {
        let shard_id = self.shard_id_for(id);
        let mut s = self.load_or_new_shard(shard_id).await?;

        let previous = s.records.get(&id).cloned();
        let mut record = previous.clone().unwrap_or_else(|| Record::new(id));
        let touched_fields: Vec<String> = updates.keys().cloned().collect();
        record.apply_updates(updates, at);
        record.check_invariant()?;
        s.records.insert(id, record.clone());

        shard::save_shard(self.storage, &self.name, &s).await?;
        self.update_indices_for_change(id, previous.as_ref(), Some(&record), &touched_fields)
            .await?;
        self.propagate_shard_change(shard_id, &s).await?;
        Ok(record)
    }

    /// §4.4 `setInternalRecord`: overwrite with caller-supplied timestamps
    /// exactly, used by sync and replicate so merged/foreign timestamps
    /// survive unchanged.
    pub async fn set_internal_record(&self, record: Record) -> Result<(), EngineError> {
        record.check_invariant()?;
        let shard_id = self.shard_id_for(record.id);
        let mut s = self.load_or_new_shard(shard_id).await?;
        let previous = s.records.get(&record.id).cloned();
        let touched_fields: Vec<String> = record.fields.keys().cloned().collect();
        s.records.insert(record.id, record.clone());

        shard::save_shard(self.storage, &self.name, &s).await?;
        self.update_indices_for_change(record.id, previous.as_ref(), Some(&record), &touched_fields)
            .await?;
        self.propagate_shard_change(shard_id, &s).await?;
        Ok(())
    }

    /// Remove a record entirely (used by replicate's prune step and
    /// repair). Deletes the owning shard once it becomes empty, per §3
    /// "Lifecycles".
    pub async fn delete_record(&self, id: Uuid) -> Result<(), EngineError> {
        let shard_id = self.shard_id_for(id);
        let mut s = match shard::load_shard(self.storage, &self.name, shard_id).await {
            Ok(s) => s,
            Err(EngineError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let Some(previous) = s.records.remove(&id) else {
            return Ok(());
        };
        let touched_fields: Vec<String> = previous.fields.keys().cloned().collect();

        if s.is_empty() {
            shard::delete_shard(self.storage, &self.name, shard_id).await?;
            self.update_indices_for_change(id, Some(&previous), None, &touched_fields)
                .await?;
            self.remove_shard(shard_id).await?;
        } else {
            shard::save_shard(self.storage, &self.name, &s).await?;
            self.update_indices_for_change(id, Some(&previous), None, &touched_fields)
                .await?;
            self.propagate_shard_change(shard_id, &s).await?;
        }
        Ok(())
    }

    /// Recompute a shard's own tree, then roll the change up through the
    /// collection tree into the database tree (§4.4 "propagate ... by
    /// recomputing the affected path").
    async fn propagate_shard_change(&self, shard_id: Uuid, shard: &Shard) -> Result<(), EngineError> {
        let mut shard_tree = DocTree::new();
        for (id, record) in &shard.records {
            shard_tree.set(id.to_string(), record.content_hash()?);
        }
        save_shard_tree(self.storage, &self.name, shard_id, &shard_tree).await?;

        let shard_root = shard_tree
            .root_hash()
            .unwrap_or_else(|| crate::model::MerkleHash::of(b""));
        let mut collection_tree = load_collection_tree(self.storage, &self.name).await?;
        collection_tree.set(shard_id.to_string(), shard_root);
        self.save_collection_tree_and_propagate(collection_tree).await
    }

    /// A shard emptied out and was deleted: drop its entry from the
    /// collection tree (§3 "Shards are ... deleted when empty").
    async fn remove_shard(&self, shard_id: Uuid) -> Result<(), EngineError> {
        let mut collection_tree = load_collection_tree(self.storage, &self.name).await?;
        collection_tree.remove(&shard_id.to_string());
        self.save_collection_tree_and_propagate(collection_tree).await
    }

    async fn save_collection_tree_and_propagate(&self, collection_tree: DocTree) -> Result<(), EngineError> {
        save_collection_tree(self.storage, &self.name, &collection_tree).await?;

        let mut db_tree = load_database_tree(self.storage).await?;
        match collection_tree.root_hash() {
            Some(root) => db_tree.set(self.name.clone(), root),
            None => {
                db_tree.remove(&self.name);
            }
        }
        save_database_tree(self.storage, &db_tree).await
    }

    async fn update_indices_for_change(
        &self,
        record_id: Uuid,
        previous: Option<&Record>,
        current: Option<&Record>,
        touched_fields: &[String],
    ) -> Result<(), EngineError> {
        for field in touched_fields {
            for direction in [SortDirection::Ascending, SortDirection::Descending] {
                let mut index = match SortIndex::load(
                    self.storage,
                    &self.name,
                    field,
                    direction,
                    self.config.sort_index_page_size,
                )
                .await
                {
                    Ok(index) => index,
                    Err(EngineError::NotFound(_)) => continue,
                    Err(e) => return Err(e),
                };

                let old_value = previous.and_then(|r| r.fields.get(field));
                let new_value = current.and_then(|r| r.fields.get(field));
                match (old_value, new_value) {
                    (Some(old), Some(new)) => {
                        index.update_record(record_id, old, new.clone()).await?;
                    }
                    (Some(old), None) => {
                        index.delete_record(record_id, old).await?;
                    }
                    (None, Some(new)) => {
                        index.add_record(record_id, new.clone()).await?;
                    }
                    (None, None) => {}
                }
            }
        }
        Ok(())
    }

    /// §4.3 `SortIndex.build`: stream every record currently in the
    /// collection and build the index from scratch.
    pub async fn ensure_sort_index(
        &self,
        field: &str,
        direction: SortDirection,
        progress: &ProgressCallback,
    ) -> Result<(), EngineError> {
        let values = self.collect_field_values(field).await?;
        SortIndex::build(
            self.storage,
            &self.name,
            field,
            direction,
            self.config.sort_index_page_size,
            values,
            progress,
        )
        .await?;
        Ok(())
    }

    pub async fn drop_sort_index(&self, field: &str, direction: SortDirection) -> Result<(), EngineError> {
        let index = SortIndex::load(
            self.storage,
            &self.name,
            field,
            direction,
            self.config.sort_index_page_size,
        )
        .await?;
        index.delete().await
    }

    async fn collect_field_values(&self, field: &str) -> Result<Vec<(Uuid, FieldValue)>, EngineError> {
        let mut out = Vec::new();
        for record in self.all_records().await? {
            if let Some(v) = record.fields.get(field) {
                out.push((record.id, v.clone()));
            }
        }
        Ok(out)
    }

    /// Stream every record in the collection across all its shards.
    pub async fn all_records(&self) -> Result<Vec<Record>, EngineError> {
        let mut out = Vec::new();
        for shard_id in self.shard_ids().await? {
            let s = shard::load_shard(self.storage, &self.name, shard_id).await?;
            out.extend(s.records.into_values());
        }
        Ok(out)
    }

    pub async fn count_records(&self) -> Result<usize, EngineError> {
        let mut total = 0;
        for shard_id in self.shard_ids().await? {
            let s = shard::load_shard(self.storage, &self.name, shard_id).await?;
            total += s.len();
        }
        Ok(total)
    }

    pub async fn root_hash(&self) -> Result<Option<crate::model::MerkleHash>, EngineError> {
        let tree = load_collection_tree(self.storage, &self.name).await?;
        Ok(tree.root_hash())
    }

    /// A batch-accumulating form of `update_indices_for_change`, used by
    /// replicate/sync so bulk record merges cost one index rebuild per
    /// field rather than one per record (§4.3 `BatchSortIndex`).
    pub async fn stage_batch_upsert(
        &self,
        batches: &mut BTreeMap<(String, SortDirection), BatchSortIndex>,
        record: &Record,
        touched_fields: &[String],
    ) {
        for field in touched_fields {
            if let Some(value) = record.fields.get(field) {
                for direction in [SortDirection::Ascending, SortDirection::Descending] {
                    let key = (field.clone(), direction);
                    if let std::collections::btree_map::Entry::Vacant(e) = batches.entry(key.clone()) {
                        if SortIndex::load(
                            self.storage,
                            &self.name,
                            field,
                            direction,
                            self.config.sort_index_page_size,
                        )
                        .await
                        .is_ok()
                        {
                            e.insert(BatchSortIndex::new(
                                field.clone(),
                                direction,
                                self.config.sort_index_batch_size,
                            ));
                        }
                    }
                    if let Some(batch) = batches.get_mut(&key) {
                        batch.stage_upsert(record.id, value.clone());
                    }
                }
            }
        }
    }

    pub async fn commit_batches(
        &self,
        batches: &mut BTreeMap<(String, SortDirection), BatchSortIndex>,
        progress: &ProgressCallback,
    ) -> Result<(), EngineError> {
        for batch in batches.values_mut() {
            batch
                .commit_changes(self.storage, &self.name, self.config.sort_index_page_size, progress)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use crate::util::noop_progress;

    #[tokio::test]
    async fn test_update_one_then_get_one_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let collection = Collection::new(&storage, "metadata", RuntimeConfig::default());

        let id = Uuid::new_v4();
        let now = Utc::now();
        let updates = BTreeMap::from([("description".to_string(), FieldValue::String("x".into()))]);
        collection.update_one(id, updates, now).await.unwrap();

        let fetched = collection.get_one(id).await.unwrap().unwrap();
        assert_eq!(fetched.fields["description"], FieldValue::String("x".into()));
        assert_eq!(fetched.last_updated["description"], now);
    }

    #[tokio::test]
    async fn test_update_one_propagates_merkle_roots() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let collection = Collection::new(&storage, "metadata", RuntimeConfig::default());

        let id = Uuid::new_v4();
        let updates = BTreeMap::from([("name".to_string(), FieldValue::String("a".into()))]);
        collection.update_one(id, updates, Utc::now()).await.unwrap();

        let collection_tree = load_collection_tree(&storage, "metadata").await.unwrap();
        assert!(collection_tree.root_hash().is_some());
        let db_tree = load_database_tree(&storage).await.unwrap();
        assert_eq!(db_tree.get("metadata"), collection_tree.root_hash());
    }

    #[tokio::test]
    async fn test_delete_record_removes_empty_shard_from_collection_tree() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let collection = Collection::new(&storage, "metadata", RuntimeConfig::default());

        let id = Uuid::new_v4();
        let updates = BTreeMap::from([("name".to_string(), FieldValue::String("a".into()))]);
        collection.update_one(id, updates, Utc::now()).await.unwrap();
        collection.delete_record(id).await.unwrap();

        assert!(collection.get_one(id).await.unwrap().is_none());
        let collection_tree = load_collection_tree(&storage, "metadata").await.unwrap();
        assert!(collection_tree.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_sort_index_then_range_query() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let collection = Collection::new(&storage, "metadata", RuntimeConfig::default());
        let progress = noop_progress();

        for score in [85, 72, 90, 65, 85] {
            let id = Uuid::new_v4();
            let updates = BTreeMap::from([("score".to_string(), FieldValue::Int(score))]);
            collection.update_one(id, updates, Utc::now()).await.unwrap();
        }

        collection
            .ensure_sort_index("score", SortDirection::Ascending, &progress)
            .await
            .unwrap();

        let index = SortIndex::load(
            &storage,
            "metadata",
            "score",
            SortDirection::Ascending,
            RuntimeConfig::default().sort_index_page_size,
        )
        .await
        .unwrap();
        let matches = index
            .find_by_range(Some(&FieldValue::Int(70)), Some(&FieldValue::Int(85)))
            .await
            .unwrap();
        assert_eq!(matches.len(), 3);
    }
}
