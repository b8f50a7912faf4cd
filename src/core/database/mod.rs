//! `Database` (§4.4): the top level of the tree-of-trees — named
//! collections rolled up into one database Merkle root. Most of the
//! bookkeeping this type exposes already lives in
//! [`crate::core::collection`] (the collection tree is the collection
//! set, and the database tree is built the same way one level up); this
//! module is the read-facing view over that same state.

use crate::config::RuntimeConfig;
use crate::core::collection::{self, Collection};
use crate::error::EngineError;
use crate::model::MerkleHash;
use crate::storage::Storage;

pub struct Database<'s> {
    storage: &'s dyn Storage,
    config: RuntimeConfig,
}

impl<'s> Database<'s> {
    pub fn new(storage: &'s dyn Storage, config: RuntimeConfig) -> Self {
        Self { storage, config }
    }

    pub fn collection(&self, name: &str) -> Collection<'s> {
        Collection::new(self.storage, name, self.config)
    }

    pub async fn list_collections(&self) -> Result<Vec<String>, EngineError> {
        collection::list_collections(self.storage).await
    }

    pub async fn root_hash(&self) -> Result<Option<MerkleHash>, EngineError> {
        let tree = collection::load_database_tree(self.storage).await?;
        Ok(tree.root_hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldValue;
    use crate::storage::LocalStorage;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_list_collections_reflects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let db = Database::new(&storage, RuntimeConfig::default());

        assert!(db.list_collections().await.unwrap().is_empty());

        let updates = BTreeMap::from([("name".to_string(), FieldValue::String("a".into()))]);
        db.collection("metadata")
            .update_one(Uuid::new_v4(), updates, Utc::now())
            .await
            .unwrap();

        assert_eq!(db.list_collections().await.unwrap(), vec!["metadata".to_string()]);
        assert!(db.root_hash().await.unwrap().is_some());
    }
}
