//! `.db/config.json` — the small persisted record of a database's
//! identity and replication history (§6 storage layout).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::storage::Storage;

const CONFIG_PATH: &str = ".db/config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub database_id: Uuid,
    /// The database this one was replicated from, if any.
    pub origin: Option<Uuid>,
    pub last_replicated_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_modified_at: Option<DateTime<Utc>>,
    /// Running count of successful imports (§4.6 `getDatabaseSummary`),
    /// persisted alongside the rest of the files tree's identity since the
    /// binary tree file's wire format (§6) carries no header fields beyond
    /// leaf count and root hash.
    #[serde(default)]
    pub files_imported: u64,
    /// Set on a replica created in `partial` mode (§4.7, GLOSSARY "Partial
    /// replica"): only thumbnails and root files are held locally.
    #[serde(default)]
    pub is_partial: Option<bool>,
}

impl DatabaseConfig {
    pub fn new(database_id: Uuid) -> Self {
        Self {
            database_id,
            origin: None,
            last_replicated_at: None,
            last_synced_at: None,
            last_modified_at: None,
            files_imported: 0,
            is_partial: None,
        }
    }

    pub fn touch_modified(&mut self, at: DateTime<Utc>) {
        self.last_modified_at = Some(at);
    }

    pub async fn load(storage: &dyn Storage) -> Result<Self, EngineError> {
        let bytes = storage.read(CONFIG_PATH).await?;
        serde_json::from_slice(&bytes).map_err(EngineError::from)
    }

    pub async fn save(&self, storage: &dyn Storage) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        storage.write_atomic(CONFIG_PATH, &bytes).await
    }

    pub async fn exists(storage: &dyn Storage) -> Result<bool, EngineError> {
        storage.file_exists(CONFIG_PATH).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;

    #[tokio::test]
    async fn test_save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let config = DatabaseConfig::new(Uuid::new_v4());
        config.save(&storage).await.unwrap();

        let loaded = DatabaseConfig::load(&storage).await.unwrap();
        assert_eq!(loaded.database_id, config.database_id);
    }
}
