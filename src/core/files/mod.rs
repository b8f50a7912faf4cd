//! Persistence of the files Merkle tree and database identity (§3 "File
//! MerkleTree", §6 `.db/files.dat` + `.db/config.json`). A database is
//! created by writing a fresh identity and an empty files tree (§3
//! "Lifecycles").

use crate::config::DatabaseConfig;
use crate::constants::{DB_HIDDEN_DIR, FILES_TREE_FILENAME};
use crate::core::merkle::{self, FileTree};
use crate::error::EngineError;
use crate::ports::UuidGenerator;
use crate::storage::Storage;

pub fn files_tree_path() -> String {
    format!("{DB_HIDDEN_DIR}/{FILES_TREE_FILENAME}")
}

pub async fn load_files_tree(storage: &dyn Storage) -> Result<FileTree, EngineError> {
    let path = files_tree_path();
    if !storage.file_exists(&path).await? {
        return Ok(FileTree::new());
    }
    let bytes = storage.read(&path).await?;
    merkle::decode(&bytes)
}

/// Persist `tree` and mark it clean (§3 "dirty" invariant).
pub async fn save_files_tree(storage: &dyn Storage, tree: &mut FileTree) -> Result<(), EngineError> {
    let bytes = merkle::encode(tree)?;
    storage.write_atomic(&files_tree_path(), &bytes).await?;
    tree.mark_clean();
    Ok(())
}

/// Initialize a brand-new, empty database at `storage`'s root: a fresh
/// identity in `.db/config.json` and an empty files tree. Fails with
/// `AlreadyExists` if a config is already present.
pub async fn create_database(
    storage: &dyn Storage,
    uuids: &dyn UuidGenerator,
) -> Result<DatabaseConfig, EngineError> {
    if DatabaseConfig::exists(storage).await? {
        return Err(EngineError::already_exists(
            "a database is already initialized at this storage root",
        ));
    }
    let config = DatabaseConfig::new(uuids.generate());
    config.save(storage).await?;
    let mut tree = FileTree::new();
    save_files_tree(storage, &mut tree).await?;
    Ok(config)
}

/// Open an already-initialized database, failing with `NotFound` if no
/// config has been written yet.
pub async fn open_database(storage: &dyn Storage) -> Result<DatabaseConfig, EngineError> {
    if !DatabaseConfig::exists(storage).await? {
        return Err(EngineError::not_found(
            "no database initialized at this storage root",
        ));
    }
    DatabaseConfig::load(storage).await
}

/// Open the database at `storage`, creating it with `database_id` if
/// absent — the "load or create destination files Merkle with the same
/// database ID" step of replicate (§4.7).
pub async fn open_or_create_with_id(
    storage: &dyn Storage,
    database_id: uuid::Uuid,
    force: bool,
) -> Result<DatabaseConfig, EngineError> {
    if DatabaseConfig::exists(storage).await? {
        let existing = DatabaseConfig::load(storage).await?;
        if existing.database_id != database_id && !force {
            return Err(EngineError::fatal(format!(
                "destination database identity {} does not match source {}; pass force to override",
                existing.database_id, database_id
            )));
        }
        return Ok(existing);
    }
    let config = DatabaseConfig::new(database_id);
    config.save(storage).await?;
    let mut tree = FileTree::new();
    save_files_tree(storage, &mut tree).await?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::UuidV4Generator;
    use crate::storage::LocalStorage;

    #[tokio::test]
    async fn test_create_then_open_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let uuids = UuidV4Generator;

        let created = create_database(&storage, &uuids).await.unwrap();
        let opened = open_database(&storage).await.unwrap();
        assert_eq!(created.database_id, opened.database_id);

        let tree = load_files_tree(&storage).await.unwrap();
        assert!(tree.is_empty());
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let uuids = UuidV4Generator;

        create_database(&storage, &uuids).await.unwrap();
        let err = create_database(&storage, &uuids).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_open_or_create_with_mismatched_id_requires_force() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let uuids = UuidV4Generator;
        create_database(&storage, &uuids).await.unwrap();

        let other_id = uuid::Uuid::new_v4();
        let err = open_or_create_with_id(&storage, other_id, false).await.unwrap_err();
        assert!(matches!(err, EngineError::Fatal(_)));

        let ok = open_or_create_with_id(&storage, other_id, true).await;
        assert!(ok.is_ok());
    }
}
