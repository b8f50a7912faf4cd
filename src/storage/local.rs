//! Local-filesystem `Storage` backend, the default for a database rooted
//! on a single machine's disk. Grounded on the same directory-mapping
//! idiom as the teacher's local version store, generalized from a
//! content-hash-sharded layout to the engine's flat logical-path
//! namespace.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::error::EngineError;
use crate::storage::{join_segments, BlobInfo, Storage};
use crate::util;

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        join_segments(&self.root, path)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn write(&self, path: &str, data: &[u8]) -> Result<(), EngineError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            util::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, data).await?;
        Ok(())
    }

    async fn write_stream(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), EngineError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            util::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&full).await?;
        tokio::io::copy(reader, &mut file).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, EngineError> {
        let full = self.resolve(path);
        tokio::fs::read(&full)
            .await
            .map_err(|e| map_not_found(path, e))
    }

    async fn read_stream(
        &self,
        path: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, EngineError> {
        let full = self.resolve(path);
        let file = tokio::fs::File::open(&full)
            .await
            .map_err(|e| map_not_found(path, e))?;
        Ok(Box::new(file))
    }

    async fn info(&self, path: &str) -> Result<BlobInfo, EngineError> {
        let full = self.resolve(path);
        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|e| map_not_found(path, e))?;
        let last_modified: DateTime<Utc> = meta.modified()?.into();
        Ok(BlobInfo {
            path: path.to_string(),
            size: meta.len(),
            last_modified,
        })
    }

    async fn file_exists(&self, path: &str) -> Result<bool, EngineError> {
        let full = self.resolve(path);
        Ok(tokio::fs::try_exists(&full).await?)
    }

    async fn dir_exists(&self, path: &str) -> Result<bool, EngineError> {
        let full = self.resolve(path);
        match tokio::fs::metadata(&full).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), EngineError> {
        let full = self.resolve(path);
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, EngineError> {
        let full = self.resolve(prefix);
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&full).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let trimmed = prefix.trim_end_matches('/');
            if trimmed.is_empty() {
                out.push(name);
            } else {
                out.push(format!("{trimmed}/{name}"));
            }
        }
        out.sort();
        Ok(out)
    }

    async fn write_atomic(&self, path: &str, data: &[u8]) -> Result<(), EngineError> {
        util::fs::write_atomic(self.resolve(path), data).await
    }

    fn supports_atomic_replace(&self) -> bool {
        true
    }
}

fn map_not_found(path: &str, e: std::io::Error) -> EngineError {
    if e.kind() == std::io::ErrorKind::NotFound {
        EngineError::not_found(format!("no blob at {path}"))
    } else {
        EngineError::from(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.write("asset/abc", b"hello").await.unwrap();
        assert_eq!(storage.read("asset/abc").await.unwrap(), b"hello");
        assert!(storage.file_exists("asset/abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_non_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.write("shards/b.dat", b"1").await.unwrap();
        storage.write("shards/a.dat", b"2").await.unwrap();
        let listed = storage.list("shards").await.unwrap();
        assert_eq!(listed, vec!["shards/a.dat", "shards/b.dat"]);
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let err = storage.read("nope").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
