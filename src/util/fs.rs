//! Wrapper around `tokio::fs` commands to make them easier to use and to
//! centralize the "write to a temp file then rename" atomicity pattern used
//! for shards and Merkle tree files (§4.4, §9 open question on atomic
//! replace: local filesystems support rename, object stores generally do
//! not — callers on a non-rename-capable `Storage` backend fall back to a
//! plain overwrite, which is documented as unsafe under concurrent readers).

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::error::EngineError;

pub async fn create_dir_all(path: impl AsRef<Path>) -> Result<(), EngineError> {
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

pub async fn remove_dir_all(path: impl AsRef<Path>) -> Result<(), EngineError> {
    let path = path.as_ref();
    if tokio::fs::try_exists(path).await? {
        tokio::fs::remove_dir_all(path).await?;
    }
    Ok(())
}

pub async fn read_to_string(path: impl AsRef<Path>) -> Result<String, EngineError> {
    Ok(tokio::fs::read_to_string(path).await?)
}

pub async fn read(path: impl AsRef<Path>) -> Result<Vec<u8>, EngineError> {
    Ok(tokio::fs::read(path).await?)
}

/// Write `data` to `path` by first writing to a sibling temp file and
/// renaming it into place. Rename is atomic on POSIX filesystems, so
/// concurrent readers never observe a half-written file.
pub async fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<(), EngineError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        create_dir_all(parent).await?;
    }

    let tmp_path = tmp_sibling(path);
    {
        let mut tmp = tokio::fs::File::create(&tmp_path).await?;
        tmp.write_all(data).await?;
        tmp.sync_all().await?;
    }
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp_name = format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4());
    path.with_file_name(tmp_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_atomic_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/data.bin");
        write_atomic(&path, b"hello").await.unwrap();
        assert_eq!(read(&path).await.unwrap(), b"hello");
    }
}
