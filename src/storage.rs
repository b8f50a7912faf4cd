//! `Storage` — the engine's one abstraction over "somewhere to put
//! bytes" (§4.1): a flat path→blob namespace with put/get/stat/stream/
//! list. Concrete transport-level drivers (a real object-storage client,
//! a networked filesystem) are external collaborators; this module owns
//! only the contract plus the minimal local-disk implementation the rest
//! of the engine is built and tested against.

pub mod local;
pub mod object;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite};

pub use local::LocalStorage;
pub use object::ObjectStorage;

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq)]
pub struct BlobInfo {
    pub path: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Contract over a flat path→blob namespace (§4.1). Paths are `/`-separated
/// logical keys (`asset/<uuid>`, `collections/metadata/shards/<uuid>.dat`,
/// `.db/write.lock`) — not assumed to be filesystem paths by callers.
#[async_trait]
pub trait Storage: std::fmt::Debug + Send + Sync {
    /// Write `data` to `path`, replacing any existing blob.
    async fn write(&self, path: &str, data: &[u8]) -> Result<(), EngineError>;

    /// Stream-write to `path` without buffering the whole payload in memory.
    async fn write_stream(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), EngineError>;

    async fn read(&self, path: &str) -> Result<Vec<u8>, EngineError>;

    /// Open `path` for streaming reads.
    async fn read_stream(
        &self,
        path: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, EngineError>;

    async fn info(&self, path: &str) -> Result<BlobInfo, EngineError>;

    async fn file_exists(&self, path: &str) -> Result<bool, EngineError>;

    async fn dir_exists(&self, path: &str) -> Result<bool, EngineError>;

    async fn delete(&self, path: &str) -> Result<(), EngineError>;

    /// List blob paths immediately under `prefix` (non-recursive).
    async fn list(&self, prefix: &str) -> Result<Vec<String>, EngineError>;

    /// Write `data` to `path` via a temp-then-rename swap where the
    /// backend supports atomic rename, falling back to a plain overwrite
    /// otherwise (§9 open question on atomic replace). Callers that need
    /// atomicity guarantees must check [`Storage::supports_atomic_replace`].
    async fn write_atomic(&self, path: &str, data: &[u8]) -> Result<(), EngineError> {
        self.write(path, data).await
    }

    /// Whether `write_atomic` is actually atomic on this backend.
    fn supports_atomic_replace(&self) -> bool;
}

/// A destination path joined from storage-relative segments, for backends
/// (like [`LocalStorage`]) that map the namespace directly onto a
/// filesystem subtree.
pub fn join_segments(root: &std::path::Path, path: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push(segment);
    }
    out
}
