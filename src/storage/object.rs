//! Stub object-storage backend. A production driver for a specific
//! object store is a transport-level concern and an external
//! collaborator; this type exists so the engine compiles and links
//! against a second `Storage` implementation and so tests can assert on
//! the "no atomic rename" code path, without the engine depending on any
//! particular object-storage SDK.

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::EngineError;
use crate::storage::{BlobInfo, Storage};

#[derive(Debug, Clone)]
pub struct ObjectStorage {
    pub bucket: String,
    pub prefix: String,
}

impl ObjectStorage {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    fn unimplemented(&self, op: &str) -> EngineError {
        EngineError::fatal(format!(
            "object storage driver for bucket {:?} does not implement {op}; \
             a concrete client must be supplied by the caller",
            self.bucket
        ))
    }
}

#[async_trait]
impl Storage for ObjectStorage {
    async fn write(&self, _path: &str, _data: &[u8]) -> Result<(), EngineError> {
        Err(self.unimplemented("write"))
    }

    async fn write_stream(
        &self,
        _path: &str,
        _reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), EngineError> {
        Err(self.unimplemented("write_stream"))
    }

    async fn read(&self, _path: &str) -> Result<Vec<u8>, EngineError> {
        Err(self.unimplemented("read"))
    }

    async fn read_stream(
        &self,
        _path: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, EngineError> {
        Err(self.unimplemented("read_stream"))
    }

    async fn info(&self, _path: &str) -> Result<BlobInfo, EngineError> {
        Err(self.unimplemented("info"))
    }

    async fn file_exists(&self, _path: &str) -> Result<bool, EngineError> {
        Err(self.unimplemented("file_exists"))
    }

    async fn dir_exists(&self, _path: &str) -> Result<bool, EngineError> {
        Err(self.unimplemented("dir_exists"))
    }

    async fn delete(&self, _path: &str) -> Result<(), EngineError> {
        Err(self.unimplemented("delete"))
    }

    async fn list(&self, _prefix: &str) -> Result<Vec<String>, EngineError> {
        Err(self.unimplemented("list"))
    }

    /// Most object stores lack an atomic rename primitive, so atomic
    /// replacement degrades to an overwrite (§9 open question).
    fn supports_atomic_replace(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unimplemented_ops_report_fatal() {
        let storage = ObjectStorage::new("my-bucket", "prefix");
        let err = storage.read("asset/abc").await.unwrap_err();
        assert!(matches!(err, EngineError::Fatal(_)));
        assert!(!storage.supports_atomic_replace());
    }
}
