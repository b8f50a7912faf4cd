//! Contracts for the engine's external collaborators (§6): the UUID
//! minter, the clock, the task queue that runs import jobs, and the
//! media-tooling validator/thumbnailer. The engine depends on these as
//! traits only — the CLI, the file scanner, and the media decoders that
//! satisfy them in a real deployment live outside this crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::EngineError;
use crate::util::ProgressCallback;

pub trait UuidGenerator: Send + Sync {
    fn generate(&self) -> Uuid;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UuidV4Generator;

impl UuidGenerator for UuidV4Generator {
    fn generate(&self) -> Uuid {
        Uuid::new_v4()
    }
}

pub trait TimestampProvider: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimestampProvider for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The externally-owned worker/task queue that executes import jobs
/// (§1 Non-goals: "the worker/task queue executing import jobs" is out of
/// scope; this is the seam the engine calls into).
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, description: String, progress: ProgressCallback) -> Result<(), EngineError>;
}

/// A task queue that runs jobs inline, for tests and single-process use.
#[derive(Debug, Default)]
pub struct ImmediateTaskQueue;

#[async_trait]
impl TaskQueue for ImmediateTaskQueue {
    async fn enqueue(
        &self,
        description: String,
        progress: ProgressCallback,
    ) -> Result<(), EngineError> {
        progress(description);
        Ok(())
    }
}

/// Media validation + derivative generation (§1 Non-goals: "media decoders
/// that produce thumbnails/display renditions and extract EXIF").
#[async_trait]
pub trait MediaTooling: Send + Sync {
    /// Reject bytes that aren't a supported media type.
    async fn validate(&self, bytes: &[u8]) -> Result<(), EngineError>;

    /// Produce a display-sized rendition.
    async fn derive_display(&self, bytes: &[u8]) -> Result<Vec<u8>, EngineError>;

    /// Produce a thumbnail rendition.
    async fn derive_thumb(&self, bytes: &[u8]) -> Result<Vec<u8>, EngineError>;
}

#[cfg(test)]
pub mod test_doubles {
    use super::*;

    /// Accepts everything and "derives" renditions by echoing a fixed
    /// marker, for tests that only care about the import pipeline's
    /// bookkeeping rather than real media processing.
    #[derive(Debug, Default)]
    pub struct NoopMediaTooling;

    #[async_trait]
    impl MediaTooling for NoopMediaTooling {
        async fn validate(&self, _bytes: &[u8]) -> Result<(), EngineError> {
            Ok(())
        }

        async fn derive_display(&self, _bytes: &[u8]) -> Result<Vec<u8>, EngineError> {
            Ok(b"display".to_vec())
        }

        async fn derive_thumb(&self, _bytes: &[u8]) -> Result<Vec<u8>, EngineError> {
            Ok(b"thumb".to_vec())
        }
    }
}
