//! On-disk representation of the write-lock (§4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteLockInfo {
    pub session_id: Uuid,
    pub acquired_at: DateTime<Utc>,
}

impl WriteLockInfo {
    pub fn new(session_id: Uuid, acquired_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            acquired_at,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
        now.signed_duration_since(self.acquired_at) > stale_after
    }
}
