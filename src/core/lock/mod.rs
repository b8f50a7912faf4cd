//! The write-lock protocol (§4.5): a JSON file at a known path holding
//! `{sessionId, acquiredAt}`. Coarse, cooperative mutual exclusion — not
//! an OS advisory lock — because it has to work identically across local
//! disk and object-storage backends that don't expose `flock`.

use chrono::Utc;
use uuid::Uuid;

use crate::constants::WRITE_LOCK_FILENAME;
use crate::error::EngineError;
use crate::model::WriteLockInfo;
use crate::ports::TimestampProvider;
use crate::storage::Storage;

fn lock_path() -> String {
    format!(".db/{WRITE_LOCK_FILENAME}")
}

/// A held write-lock. Dropping this without calling [`release`] leaves
/// the lock file in place for the next holder's staleness check to
/// reclaim — there is no `Drop`-based auto-release, since release must be
/// fallible (it talks to storage) and the caller must observe its result.
pub struct WriteLock {
    session_id: Uuid,
}

impl WriteLock {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}

/// Attempt to acquire the database's write-lock for `session_id`.
///
/// 1. If no lock file exists, write one and re-read it to verify no
///    concurrent writer raced us, succeeding only if the re-read value
///    still carries this session's ID.
/// 2. If a lock file exists and is stale (older than `T_stale`), take it
///    over the same way.
/// 3. Otherwise, fail with `LockHeld`.
pub async fn acquire(
    storage: &dyn Storage,
    session_id: Uuid,
    clock: &dyn TimestampProvider,
    stale_after: chrono::Duration,
) -> Result<WriteLock, EngineError> {
    let path = lock_path();

    if storage.file_exists(&path).await? {
        let current = read_lock(storage).await?;
        if !current.is_stale(clock.now(), stale_after) {
            return Err(EngineError::lock_held(format!(
                "write-lock held by session {}",
                current.session_id
            )));
        }
    }

    let info = WriteLockInfo::new(session_id, clock.now());
    write_lock(storage, &info).await?;

    // Re-read to verify we actually won the race against a concurrent
    // acquirer; on object storage a write-then-read is the only
    // compare-and-swap primitive the contract guarantees (§4.5).
    let observed = read_lock(storage).await?;
    if observed.session_id != session_id {
        return Err(EngineError::lock_held(format!(
            "lost the acquire race to session {}",
            observed.session_id
        )));
    }

    Ok(WriteLock { session_id })
}

/// Release the lock. A no-op if the lock file's session ID no longer
/// matches `lock`'s — another session has since taken it over.
pub async fn release(storage: &dyn Storage, lock: &WriteLock) -> Result<(), EngineError> {
    let path = lock_path();
    if !storage.file_exists(&path).await? {
        return Ok(());
    }
    let current = read_lock(storage).await?;
    if current.session_id == lock.session_id {
        storage.delete(&path).await?;
    }
    Ok(())
}

async fn read_lock(storage: &dyn Storage) -> Result<WriteLockInfo, EngineError> {
    let bytes = storage.read(&lock_path()).await?;
    serde_json::from_slice(&bytes).map_err(EngineError::from)
}

async fn write_lock(storage: &dyn Storage, info: &WriteLockInfo) -> Result<(), EngineError> {
    let bytes = serde_json::to_vec(info)?;
    storage.write(&lock_path(), &bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::SystemClock;
    use crate::storage::LocalStorage;

    #[tokio::test]
    async fn test_second_acquire_fails_while_first_holds() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let clock = SystemClock;
        let stale_after = chrono::Duration::seconds(300);

        let _lock_a = acquire(&storage, Uuid::new_v4(), &clock, stale_after)
            .await
            .unwrap();
        let result_b = acquire(&storage, Uuid::new_v4(), &clock, stale_after).await;
        assert!(matches!(result_b, Err(EngineError::LockHeld(_))));
    }

    #[tokio::test]
    async fn test_release_then_reacquire_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let clock = SystemClock;
        let stale_after = chrono::Duration::seconds(300);

        let lock_a = acquire(&storage, Uuid::new_v4(), &clock, stale_after)
            .await
            .unwrap();
        release(&storage, &lock_a).await.unwrap();

        let lock_b = acquire(&storage, Uuid::new_v4(), &clock, stale_after).await;
        assert!(lock_b.is_ok());
    }

    #[tokio::test]
    async fn test_stale_lock_can_be_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let clock = SystemClock;

        let _lock_a = acquire(&storage, Uuid::new_v4(), &clock, chrono::Duration::seconds(300))
            .await
            .unwrap();

        // A zero-second staleness threshold means any existing lock looks
        // stale immediately, simulating the passage of T_stale.
        let lock_b = acquire(&storage, Uuid::new_v4(), &clock, chrono::Duration::seconds(0)).await;
        assert!(lock_b.is_ok());
    }
}
