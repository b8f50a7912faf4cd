//! Bounded exponential backoff for `Transient` storage errors (§7
//! "retried up to N with exponential backoff").

use std::future::Future;
use std::time::Duration;

use crate::constants::DEFAULT_RETRY_BASE_DELAY_MS;
use crate::error::EngineError;

pub async fn with_retry<F, Fut, T>(max_attempts: u32, mut op: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < max_attempts => {
                let delay = DEFAULT_RETRY_BASE_DELAY_MS * 2u64.pow(attempt);
                log::debug!(
                    "retrying after transient error (attempt {}/{}): {}",
                    attempt + 1,
                    max_attempts,
                    err
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(5, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(EngineError::transient("not yet"))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let result: Result<(), EngineError> =
            with_retry(3, || async { Err(EngineError::transient("always")) }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_non_transient_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<(), EngineError> = with_retry(5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::not_found("gone")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
