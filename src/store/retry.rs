use std::future::Future;
use std::time::Duration;

use crate::config::StorageConfig;
use crate::error::{AppError, AppResult};

/// Bounded exponential backoff for transient storage failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &StorageConfig) -> Self {
        Self { attempts: cfg.retry_attempts.max(1), base_delay: Duration::from_millis(cfg.retry_backoff_ms) }
    }

    /// Delay before the given (1-based) retry.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << retry.saturating_sub(1).min(10))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, base_delay: Duration::from_millis(50) }
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the
/// attempt budget is spent. Only [`AppError::StorageUnavailable`] is retried.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < policy.attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(attempt, ?delay, "{} failed transiently, retrying: {}", what, e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Bounds an external call; elapsed or failed calls become `StorageUnavailable`.
pub async fn with_timeout<T, Fut>(limit: Duration, what: &str, fut: Fut) -> AppResult<T>
where
    Fut: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(AppError::StorageUnavailable(format!("{}: {}", what, e))),
        Err(_) => Err(AppError::StorageUnavailable(format!("{} timed out after {:?}", what, limit))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy { attempts: 3, base_delay: Duration::from_millis(1) }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = &AtomicU32::new(0);
        let out = with_retry(&fast(), "op", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AppError::StorageUnavailable("busy".into()))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_attempt_budget() {
        let calls = &AtomicU32::new(0);
        let res: AppResult<()> = with_retry(&fast(), "op", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::StorageUnavailable("down".into()))
        })
        .await;
        assert!(matches!(res, Err(AppError::StorageUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_validation_errors() {
        let calls = &AtomicU32::new(0);
        let res: AppResult<()> = with_retry(&fast(), "op", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::invalid("title", "must not be empty"))
        })
        .await;
        assert!(matches!(res, Err(AppError::Validation { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_maps_to_storage_unavailable() {
        let res: AppResult<()> = with_timeout(Duration::from_millis(10), "slow call", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        match res {
            Err(AppError::StorageUnavailable(msg)) => assert!(msg.contains("timed out")),
            other => panic!("expected StorageUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy { attempts: 5, base_delay: Duration::from_millis(10) };
        assert_eq!(p.delay_for(1), Duration::from_millis(10));
        assert_eq!(p.delay_for(2), Duration::from_millis(20));
        assert_eq!(p.delay_for(3), Duration::from_millis(40));
    }
}
