use std::future::Future;
use std::time::Duration;

use pve_config::RetryPolicy;
use pve_db::StoreError;

use crate::error::PatrolError;

/// Run a store write with exponential backoff.
///
/// Only [`StoreError::is_retryable`] failures are retried. The operation
/// must be idempotent.
pub(crate) async fn with_retry<F, Fut>(
    policy: &RetryPolicy,
    op: &'static str,
    mut f: F,
) -> Result<(), PatrolError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), StoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_ms(attempt);
                tracing::warn!(op, attempt, delay_ms = delay, error = %e, "store write failed, retrying");
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(op, attempt, error = %e, "store write failed");
                return Err(PatrolError::StorageFailure {
                    attempts: attempt,
                    source: e,
                });
            }
        }
    }
}
