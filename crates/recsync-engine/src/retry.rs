//! Retry of remote calls on transient failures
//!
//! Rate limiting, zone-busy and service-unavailable errors are retried after
//! the server-supplied delay. A transient error without a delay hint, and
//! every other error, is returned to the caller.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use recsync_core::ports::RemoteError;

use crate::SyncError;

/// Runs `f` until it succeeds, fails terminally, or `cancel` fires
pub(crate) async fn with_retry<F, Fut, T>(
    operation: &str,
    cancel: &CancellationToken,
    mut f: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() => {
                let Some(delay) = err.retry_after() else {
                    warn!(operation, error = %err, "Transient error without retry hint, giving up");
                    return Err(err.into());
                };
                attempt += 1;
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient error, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
}
