//! Caller-side retry of whole sync rounds.

use crate::cancel::CancelToken;
use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use tracing::warn;

/// Runs `round` until it succeeds, fails with a non-retryable error, or
/// the attempts run out.
///
/// A round that failed midway resumes from its last committed checkpoint on
/// the next attempt, so retrying is always safe. Sleeps between attempts
/// follow `config`'s backoff; the token is checked before each attempt.
pub fn retry_sync<T, F>(config: &RetryConfig, cancel: &CancelToken, mut round: F) -> SyncResult<T>
where
    F: FnMut() -> SyncResult<T>,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts.max(1) {
        if attempt > 0 {
            std::thread::sleep(config.delay_for_attempt(attempt));
        }
        cancel.check()?;

        match round() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < config.max_attempts => {
                warn!(attempt, error = %e, "sync round failed, retrying");
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| SyncError::Protocol("no sync attempts made".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Duration;

    fn fast(attempts: u32) -> RetryConfig {
        RetryConfig::new(attempts)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[test]
    fn retries_transient_failures() {
        let calls = Cell::new(0);
        let result = retry_sync(&fast(3), &CancelToken::new(), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(SyncError::transport_retryable("connection reset"))
            } else {
                Ok(calls.get())
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: SyncResult<()> = retry_sync(&fast(2), &CancelToken::new(), || {
            calls.set(calls.get() + 1);
            Err(SyncError::ServerError("overloaded".into()))
        });
        assert!(matches!(result, Err(SyncError::ServerError(_))));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: SyncResult<()> = retry_sync(&fast(5), &CancelToken::new(), || {
            calls.set(calls.get() + 1);
            Err(SyncError::AuthenticationFailed("bad token".into()))
        });
        assert!(matches!(result, Err(SyncError::AuthenticationFailed(_))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn cancellation_stops_retries() {
        let cancel = CancelToken::new();
        let calls = Cell::new(0);
        let result: SyncResult<()> = retry_sync(&fast(5), &cancel, || {
            calls.set(calls.get() + 1);
            cancel.cancel();
            Err(SyncError::transport_retryable("timeout"))
        });
        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(calls.get(), 1);
    }
}
