//! Cooperative cancellation for sync rounds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{SyncError, SyncResult};

/// Cancellation signal passed into a sync round.
///
/// The round checks the token between documents, never inside one, so a
/// cancelled round stops at the boundary of the last fully applied change.
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// Creates a token that is never cancelled unless [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that also expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Signals cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancelled or past the deadline.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Returns `Err(SyncError::Cancelled)` if the token is cancelled.
    pub fn check(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());

        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(SyncError::Cancelled)));
    }

    #[test]
    fn deadline_expires() {
        let token = CancelToken::with_timeout(Duration::ZERO);
        assert!(token.is_cancelled());

        let token = CancelToken::with_timeout(Duration::from_secs(3600));
        assert!(!token.is_cancelled());
    }
}
