//! Sync targets that misbehave on purpose.
//!
//! Wrap any [`SyncTarget`] to interrupt a round at a chosen point, the way a
//! dropped connection or a user pressing cancel would.

use ensync_protocol::{
    ChangesResponse, GetChangesRequest, RecordCheckpointRequest, RecordCheckpointResponse,
    SendDocumentRequest, SendDocumentResponse, SyncInfo, SyncInfoRequest,
};
use ensync_sync_engine::{CancelToken, SyncError, SyncResult, SyncTarget};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Where an [`InterruptingTarget`] strikes.
#[derive(Debug, Clone)]
pub enum Interruption {
    /// Cancel the token once this many change pages have been fetched.
    CancelAfterPages(usize, CancelToken),
    /// Fail every `send_document` after this many succeeded.
    DropAfterSends(usize),
    /// Fail every `get_changes` after this many succeeded.
    DropAfterPages(usize),
    /// Never interrupt.
    Never,
}

/// A target that interrupts rounds according to an [`Interruption`].
pub struct InterruptingTarget<T> {
    inner: T,
    interruption: Interruption,
    sends: AtomicUsize,
    pages: AtomicUsize,
}

impl<T: SyncTarget> InterruptingTarget<T> {
    /// Wraps `inner`.
    pub fn new(inner: T, interruption: Interruption) -> Self {
        Self {
            inner,
            interruption,
            sends: AtomicUsize::new(0),
            pages: AtomicUsize::new(0),
        }
    }

    /// Returns the wrapped target.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Documents successfully forwarded to the inner target.
    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    /// Change pages successfully fetched from the inner target.
    pub fn pages(&self) -> usize {
        self.pages.load(Ordering::SeqCst)
    }
}

fn dropped() -> SyncError {
    SyncError::transport_retryable("connection dropped")
}

impl<T: SyncTarget> SyncTarget for InterruptingTarget<T> {
    fn get_sync_info(&self, request: &SyncInfoRequest) -> SyncResult<SyncInfo> {
        self.inner.get_sync_info(request)
    }

    fn send_document(&self, request: &SendDocumentRequest) -> SyncResult<SendDocumentResponse> {
        if let Interruption::DropAfterSends(limit) = self.interruption {
            if self.sends() >= limit {
                return Err(dropped());
            }
        }
        let response = self.inner.send_document(request)?;
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(response)
    }

    fn get_changes(&self, request: &GetChangesRequest) -> SyncResult<ChangesResponse> {
        if let Interruption::DropAfterPages(limit) = self.interruption {
            if self.pages() >= limit {
                return Err(dropped());
            }
        }
        let response = self.inner.get_changes(request)?;
        let fetched = self.pages.fetch_add(1, Ordering::SeqCst) + 1;
        if let Interruption::CancelAfterPages(limit, token) = &self.interruption {
            if fetched >= *limit {
                token.cancel();
            }
        }
        Ok(response)
    }

    fn record_checkpoint(
        &self,
        request: &RecordCheckpointRequest,
    ) -> SyncResult<RecordCheckpointResponse> {
        self.inner.record_checkpoint(request)
    }
}
