//! The sync target contract.

use ensync_protocol::{
    ChangesResponse, GetChangesRequest, RecordCheckpointRequest, RecordCheckpointResponse,
    SendDocumentRequest, SendDocumentResponse, SyncInfo, SyncInfoRequest,
};

use crate::error::SyncResult;

/// The remote side of a sync round.
///
/// A target is an already-authenticated handle to one named replica; the
/// synchronizer never sees credentials. Every call must be safe to repeat:
/// a caller that lost a response retries without knowing whether the first
/// attempt took effect.
pub trait SyncTarget: Send + Sync {
    /// Reports the target's position and what it knows about the source.
    fn get_sync_info(&self, request: &SyncInfoRequest) -> SyncResult<SyncInfo>;

    /// Delivers every leaf of one document.
    fn send_document(&self, request: &SendDocumentRequest) -> SyncResult<SendDocumentResponse>;

    /// Returns documents changed on the target after `request.since`.
    fn get_changes(&self, request: &GetChangesRequest) -> SyncResult<ChangesResponse>;

    /// Records how far the target knows the source.
    fn record_checkpoint(
        &self,
        request: &RecordCheckpointRequest,
    ) -> SyncResult<RecordCheckpointResponse>;
}

impl<T: SyncTarget + ?Sized> SyncTarget for &T {
    fn get_sync_info(&self, request: &SyncInfoRequest) -> SyncResult<SyncInfo> {
        (**self).get_sync_info(request)
    }

    fn send_document(&self, request: &SendDocumentRequest) -> SyncResult<SendDocumentResponse> {
        (**self).send_document(request)
    }

    fn get_changes(&self, request: &GetChangesRequest) -> SyncResult<ChangesResponse> {
        (**self).get_changes(request)
    }

    fn record_checkpoint(
        &self,
        request: &RecordCheckpointRequest,
    ) -> SyncResult<RecordCheckpointResponse> {
        (**self).record_checkpoint(request)
    }
}
