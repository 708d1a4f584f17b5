//! Backend session transport contract.
//!
//! `SessionTransport` is implemented by whatever carries requests to the
//! storage backend (the WebSocket transport in this workspace, mocks in
//! tests). Implementations are responsible for turning every backend
//! failure into a [`BackendError`] envelope before it reaches the client.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reelup_protocol::envelope::BackendError;
use reelup_protocol::messages::{
    AbortUploadRequest, ChunkAck, ChunkUploadRequest, CompleteUploadRequest,
    CompleteUploadResponse, InitUploadRequest, InitUploadResponse, RecoverSessionRequest,
    RecoverSessionResponse, ValidateSessionRequest, ValidateSessionResponse,
};

/// Boxed future returned by transport operations.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Errors a transport can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The backend answered with an error envelope.
    #[error("backend error: {0}")]
    Backend(BackendError),

    /// No response: the connection failed or dropped.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered with something that could not be decoded.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("cancelled")]
    Cancelled,
}

/// Abstract connection to the storage backend.
///
/// Using a trait keeps upload logic decoupled from the wire and testable
/// with mocks.
pub trait SessionTransport: Send + Sync {
    /// Opens a new upload session.
    fn initialize(&self, request: InitUploadRequest) -> TransportFuture<'_, InitUploadResponse>;

    /// Sends one encoded part.
    fn upload_chunk(&self, request: ChunkUploadRequest) -> TransportFuture<'_, ChunkAck>;

    /// Finalizes the upload.
    fn complete_upload(
        &self,
        request: CompleteUploadRequest,
    ) -> TransportFuture<'_, CompleteUploadResponse>;

    /// Discards the session. Best-effort; callers bound it with a timeout.
    fn abort_upload(&self, request: AbortUploadRequest) -> TransportFuture<'_, ()>;

    fn validate_session(
        &self,
        request: ValidateSessionRequest,
    ) -> TransportFuture<'_, ValidateSessionResponse>;

    /// Replaces an expired session.
    fn recover_session(
        &self,
        request: RecoverSessionRequest,
    ) -> TransportFuture<'_, RecoverSessionResponse>;
}
