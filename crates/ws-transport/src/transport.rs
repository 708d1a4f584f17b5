//! [`SessionTransport`] over the WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{info, warn};

use reelup_client::{CredentialProvider, SessionTransport, TransportError, TransportFuture};
use reelup_protocol::constants::{MessageType, WS_CHUNK_REQUEST_TIMEOUT, WS_REQUEST_TIMEOUT};
use reelup_protocol::messages::{
    AbortUploadRequest, ChunkAck, ChunkUploadRequest, CompleteUploadRequest,
    CompleteUploadResponse, InitUploadRequest, InitUploadResponse, RecoverSessionRequest,
    RecoverSessionResponse, ValidateSessionRequest, ValidateSessionResponse,
};

use crate::client::{WsClient, WsError};

/// Session transport speaking the JSON envelope protocol over WebSocket.
///
/// The connection is opened on first use and reopened after it drops, so a
/// retried request after a network fault gets a fresh socket.
pub struct WsSessionTransport {
    url: String,
    credentials: Option<Arc<dyn CredentialProvider>>,
    client: Mutex<Option<Arc<WsClient>>>,
    request_timeout: Duration,
    chunk_timeout: Duration,
}

impl WsSessionTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: None,
            client: Mutex::new(None),
            request_timeout: WS_REQUEST_TIMEOUT,
            chunk_timeout: WS_CHUNK_REQUEST_TIMEOUT,
        }
    }

    /// Opens the connection now so an unreachable backend fails early.
    pub async fn connect(url: impl Into<String>) -> Result<Self, WsError> {
        let transport = Self::new(url);
        transport.client().await?;
        Ok(transport)
    }

    /// Sends the provider's current token with every request.
    pub fn with_credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    /// Overrides the control and chunk request timeouts.
    pub fn with_timeouts(mut self, request: Duration, chunk: Duration) -> Self {
        self.request_timeout = request;
        self.chunk_timeout = chunk;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Closes the current connection, if any.
    pub async fn close(&self) {
        if let Some(client) = self.client.lock().await.take() {
            client.close().await;
        }
    }

    async fn client(&self) -> Result<Arc<WsClient>, WsError> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref() {
            if !client.is_closed() {
                return Ok(Arc::clone(client));
            }
            warn!(url = %self.url, "connection lost, reconnecting");
        }
        let client = Arc::new(WsClient::connect(&self.url).await?);
        info!(url = %self.url, "connected to upload backend");
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }

    async fn call<Req, Resp>(
        &self,
        msg_type: MessageType,
        request: Req,
        timeout: Duration,
    ) -> Result<Resp, TransportError>
    where
        Req: Serialize + Send,
        Resp: DeserializeOwned,
    {
        let client = self.client().await?;
        let auth = self.credentials.as_ref().and_then(|c| c.token());
        Ok(client.request(msg_type, &request, auth, timeout).await?)
    }
}

impl SessionTransport for WsSessionTransport {
    fn initialize(&self, request: InitUploadRequest) -> TransportFuture<'_, InitUploadResponse> {
        Box::pin(self.call(MessageType::InitUpload, request, self.request_timeout))
    }

    fn upload_chunk(&self, request: ChunkUploadRequest) -> TransportFuture<'_, ChunkAck> {
        Box::pin(self.call(MessageType::UploadChunk, request, self.chunk_timeout))
    }

    fn complete_upload(
        &self,
        request: CompleteUploadRequest,
    ) -> TransportFuture<'_, CompleteUploadResponse> {
        Box::pin(self.call(MessageType::CompleteUpload, request, self.request_timeout))
    }

    fn abort_upload(&self, request: AbortUploadRequest) -> TransportFuture<'_, ()> {
        Box::pin(self.call(MessageType::AbortUpload, request, self.request_timeout))
    }

    fn validate_session(
        &self,
        request: ValidateSessionRequest,
    ) -> TransportFuture<'_, ValidateSessionResponse> {
        Box::pin(self.call(MessageType::ValidateSession, request, self.request_timeout))
    }

    fn recover_session(
        &self,
        request: RecoverSessionRequest,
    ) -> TransportFuture<'_, RecoverSessionResponse> {
        Box::pin(self.call(MessageType::RecoverSession, request, self.request_timeout))
    }
}
