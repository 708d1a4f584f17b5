//! WebSocket client with request/response correlation.
//!
//! Every request carries a fresh UUID in the envelope `id`; the read pump
//! hands the reply with the same id back to the waiting caller. Writes go
//! through one queue so concurrent requests never interleave frames.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use reelup_client::TransportError;
use reelup_protocol::constants::{MessageType, WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD};
use reelup_protocol::envelope::{BackendError, Message};

use crate::normalize::normalize_error;
use crate::pumps::read::PendingMap;

/// Errors from the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    Closed,

    #[error("backend error {0}")]
    Backend(BackendError),

    #[error("expected a {expected} reply, got {got}")]
    UnexpectedReply { expected: String, got: String },
}

impl From<WsError> for TransportError {
    fn from(e: WsError) -> Self {
        match e {
            WsError::Backend(err) => TransportError::Backend(err),
            WsError::Timeout(after) => TransportError::Timeout(after),
            WsError::Ws(_) | WsError::Closed => TransportError::Unreachable(e.to_string()),
            WsError::Json(_) | WsError::UnexpectedReply { .. } => {
                TransportError::MalformedResponse(e.to_string())
            }
        }
    }
}

/// One WebSocket connection to the upload backend.
pub struct WsClient {
    write_tx: mpsc::Sender<tungstenite::Message>,
    pending: PendingMap,
    /// Cancelled when the connection is closed by either side.
    cancel: CancellationToken,
    _read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
    _ping_handle: tokio::task::JoinHandle<()>,
}

impl WsClient {
    /// Opens a connection and starts the read, write and ping pumps.
    pub async fn connect(url: &str) -> Result<Self, WsError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let write_handle = tokio::spawn(crate::pumps::write::write_pump(
            write,
            write_rx,
            cancel.clone(),
        ));
        let read_handle = tokio::spawn(crate::pumps::read::read_pump(
            read,
            pending.clone(),
            write_tx.clone(),
            cancel.clone(),
        ));
        let ping_handle = tokio::spawn(crate::pumps::ping::ping_pump(
            write_tx.clone(),
            WS_PING_PERIOD,
            cancel.clone(),
        ));

        debug!(%url, "websocket connected");
        Ok(Self {
            write_tx,
            pending,
            cancel,
            _read_handle: read_handle,
            _write_handle: write_handle,
            _ping_handle: ping_handle,
        })
    }

    /// Whether the connection has gone away.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sends a request and waits up to `timeout` for its reply payload.
    pub async fn request<Req, Resp>(
        &self,
        msg_type: MessageType,
        payload: &Req,
        auth: Option<String>,
        timeout: Duration,
    ) -> Result<Resp, WsError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        if self.is_closed() {
            return Err(WsError::Closed);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let msg = Message::new(&id, msg_type.clone(), Some(payload))?.with_auth(auth);
        let json = serde_json::to_string(&msg)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        trace!(%id, ?msg_type, bytes = json.len(), "sending request");
        if self
            .write_tx
            .send(tungstenite::Message::Text(json.into()))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(WsError::Closed);
        }

        let result = tokio::time::timeout(timeout, rx).await;
        self.pending.lock().await.remove(&id);

        match result {
            Ok(Ok(reply)) => decode_reply(&msg_type, reply),
            Ok(Err(_)) => Err(WsError::Closed),
            Err(_) => Err(WsError::Timeout(timeout)),
        }
    }

    /// Closes the connection.
    pub async fn close(&self) {
        self.cancel.cancel();
        let _ = self.write_tx.send(tungstenite::Message::Close(None)).await;
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._read_handle.abort();
        self._write_handle.abort();
        self._ping_handle.abort();
    }
}

/// Turns a raw reply into the expected payload or a normalized error.
fn decode_reply<Resp: DeserializeOwned>(
    request: &MessageType,
    reply: Value,
) -> Result<Resp, WsError> {
    let reply_type = reply.get("type").cloned().unwrap_or(Value::Null);
    let is_error_type = reply_type.as_str() == Some("error");

    if let Some(err) = reply.get("error").filter(|e| !e.is_null()) {
        return Err(WsError::Backend(normalize_error(err)));
    }
    if is_error_type {
        let body = reply.get("payload").cloned().unwrap_or(Value::Null);
        return Err(WsError::Backend(normalize_error(&body)));
    }

    if let Some(expected) = request.response_type() {
        let got: Option<MessageType> = serde_json::from_value(reply_type.clone()).ok();
        if got.as_ref() != Some(&expected) {
            return Err(WsError::UnexpectedReply {
                expected: format!("{expected:?}"),
                got: reply_type.to_string(),
            });
        }
    }

    let payload = reply.get("payload").cloned().unwrap_or(Value::Null);
    Ok(serde_json::from_value(payload)?)
}
