use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time allowed to write a WebSocket message.
pub const WS_WRITE_WAIT: Duration = Duration::from_secs(30);

/// Time allowed to read the next message (pong or otherwise) from the peer.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// Send pings at this interval. Must be less than [`WS_PONG_WAIT`].
pub const WS_PING_PERIOD: Duration = Duration::from_secs(20);

/// Maximum message size in bytes.
///
/// A 50 MiB chunk grows by a third once base64-encoded, plus the envelope.
pub const WS_MAX_MESSAGE_SIZE: usize = 72 * 1024 * 1024;

/// Timeout for control requests (initialize, complete, validate, recover).
pub const WS_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for chunk uploads.
///
/// Chunk requests carry up to tens of megabytes of base64 text and may
/// take much longer than control requests on slow links.
pub const WS_CHUNK_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// WebSocket message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Requests from client to backend
    #[serde(rename = "init_upload")]
    InitUpload,
    #[serde(rename = "upload_chunk")]
    UploadChunk,
    #[serde(rename = "complete_upload")]
    CompleteUpload,
    #[serde(rename = "abort_upload")]
    AbortUpload,
    #[serde(rename = "validate_session")]
    ValidateSession,
    #[serde(rename = "recover_session")]
    RecoverSession,

    // Responses from backend to client
    #[serde(rename = "upload_init_response")]
    UploadInitResponse,
    #[serde(rename = "chunk_ack")]
    ChunkAck,
    #[serde(rename = "upload_complete_response")]
    UploadCompleteResponse,
    #[serde(rename = "abort_ack")]
    AbortAck,
    #[serde(rename = "session_status")]
    SessionStatus,
    #[serde(rename = "session_recovered")]
    SessionRecovered,

    // Errors
    #[serde(rename = "error")]
    Error,
}

impl MessageType {
    /// Returns the response type the backend answers a request with.
    ///
    /// `None` for types that are themselves responses.
    pub fn response_type(&self) -> Option<MessageType> {
        match self {
            MessageType::InitUpload => Some(MessageType::UploadInitResponse),
            MessageType::UploadChunk => Some(MessageType::ChunkAck),
            MessageType::CompleteUpload => Some(MessageType::UploadCompleteResponse),
            MessageType::AbortUpload => Some(MessageType::AbortAck),
            MessageType::ValidateSession => Some(MessageType::SessionStatus),
            MessageType::RecoverSession => Some(MessageType::SessionRecovered),
            _ => None,
        }
    }
}

// HTTP-equivalent status codes carried in error envelopes.
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_UNAUTHORIZED: u16 = 401;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_REQUEST_TIMEOUT: u16 = 408;
pub const STATUS_GONE: u16 = 410;
pub const STATUS_PAYLOAD_TOO_LARGE: u16 = 413;
pub const STATUS_UNSUPPORTED_MEDIA_TYPE: u16 = 415;
pub const STATUS_INTERNAL: u16 = 500;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_wire_names() {
        let json = serde_json::to_string(&MessageType::UploadChunk).unwrap();
        assert_eq!(json, "\"upload_chunk\"");
        let parsed: MessageType = serde_json::from_str("\"session_recovered\"").unwrap();
        assert_eq!(parsed, MessageType::SessionRecovered);
    }

    #[test]
    fn requests_map_to_responses() {
        assert_eq!(
            MessageType::InitUpload.response_type(),
            Some(MessageType::UploadInitResponse)
        );
        assert_eq!(
            MessageType::RecoverSession.response_type(),
            Some(MessageType::SessionRecovered)
        );
        assert_eq!(MessageType::ChunkAck.response_type(), None);
        assert_eq!(MessageType::Error.response_type(), None);
    }
}
