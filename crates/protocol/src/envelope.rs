use serde::{Deserialize, Serialize};

use crate::constants::MessageType;

/// Normalized error body reported by the storage backend.
///
/// Backends report failures in many shapes (status codes, nested error
/// objects, plain text). Transports convert whatever they receive into this
/// one envelope before anything else looks at it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendError {
    /// HTTP-equivalent status code (0 when the backend gave none).
    #[serde(default)]
    pub status: u16,
    /// Machine-readable error code, e.g. `NoSuchUpload`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    /// Request fields the backend reported as missing or invalid.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<String>,
    /// Free-form detail text (raw body excerpts, parser output).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl BackendError {
    /// Creates an error with a status and message.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            ..Default::default()
        }
    }

    /// Sets the machine-readable code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Sets the missing field list.
    pub fn with_missing_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.missing_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the detail text.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Message, code and details joined and lowercased for marker matching.
    pub fn searchable_text(&self) -> String {
        let mut text = self.message.to_lowercase();
        if let Some(code) = &self.code {
            text.push(' ');
            text.push_str(&code.to_lowercase());
        }
        if let Some(details) = &self.details {
            text.push(' ');
            text.push_str(&details.to_lowercase());
        }
        text
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} {}: {}", self.status, code, self.message),
            None => write!(f, "{}: {}", self.status, self.message),
        }
    }
}

/// Envelope for all WebSocket communication.
///
/// The `payload` field uses `serde_json::value::RawValue` to defer
/// deserialization until the caller knows which type to expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<serde_json::value::RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BackendError>,
    /// Bearer credential supplied by the caller's credential provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
}

impl Message {
    /// Creates a new message with the given type and payload.
    pub fn new<T: Serialize>(
        id: impl Into<String>,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let raw = match payload {
            Some(p) => {
                let json = serde_json::to_string(p)?;
                Some(serde_json::value::RawValue::from_string(json)?)
            }
            None => None,
        };
        Ok(Self {
            id: id.into(),
            msg_type,
            payload: raw,
            error: None,
            auth: None,
        })
    }

    /// Attaches a bearer credential.
    pub fn with_auth(mut self, token: Option<String>) -> Self {
        self.auth = token;
        self
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        match &self.payload {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }

    /// Creates an error message.
    pub fn error(id: impl Into<String>, error: BackendError) -> Self {
        Self {
            id: id.into(),
            msg_type: MessageType::Error,
            payload: None,
            error: Some(error),
            auth: None,
        }
    }

    /// Creates a response message for this request.
    pub fn reply<T: Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Message::new(&self.id, msg_type, payload)
    }

    /// Creates an error response for this request.
    pub fn reply_error(&self, error: BackendError) -> Self {
        Message::error(&self.id, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ChunkAck;

    #[test]
    fn message_new_with_payload() {
        let payload = serde_json::json!({"key": "value"});
        let msg = Message::new("msg-1", MessageType::ValidateSession, Some(&payload)).unwrap();
        assert_eq!(msg.id, "msg-1");
        assert_eq!(msg.msg_type, MessageType::ValidateSession);
        assert!(msg.payload.is_some());
        assert!(msg.error.is_none());
    }

    #[test]
    fn message_error_creation() {
        let msg = Message::error(
            "msg-3",
            BackendError::new(404, "upload not found").with_code("NoSuchUpload"),
        );
        assert_eq!(msg.msg_type, MessageType::Error);
        let err = msg.error.unwrap();
        assert_eq!(err.status, 404);
        assert_eq!(err.code.as_deref(), Some("NoSuchUpload"));
    }

    #[test]
    fn message_parse_payload() {
        let ack = ChunkAck {
            part_number: 3,
            received_size: 1024,
            checksum_verified: true,
        };
        let msg = Message::new("m1", MessageType::ChunkAck, Some(&ack)).unwrap();
        let parsed: Option<ChunkAck> = msg.parse_payload().unwrap();
        assert_eq!(parsed.unwrap(), ack);
    }

    #[test]
    fn message_omits_null_fields() {
        let msg = Message::new::<()>("m1", MessageType::AbortUpload, None).unwrap();
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("payload"));
        assert!(!json.contains("error"));
        assert!(!json.contains("auth"));
    }

    #[test]
    fn auth_is_serialized_when_present() {
        let msg = Message::new::<()>("m1", MessageType::AbortUpload, None)
            .unwrap()
            .with_auth(Some("tok".into()));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"auth\":\"tok\""));
    }

    #[test]
    fn reply_error_preserves_id() {
        let original = Message::new::<()>("req-99", MessageType::CompleteUpload, None).unwrap();
        let reply = original.reply_error(BackendError::new(500, "boom"));
        assert_eq!(reply.id, "req-99");
        assert_eq!(reply.msg_type, MessageType::Error);
    }

    #[test]
    fn backend_error_tolerates_sparse_json() {
        let err: BackendError = serde_json::from_str(r#"{"message":"nope"}"#).unwrap();
        assert_eq!(err.status, 0);
        assert!(err.code.is_none());
        assert!(err.missing_fields.is_empty());
    }

    #[test]
    fn searchable_text_joins_fields() {
        let err = BackendError::new(400, "Unexpected token")
            .with_code("BAD_BODY")
            .with_details("------WebKitFormBoundary");
        let text = err.searchable_text();
        assert!(text.contains("unexpected token"));
        assert!(text.contains("bad_body"));
        assert!(text.contains("webkitformboundary"));
    }

    #[test]
    fn backend_error_display() {
        let err = BackendError::new(413, "too big").with_code("EntityTooLarge");
        assert_eq!(err.to_string(), "413 EntityTooLarge: too big");
        assert_eq!(BackendError::new(500, "x").to_string(), "500: x");
    }
}
