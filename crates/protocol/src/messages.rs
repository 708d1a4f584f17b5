use serde::{Deserialize, Serialize};

use crate::types::{RecoveryInfo, SessionRef, UploadMetadata};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Opens a new upload session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub file_name: String,
    pub file_size: u64,
    pub content_type: String,
    pub chunk_size: u64,
    pub total_chunks: u32,
    #[serde(default)]
    pub metadata: UploadMetadata,
}

/// Carries one encoded chunk.
///
/// `chunk_data` is base64 text; the backend speaks JSON only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadRequest {
    pub session_ref: String,
    pub part_number: u32,
    pub chunk_data: String,
    pub original_size: u64,
    pub encoded_size: u64,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Finalizes an upload once every part has landed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub session_ref: String,
    pub video_id: String,
    pub total_chunks: u32,
    pub file_size: u64,
}

/// Asks the backend to discard a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortUploadRequest {
    pub session_ref: String,
    pub video_id: String,
}

/// Asks whether a session is still usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateSessionRequest {
    pub session_ref: String,
    pub video_id: String,
}

/// Re-establishes an expired session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverSessionRequest {
    pub expired_session_ref: String,
    pub previous_video_id: String,
    pub original_file_name: String,
    pub course_id: String,
    pub content_type: String,
    pub file_size: u64,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Session opened by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    pub session: SessionRef,
    /// Chunk size the backend wants instead of the proposed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
}

/// Acknowledges a stored chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    pub part_number: u32,
    pub received_size: u64,
    #[serde(default)]
    pub checksum_verified: bool,
}

/// Final asset identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResponse {
    pub video_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_url: Option<String>,
}

/// Session health as seen by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateSessionResponse {
    pub is_valid: bool,
    #[serde(default)]
    pub is_near_expiration: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_warning: Option<String>,
}

/// Replacement session and what changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverSessionResponse {
    pub new_session: SessionRef,
    pub recovery: RecoveryInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_request_field_names() {
        let req = ChunkUploadRequest {
            session_ref: "s1".into(),
            part_number: 2,
            chunk_data: "SGVsbG8=".into(),
            original_size: 5,
            encoded_size: 8,
            mime_type: "video/mp4".into(),
            checksum: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["sessionRef"], "s1");
        assert_eq!(json["partNumber"], 2);
        assert_eq!(json["chunkData"], "SGVsbG8=");
        assert_eq!(json["originalSize"], 5);
        assert_eq!(json["encodedSize"], 8);
        assert_eq!(json["mimeType"], "video/mp4");
        assert!(json.get("checksum").is_none());
    }

    #[test]
    fn init_response_without_chunk_size() {
        let resp: InitUploadResponse = serde_json::from_str(
            r#"{"session":{"sessionId":"s","videoId":"v"}}"#,
        )
        .unwrap();
        assert_eq!(resp.session.session_id, "s");
        assert!(resp.chunk_size.is_none());
    }

    #[test]
    fn init_request_defaults_metadata() {
        let req: InitUploadRequest = serde_json::from_str(
            r#"{"fileName":"a.mp4","fileSize":2048,"contentType":"video/mp4","chunkSize":1024,"totalChunks":2}"#,
        )
        .unwrap();
        assert_eq!(req.metadata, UploadMetadata::default());
    }

    #[test]
    fn validate_response_defaults() {
        let resp: ValidateSessionResponse = serde_json::from_str(r#"{"isValid":true}"#).unwrap();
        assert!(resp.is_valid);
        assert!(!resp.is_near_expiration);
        assert!(resp.expiration_warning.is_none());
    }

    #[test]
    fn recover_response_roundtrip() {
        let resp = RecoverSessionResponse {
            new_session: SessionRef {
                session_id: "s2".into(),
                video_id: "v2".into(),
                expires_at: None,
            },
            recovery: RecoveryInfo {
                previous_video_id: "v1".into(),
                new_video_id: "v2".into(),
                session_recovered: true,
                uploaded_parts: Some(vec![1, 2, 3]),
            },
        };
        let json = serde_json::to_string(&resp).unwrap();
        let parsed: RecoverSessionResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, resp);
    }
}
