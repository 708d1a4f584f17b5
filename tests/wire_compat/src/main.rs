fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use reelup_client::UploadConfig;
    use reelup_protocol::messages::{
        ChunkAck, ChunkUploadRequest, CompleteUploadRequest, CompleteUploadResponse,
        InitUploadRequest, InitUploadResponse, RecoverSessionRequest, RecoverSessionResponse,
        ValidateSessionResponse,
    };
    use reelup_protocol::{Message, MessageType};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Normalizes JSON values so that integer-valued floats compare equal.
    ///
    /// Backends written in JavaScript emit `65` where Rust may emit `65.0`.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    serde_json::json!(f)
                } else {
                    v.clone()
                }
            }
            serde_json::Value::Object(map) => {
                let normalized: serde_json::Map<String, serde_json::Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect();
                serde_json::Value::Object(normalized)
            }
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent, float-normalized comparison).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}:\n  wire: {fixture}\n  Rust: {reserialized}"
        );
        parsed
    }

    // --- Envelope ---

    #[test]
    fn fixture_message_envelope() {
        let msg = roundtrip_test::<Message>("message_envelope.json");
        assert_eq!(msg.msg_type, MessageType::UploadChunk);
        assert!(msg.auth.is_some());
        let chunk: ChunkUploadRequest = msg.parse_payload().unwrap().unwrap();
        assert_eq!(chunk.part_number, 4);
    }

    #[test]
    fn fixture_error_envelope() {
        let msg = roundtrip_test::<Message>("error_envelope.json");
        assert_eq!(msg.msg_type, MessageType::Error);
        let err = msg.error.unwrap();
        assert_eq!(err.status, 400);
        assert_eq!(err.missing_fields, vec!["courseId"]);
    }

    // --- Requests ---

    #[test]
    fn fixture_init_upload_request() {
        let req = roundtrip_test::<InitUploadRequest>("init_upload_request.json");
        assert_eq!(req.metadata.course_id.as_deref(), Some("course-42"));
    }

    #[test]
    fn fixture_chunk_upload_request() {
        let req = roundtrip_test::<ChunkUploadRequest>("chunk_upload_request.json");
        assert_eq!(req.checksum.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn fixture_complete_upload_request() {
        roundtrip_test::<CompleteUploadRequest>("complete_upload_request.json");
    }

    #[test]
    fn fixture_recover_session_request() {
        roundtrip_test::<RecoverSessionRequest>("recover_session_request.json");
    }

    // --- Responses ---

    #[test]
    fn fixture_init_upload_response() {
        let resp = roundtrip_test::<InitUploadResponse>("init_upload_response.json");
        assert_eq!(resp.chunk_size, Some(8 * 1024 * 1024));
        assert!(resp.session.expires_at.is_some());
    }

    #[test]
    fn fixture_chunk_ack() {
        roundtrip_test::<ChunkAck>("chunk_ack.json");
    }

    #[test]
    fn fixture_complete_upload_response() {
        roundtrip_test::<CompleteUploadResponse>("complete_upload_response.json");
    }

    #[test]
    fn fixture_validate_session_response() {
        let resp = roundtrip_test::<ValidateSessionResponse>("validate_session_response.json");
        assert!(resp.is_near_expiration);
    }

    #[test]
    fn fixture_recover_session_response() {
        let resp = roundtrip_test::<RecoverSessionResponse>("recover_session_response.json");
        assert_eq!(resp.recovery.uploaded_parts, Some(vec![1, 2, 3]));
    }

    // --- Configuration ---

    #[test]
    fn fixture_upload_config() {
        let config = roundtrip_test::<UploadConfig>("upload_config.json");
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrency, 4);
    }
}
