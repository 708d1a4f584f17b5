use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

/// Errors produced while encoding or decoding chunk payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("chunk is empty")]
    EmptyChunk,

    #[error("payload is not valid base64: {0}")]
    InvalidBase64(String),

    #[error("mime type mismatch: expected {expected}, got {found}")]
    MimeMismatch { expected: String, found: String },
}

/// A chunk ready to be placed in a JSON request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// Standard padded base64 of the raw bytes.
    pub payload: String,
    pub original_size: u64,
    pub encoded_size: u64,
    pub mime_type: String,
}

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Encodes raw chunk bytes for the JSON transport.
#[derive(Debug, Clone)]
pub struct ChunkCodec {
    mime_type: String,
    allow_empty: bool,
}

impl ChunkCodec {
    /// Creates a codec that rejects empty chunks.
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            allow_empty: false,
        }
    }

    /// Creates a codec that accepts empty input.
    pub fn permissive(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            allow_empty: true,
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn encode(&self, raw: &[u8]) -> Result<EncodedChunk, CodecError> {
        if raw.is_empty() && !self.allow_empty {
            return Err(CodecError::EmptyChunk);
        }
        let payload = STANDARD.encode(raw);
        Ok(EncodedChunk {
            original_size: raw.len() as u64,
            encoded_size: payload.len() as u64,
            payload,
            mime_type: self.mime_type.clone(),
        })
    }

    /// Decodes a payload produced by [`encode`](Self::encode).
    pub fn decode(&self, payload: &str, mime_type: &str) -> Result<Vec<u8>, CodecError> {
        if mime_type != self.mime_type {
            return Err(CodecError::MimeMismatch {
                expected: self.mime_type.clone(),
                found: mime_type.to_string(),
            });
        }
        let raw = STANDARD
            .decode(payload)
            .map_err(|e| CodecError::InvalidBase64(e.to_string()))?;
        if raw.is_empty() && !self.allow_empty {
            return Err(CodecError::EmptyChunk);
        }
        Ok(raw)
    }

    /// SHA-256 of the raw bytes, before encoding.
    pub fn checksum(&self, raw: &[u8]) -> String {
        checksum_bytes(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MP4: &str = "video/mp4";

    #[test]
    fn checksum_bytes_deterministic() {
        let c1 = checksum_bytes(b"hello world");
        let c2 = checksum_bytes(b"hello world");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 64); // SHA-256 = 64 hex chars.
        assert_ne!(c1, checksum_bytes(b"hello world!"));
    }

    #[test]
    fn checksum_known_vector() {
        assert_eq!(
            checksum_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn roundtrip_edge_lengths() {
        let codec = ChunkCodec::permissive(MP4);
        // Lengths around the 3-byte base64 group boundary, plus all byte values.
        let all_bytes: Vec<u8> = (0..=255).collect();
        let mut inputs: Vec<Vec<u8>> = (0..8).map(|n| vec![0xAB; n]).collect();
        inputs.push(all_bytes);
        inputs.push(vec![0u8; 4097]);
        for raw in inputs {
            let enc = codec.encode(&raw).unwrap();
            let dec = codec.decode(&enc.payload, &enc.mime_type).unwrap();
            assert_eq!(dec, raw, "roundtrip failed for {} bytes", raw.len());
        }
    }

    #[test]
    fn roundtrip_sweep_over_lengths_and_patterns() {
        let codec = ChunkCodec::permissive(MP4);
        let patterns: [(&str, fn(usize) -> u8); 4] = [
            ("zeros", |_| 0),
            ("ones", |_| 0xFF),
            ("counter", |i| i as u8),
            ("lcg", |i| (i.wrapping_mul(1_103_515_245).wrapping_add(12_345) >> 7) as u8),
        ];
        let lengths = (0..=70).chain([255, 256, 257, 1023, 1024, 1025, 65_535, 65_536, 65_537]);
        for len in lengths {
            for (name, byte_at) in &patterns {
                let raw: Vec<u8> = (0..len).map(byte_at).collect();
                let enc = codec.encode(&raw).unwrap();
                assert_eq!(enc.original_size, len as u64);
                assert_eq!(enc.encoded_size, (len as u64).div_ceil(3) * 4);
                let dec = codec.decode(&enc.payload, &enc.mime_type).unwrap();
                assert_eq!(dec, raw, "{name} pattern, {len} bytes");
                assert_eq!(codec.checksum(&dec), checksum_bytes(&raw));
            }
        }
    }

    #[test]
    fn encoded_size_is_four_thirds() {
        let codec = ChunkCodec::new(MP4);
        for n in 1..20usize {
            let enc = codec.encode(&vec![7u8; n]).unwrap();
            assert_eq!(enc.original_size, n as u64);
            assert_eq!(enc.encoded_size, (n as u64).div_ceil(3) * 4);
            assert_eq!(enc.encoded_size, enc.payload.len() as u64);
        }
    }

    #[test]
    fn empty_chunk_rejected_by_default() {
        let codec = ChunkCodec::new(MP4);
        assert_eq!(codec.encode(&[]), Err(CodecError::EmptyChunk));
        assert_eq!(codec.decode("", MP4), Err(CodecError::EmptyChunk));
    }

    #[test]
    fn permissive_accepts_empty() {
        let codec = ChunkCodec::permissive(MP4);
        let enc = codec.encode(&[]).unwrap();
        assert_eq!(enc.payload, "");
        assert_eq!(enc.encoded_size, 0);
        assert!(codec.decode("", MP4).unwrap().is_empty());
    }

    #[test]
    fn decode_rejects_mime_mismatch() {
        let codec = ChunkCodec::new(MP4);
        let err = codec.decode("SGVsbG8=", "video/webm").unwrap_err();
        assert!(matches!(err, CodecError::MimeMismatch { .. }));
    }

    #[test]
    fn decode_rejects_garbage() {
        let codec = ChunkCodec::new(MP4);
        let err = codec.decode("not base64!!", MP4).unwrap_err();
        assert!(matches!(err, CodecError::InvalidBase64(_)));
    }

    #[test]
    fn encode_carries_mime_type() {
        let codec = ChunkCodec::new("video/webm");
        let enc = codec.encode(b"abc").unwrap();
        assert_eq!(enc.mime_type, "video/webm");
        assert_eq!(enc.payload, "YWJj");
        assert_eq!(codec.checksum(b"abc"), checksum_bytes(b"abc"));
    }
}
