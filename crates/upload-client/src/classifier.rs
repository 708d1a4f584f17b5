//! Maps raw upload failures onto the closed error taxonomy.
//!
//! Classification reads only the normalized [`BackendError`] envelope and
//! local error values. Rules are tried in a fixed priority order and the
//! first match wins; anything unmatched lands in `Unknown`, so every input
//! produces exactly one kind.

use std::time::Duration;

use reelup_protocol::constants::{
    STATUS_BAD_REQUEST, STATUS_GONE, STATUS_NOT_FOUND, STATUS_PAYLOAD_TOO_LARGE, STATUS_REQUEST_TIMEOUT,
    STATUS_UNAUTHORIZED, STATUS_UNSUPPORTED_MEDIA_TYPE,
};
use reelup_protocol::envelope::BackendError;
use reelup_transfer::{ClassifiedError, CodecError, ErrorKind, TransferError};

use crate::transport::TransportError;

/// Anything that can go wrong with a single operation.
#[derive(Debug, thiserror::Error)]
pub enum UploadFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Reading the source failed.
    #[error("source read failed: {0}")]
    Source(#[from] TransferError),

    /// The source returned fewer bytes than the part needs.
    #[error("read {got} of {expected} bytes for the part")]
    ShortRead { expected: u64, got: u64 },
}

/// Session reference fields the client can supply again after a refresh.
const REFRESHABLE_FIELDS: &[&str] = &["sessionid", "sessionref", "uploadid", "videoid"];

const EXPIRATION_MARKERS: &[&str] = &[
    "nosuchupload",
    "no such upload",
    "session expired",
    "session_expired",
    "upload expired",
    "upload_expired",
    "session has expired",
    "expired session",
];

const NOT_FOUND_MARKERS: &[&str] = &["not found", "not_found", "notfound", "does not exist"];

const UPLOAD_ID_MARKERS: &[&str] = &["upload", "session"];

const PARSE_MARKERS: &[&str] = &[
    "malformed",
    "unexpected token",
    "invalid json",
    "unparseable",
    "could not parse",
    "failed to parse",
    "parse error",
    "syntaxerror",
];

const MULTIPART_MARKERS: &[&str] = &["multipart", "form-data", "boundary", "------webkit"];

const VALIDATION_MARKERS: &[&str] = &["validation", "required field", "is required", "missing"];

/// Backoff derived from an error kind and attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// `base × multiplier × attempt`, capped at `max`.
    pub fn delay(&self, kind: ErrorKind, attempt: u32) -> Duration {
        let factor = kind.backoff_multiplier().saturating_mul(attempt.max(1));
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Pure classifier with a backoff policy.
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    backoff: BackoffPolicy,
}

impl ErrorClassifier {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self { backoff }
    }

    /// Classifies `failure` seen on the `attempt`-th try (1-based).
    pub fn classify(&self, failure: &UploadFailure, attempt: u32) -> ClassifiedError {
        let mut classified = match failure {
            UploadFailure::Transport(TransportError::Backend(err)) => classify_backend(err),
            UploadFailure::Transport(TransportError::Unreachable(msg)) => {
                ClassifiedError::new(ErrorKind::NetworkFault, msg.clone())
            }
            UploadFailure::Transport(TransportError::Timeout(after)) => ClassifiedError::new(
                ErrorKind::Timeout,
                format!("no response within {after:?}"),
            ),
            UploadFailure::Transport(e @ TransportError::MalformedResponse(_)) => {
                ClassifiedError::new(ErrorKind::Unknown, e.to_string())
            }
            UploadFailure::Transport(TransportError::Cancelled) => ClassifiedError::new(
                ErrorKind::Unknown,
                "transport cancelled the operation",
            ),
            UploadFailure::Codec(CodecError::EmptyChunk) => ClassifiedError::new(
                ErrorKind::EmptyChunk,
                "chunk payload is empty at send time",
            ),
            UploadFailure::Codec(e) => ClassifiedError::new(ErrorKind::EncodingError, e.to_string()),
            UploadFailure::ShortRead { .. } => {
                ClassifiedError::new(ErrorKind::EmptyChunk, failure.to_string())
            }
            UploadFailure::Source(TransferError::Io(e)) => {
                ClassifiedError::new(ErrorKind::Unknown, format!("source read failed: {e}"))
            }
            UploadFailure::Source(e) => ClassifiedError::invalid_input(e.to_string()),
        };

        if classified.is_retryable {
            classified.suggested_delay = self.backoff.delay(classified.kind, attempt);
        }
        classified
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn normalize_field(field: &str) -> String {
    field
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

fn is_session_expired(err: &BackendError, text: &str) -> bool {
    if err.status == STATUS_GONE || contains_any(text, EXPIRATION_MARKERS) {
        return true;
    }
    let not_found = err.status == STATUS_NOT_FOUND || contains_any(text, NOT_FOUND_MARKERS);
    not_found && contains_any(text, UPLOAD_ID_MARKERS)
}

fn is_protocol_mismatch(text: &str) -> bool {
    contains_any(text, PARSE_MARKERS) && contains_any(text, MULTIPART_MARKERS)
}

fn is_parameter_validation(err: &BackendError, text: &str) -> bool {
    let code = err.code.as_deref().unwrap_or_default().to_ascii_lowercase();
    !err.missing_fields.is_empty()
        || code.contains("validation")
        || (err.status == STATUS_BAD_REQUEST && contains_any(text, VALIDATION_MARKERS))
}

fn classify_backend(err: &BackendError) -> ClassifiedError {
    let text = err.searchable_text();
    let status = Some(err.status).filter(|s| *s != 0);
    let message = err.to_string();

    let classified = if is_session_expired(err, &text) {
        ClassifiedError::new(ErrorKind::SessionExpired, message)
    } else if is_protocol_mismatch(&text) {
        ClassifiedError::new(ErrorKind::ProtocolMismatch, message)
    } else if is_parameter_validation(err, &text) {
        let refreshable = !err.missing_fields.is_empty()
            && err
                .missing_fields
                .iter()
                .all(|f| REFRESHABLE_FIELDS.contains(&normalize_field(f).as_str()));
        let base = ClassifiedError::new(ErrorKind::ParameterValidation, message);
        if refreshable {
            base.with_session_refresh()
        } else {
            base
        }
    } else if err.status == STATUS_UNAUTHORIZED {
        ClassifiedError::new(ErrorKind::AuthExpired, message)
    } else if err.status == STATUS_PAYLOAD_TOO_LARGE {
        ClassifiedError::new(ErrorKind::PayloadTooLarge, message)
    } else if err.status == STATUS_UNSUPPORTED_MEDIA_TYPE {
        ClassifiedError::new(ErrorKind::UnsupportedFormat, message)
    } else if (500..600).contains(&err.status) {
        ClassifiedError::new(ErrorKind::ServerFault, message)
    } else if err.status == STATUS_REQUEST_TIMEOUT {
        ClassifiedError::new(ErrorKind::Timeout, message)
    } else {
        ClassifiedError::new(ErrorKind::Unknown, message)
    };
    classified.with_status(status)
}
