//! Closed taxonomy of upload failures.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Machine-readable failure category. Every failure maps to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidInput,
    EncodingError,
    EmptyChunk,
    ProtocolMismatch,
    ParameterValidation,
    AuthExpired,
    PayloadTooLarge,
    UnsupportedFormat,
    SessionExpired,
    ServerFault,
    NetworkFault,
    Timeout,
    Unknown,
}

impl ErrorKind {
    /// Retryability before any situational refinement.
    pub fn default_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorKind::InvalidInput
                | ErrorKind::EncodingError
                | ErrorKind::ProtocolMismatch
                | ErrorKind::ParameterValidation
                | ErrorKind::PayloadTooLarge
                | ErrorKind::UnsupportedFormat
        )
    }

    /// Per-attempt backoff multiplier, or 0 when the kind does not wait.
    pub fn backoff_multiplier(&self) -> u32 {
        match self {
            ErrorKind::ServerFault | ErrorKind::Unknown | ErrorKind::EmptyChunk => 1,
            ErrorKind::NetworkFault => 2,
            ErrorKind::Timeout => 3,
            _ => 0,
        }
    }

    /// Plain-language explanation for people.
    pub fn explanation(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "The file or upload settings are not acceptable.",
            ErrorKind::EncodingError => "A chunk of the file could not be encoded for transfer.",
            ErrorKind::EmptyChunk => {
                "The file returned no data for part of its length; it may be truncated or corrupt."
            }
            ErrorKind::ProtocolMismatch => {
                "The server could not understand the upload request format."
            }
            ErrorKind::ParameterValidation => "The server rejected required upload parameters.",
            ErrorKind::AuthExpired => "Your sign-in has expired.",
            ErrorKind::PayloadTooLarge => "A chunk was larger than the server accepts.",
            ErrorKind::UnsupportedFormat => "The server does not accept this video format.",
            ErrorKind::SessionExpired => "The upload session expired on the server.",
            ErrorKind::ServerFault => "The server hit an internal error.",
            ErrorKind::NetworkFault => "The server could not be reached.",
            ErrorKind::Timeout => "The server took too long to respond.",
            ErrorKind::Unknown => "The upload failed for an unrecognized reason.",
        }
    }

    /// Concrete next step for the caller.
    pub fn next_step(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "Check the file size and type, then start a new upload.",
            ErrorKind::EncodingError => "Start a new upload; contact support if it happens again.",
            ErrorKind::EmptyChunk => "Verify the file is complete and readable, then upload it again.",
            ErrorKind::ProtocolMismatch => {
                "Update the uploader to a version that matches the server, or contact support."
            }
            ErrorKind::ParameterValidation => "Contact support with the reported field names.",
            ErrorKind::AuthExpired => "Sign in again and retry the upload.",
            ErrorKind::PayloadTooLarge => "Reduce the chunk size and retry.",
            ErrorKind::UnsupportedFormat => "Convert the file to a supported video format.",
            ErrorKind::SessionExpired => "Restart the upload.",
            ErrorKind::ServerFault => "Wait a few minutes and retry.",
            ErrorKind::NetworkFault => "Check the network connection and retry.",
            ErrorKind::Timeout => "Retry on a faster connection or with a smaller chunk size.",
            ErrorKind::Unknown => "Retry; contact support if it keeps failing.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A failure after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    pub is_retryable: bool,
    /// Needs session-level recovery rather than a chunk retry.
    pub is_session_expired: bool,
    /// Retry only after refreshing the session reference.
    pub requires_session_refresh: bool,
    /// Retry only after the credential provider refreshed.
    pub requires_credential_refresh: bool,
    pub suggested_delay: Duration,
    /// Backend status, when the failure came from a backend response.
    pub status: Option<u16>,
}

impl ClassifiedError {
    /// Creates an error with the kind's default flags and no delay.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            is_retryable: kind.default_retryable(),
            is_session_expired: kind == ErrorKind::SessionExpired,
            requires_session_refresh: false,
            requires_credential_refresh: kind == ErrorKind::AuthExpired,
            suggested_delay: Duration::ZERO,
            status: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.is_retryable = retryable;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.suggested_delay = delay;
        self
    }

    pub fn with_status(mut self, status: Option<u16>) -> Self {
        self.status = status;
        self
    }

    pub fn with_session_refresh(mut self) -> Self {
        self.requires_session_refresh = true;
        self.is_retryable = true;
        self
    }

    /// Returns the same error marked terminal with an updated message.
    pub fn escalate(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self.is_retryable = false;
        self.suggested_delay = Duration::ZERO;
        self
    }

    /// Whether starting the upload over is likely to succeed.
    pub fn caller_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::EmptyChunk => false,
            kind => kind.default_retryable(),
        }
    }

    pub fn explanation(&self) -> &'static str {
        self.kind.explanation()
    }

    pub fn next_step(&self) -> &'static str {
        self.kind.next_step()
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ClassifiedError {}
