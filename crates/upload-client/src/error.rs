//! Upload error types.

use reelup_transfer::{ClassifiedError, ErrorKind, SessionState, TransferError};

/// Errors returned to the caller of an upload.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UploadError {
    /// The upload failed with a classified, terminal error.
    #[error("upload failed: {0}")]
    Failed(ClassifiedError),

    /// Session recovery failed; the upload has to start over.
    #[error("session recovery failed: {instructions}")]
    RecoveryFailed {
        /// Recovery fields that were missing, locally or per the backend.
        missing_fields: Vec<String>,
        instructions: String,
        cause: Option<ClassifiedError>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("upload cancelled")]
    Cancelled,

    /// The session already ended.
    #[error("upload already finished in state {0:?}")]
    Terminal(SessionState),

    #[error("internal state error: {0}")]
    Internal(String),
}

impl UploadError {
    /// The classified error behind this failure, if there is one.
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            UploadError::Failed(e) => Some(e),
            UploadError::RecoveryFailed { cause, .. } => cause.as_ref(),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.classified().map(|e| e.kind)
    }

    /// Whether starting the upload again from scratch may succeed.
    pub fn caller_retryable(&self) -> bool {
        match self {
            UploadError::Failed(e) => e.caller_retryable(),
            UploadError::RecoveryFailed { .. } | UploadError::Cancelled => true,
            UploadError::Config(_) | UploadError::Terminal(_) | UploadError::Internal(_) => false,
        }
    }

    /// A concrete next step for the person running the upload.
    pub fn next_step(&self) -> String {
        match self {
            UploadError::Failed(e) => e.next_step().to_string(),
            UploadError::RecoveryFailed { instructions, .. } => instructions.clone(),
            UploadError::Config(_) => "Fix the upload configuration and try again.".into(),
            UploadError::Cancelled => "Start the upload again when ready.".into(),
            UploadError::Terminal(_) => "Create a new upload for this file.".into(),
            UploadError::Internal(_) => "Retry; report the problem if it persists.".into(),
        }
    }
}

impl From<TransferError> for UploadError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::InvalidInput(msg) => {
                UploadError::Failed(ClassifiedError::invalid_input(msg))
            }
            other => UploadError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_becomes_classified() {
        let err: UploadError = TransferError::InvalidInput("too small".into()).into();
        assert_eq!(err.kind(), Some(ErrorKind::InvalidInput));
        assert!(err.to_string().contains("too small"));
    }

    #[test]
    fn recovery_failure_exposes_instructions() {
        let err = UploadError::RecoveryFailed {
            missing_fields: vec!["courseId".into()],
            instructions: "restart".into(),
            cause: None,
        };
        assert_eq!(err.next_step(), "restart");
        assert!(err.caller_retryable());
        assert!(err.kind().is_none());
    }

    #[test]
    fn protocol_mismatch_not_caller_retryable() {
        let err = UploadError::Failed(ClassifiedError::new(ErrorKind::ProtocolMismatch, "x"));
        assert!(!err.caller_retryable());
    }
}
