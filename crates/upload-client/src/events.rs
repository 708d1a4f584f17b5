//! Events and snapshots reported to the caller.

use std::time::Duration;

use reelup_protocol::types::RecoveryInfo;
use reelup_transfer::{ClassifiedError, SessionState};

/// Point-in-time view of an upload.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// 0–100, never decreasing within a generation.
    pub percent: f64,
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub video_id: Option<String>,
    pub state: SessionState,
    pub generation: u32,
    pub bytes_per_second: f64,
    pub eta: Option<Duration>,
}

impl ProgressSnapshot {
    pub(crate) fn initial(total_bytes: u64) -> Self {
        Self {
            percent: 0.0,
            uploaded_chunks: 0,
            total_chunks: 0,
            uploaded_bytes: 0,
            total_bytes,
            video_id: None,
            state: SessionState::Created,
            generation: 0,
            bytes_per_second: 0.0,
            eta: None,
        }
    }
}

/// Everything the orchestrator reports, in order.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// The session moved between states.
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// A part landed.
    Progress(ProgressSnapshot),
    /// A failure was classified. `will_retry` is false for terminal errors.
    Error {
        part: Option<u32>,
        error: ClassifiedError,
        will_retry: bool,
    },
    /// The backend replaced an expired session.
    SessionRecovered(RecoveryInfo),
    /// Something the caller should know about that does not stop the upload.
    Warning(String),
}

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub video_id: String,
    pub playback_url: Option<String>,
    pub total_chunks: u32,
    pub file_size: u64,
    /// Session recoveries performed along the way.
    pub recoveries: u32,
}
