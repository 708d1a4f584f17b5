use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use reelup_protocol::types::{RecoveryInfo, SessionRef, UploadMetadata};

use crate::TransferError;
use crate::failure::ClassifiedError;
use crate::planner::{ByteRange, ChunkPlan};

/// Lifecycle state of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Created,
    Planning,
    Uploading,
    Paused,
    Recovering,
    Completing,
    Completed,
    Aborted,
    Failed,
}

impl SessionState {
    /// `Completed`, `Aborted` and `Failed` are final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Aborted | SessionState::Failed
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        matches!(
            (self, next),
            (Created, Planning)
                | (Created, Aborted)
                | (Planning, Uploading)
                | (Planning, Aborted)
                | (Uploading, Uploading)
                | (Uploading, Recovering)
                | (Uploading, Paused)
                | (Uploading, Completing)
                | (Uploading, Aborted)
                | (Paused, Uploading)
                | (Paused, Recovering)
                | (Paused, Aborted)
                | (Recovering, Uploading)
                | (Recovering, Aborted)
                | (Completing, Completed)
                | (Completing, Aborted)
        )
    }
}

/// Transfer status of one part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChunkStatus {
    Pending,
    InFlight,
    Uploaded,
    Failed,
}

/// One planned part of the file.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    /// 1-based.
    pub part_number: u32,
    pub range: ByteRange,
    pub status: ChunkStatus,
    /// Never decreases.
    pub attempts: u32,
    pub last_error: Option<ClassifiedError>,
    pub checksum: Option<String>,
}

/// Immutable description of the source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub file_name: String,
    pub file_size: u64,
    pub content_type: String,
}

/// Data record and state machine for one upload.
///
/// Owned by a single orchestrator; nothing here is synchronized.
#[derive(Debug, Clone)]
pub struct UploadSession {
    descriptor: FileDescriptor,
    metadata: UploadMetadata,
    remote: Option<SessionRef>,
    chunk_size: u64,
    chunks: Vec<ChunkRecord>,
    state: SessionState,
    generation: u32,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
}

impl UploadSession {
    /// Creates a session in the `Created` state.
    pub fn new(descriptor: FileDescriptor, metadata: UploadMetadata) -> Self {
        let now = Utc::now();
        Self {
            descriptor,
            metadata,
            remote: None,
            chunk_size: 0,
            chunks: Vec::new(),
            state: SessionState::Created,
            generation: 0,
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Moves to `next`, returning the previous state.
    pub fn transition(&mut self, next: SessionState) -> Result<SessionState, TransferError> {
        let prev = self.state;
        if !prev.can_transition_to(next) {
            return Err(TransferError::InvalidTransition {
                from: prev,
                to: next,
            });
        }
        self.state = next;
        self.touch();
        debug!(from = ?prev, to = ?next, "session state changed");
        Ok(prev)
    }

    /// Installs a chunk plan. Allowed until the first part lands.
    pub fn apply_plan(&mut self, plan: &ChunkPlan) -> Result<(), TransferError> {
        if !matches!(self.state, SessionState::Created | SessionState::Planning) {
            return Err(TransferError::InvalidInput(format!(
                "cannot re-plan a session in state {:?}",
                self.state
            )));
        }
        self.chunk_size = plan.chunk_size;
        self.chunks = plan
            .ranges
            .iter()
            .enumerate()
            .map(|(i, range)| ChunkRecord {
                part_number: i as u32 + 1,
                range: *range,
                status: ChunkStatus::Pending,
                attempts: 0,
                last_error: None,
                checksum: None,
            })
            .collect();
        self.verify_coverage()?;
        self.touch();
        Ok(())
    }

    /// Records the backend identifiers of a freshly initialized session.
    pub fn bind_remote(&mut self, remote: SessionRef) {
        self.remote = Some(remote);
        self.touch();
    }

    /// Replaces the remote session after a successful recovery.
    ///
    /// Starts a new generation. When the backend reports which parts it
    /// already holds, that list is authoritative; otherwise parts this
    /// session saw acknowledged keep their credit. Everything not uploaded
    /// goes back to `Pending`.
    ///
    /// With `can_rewind` false (a forward-only source) a part that already
    /// landed locally cannot be read again, so it keeps its credit even when
    /// the backend leaves it out. Those parts are returned so the caller can
    /// report them.
    pub fn apply_recovery(
        &mut self,
        new_remote: SessionRef,
        recovery: &RecoveryInfo,
        can_rewind: bool,
    ) -> Vec<u32> {
        let landed: Option<HashSet<u32>> = recovery
            .uploaded_parts
            .as_ref()
            .map(|parts| parts.iter().copied().collect());

        let mut kept = Vec::new();
        for chunk in &mut self.chunks {
            let local = chunk.status == ChunkStatus::Uploaded;
            let uploaded = match &landed {
                Some(set) if set.contains(&chunk.part_number) => true,
                Some(_) if local && !can_rewind => {
                    kept.push(chunk.part_number);
                    true
                }
                Some(_) => false,
                None => local,
            };
            chunk.status = if uploaded {
                ChunkStatus::Uploaded
            } else {
                ChunkStatus::Pending
            };
        }
        self.remote = Some(new_remote);
        self.generation += 1;
        self.touch();
        debug!(
            generation = self.generation,
            uploaded = self.uploaded_chunks(),
            kept = kept.len(),
            "recovery applied"
        );
        kept
    }

    /// Marks a pending part as in flight and bumps its attempt count.
    pub fn begin_attempt(&mut self, part: u32) -> Result<u32, TransferError> {
        let chunk = self.chunk_mut(part)?;
        if chunk.status != ChunkStatus::Pending {
            return Err(TransferError::UnexpectedChunkStatus {
                part,
                status: chunk.status,
                expected: "Pending",
            });
        }
        chunk.status = ChunkStatus::InFlight;
        chunk.attempts += 1;
        let attempts = chunk.attempts;
        self.touch();
        Ok(attempts)
    }

    /// Marks a part as stored by the backend.
    pub fn record_uploaded(
        &mut self,
        part: u32,
        checksum: Option<String>,
    ) -> Result<(), TransferError> {
        let chunk = self.chunk_mut(part)?;
        chunk.status = ChunkStatus::Uploaded;
        chunk.last_error = None;
        if checksum.is_some() {
            chunk.checksum = checksum;
        }
        self.touch();
        Ok(())
    }

    /// Marks a part as failed with its classified error.
    pub fn record_failure(
        &mut self,
        part: u32,
        error: ClassifiedError,
    ) -> Result<(), TransferError> {
        let chunk = self.chunk_mut(part)?;
        chunk.status = ChunkStatus::Failed;
        chunk.last_error = Some(error);
        self.touch();
        Ok(())
    }

    /// Puts a failed or abandoned part back in the queue.
    pub fn requeue(&mut self, part: u32) -> Result<(), TransferError> {
        let chunk = self.chunk_mut(part)?;
        match chunk.status {
            ChunkStatus::Failed | ChunkStatus::InFlight => {
                chunk.status = ChunkStatus::Pending;
                debug!(part, attempts = chunk.attempts, "part requeued");
                Ok(())
            }
            ChunkStatus::Pending => Ok(()),
            status => Err(TransferError::UnexpectedChunkStatus {
                part,
                status,
                expected: "Failed or InFlight",
            }),
        }
    }

    /// Lowest-numbered pending part.
    pub fn next_pending(&self) -> Option<u32> {
        self.chunks
            .iter()
            .find(|c| c.status == ChunkStatus::Pending)
            .map(|c| c.part_number)
    }

    /// Checks that the chunk ranges tile `[0, file_size)` exactly.
    pub fn verify_coverage(&self) -> Result<(), TransferError> {
        let mut cursor = 0;
        for chunk in &self.chunks {
            if chunk.range.start != cursor || chunk.range.is_empty() {
                return Err(TransferError::InvalidInput(format!(
                    "part {} range {} does not continue at byte {cursor}",
                    chunk.part_number, chunk.range
                )));
            }
            cursor = chunk.range.end;
        }
        if cursor != self.descriptor.file_size {
            return Err(TransferError::InvalidInput(format!(
                "parts cover {cursor} of {} bytes",
                self.descriptor.file_size
            )));
        }
        Ok(())
    }

    pub fn chunk(&self, part: u32) -> Option<&ChunkRecord> {
        part.checked_sub(1)
            .and_then(|i| self.chunks.get(i as usize))
    }

    fn chunk_mut(&mut self, part: u32) -> Result<&mut ChunkRecord, TransferError> {
        part.checked_sub(1)
            .and_then(|i| self.chunks.get_mut(i as usize))
            .ok_or(TransferError::UnknownPart(part))
    }

    fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    pub fn chunks(&self) -> &[ChunkRecord] {
        &self.chunks
    }

    pub fn all_uploaded(&self) -> bool {
        !self.chunks.is_empty()
            && self
                .chunks
                .iter()
                .all(|c| c.status == ChunkStatus::Uploaded)
    }

    pub fn uploaded_chunks(&self) -> u32 {
        self.chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Uploaded)
            .count() as u32
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Uploaded)
            .map(|c| c.range.len())
            .sum()
    }

    /// Bytes not yet acknowledged by the backend.
    pub fn outstanding_bytes(&self) -> u64 {
        self.chunks
            .iter()
            .filter(|c| c.status != ChunkStatus::Uploaded)
            .map(|c| c.range.len())
            .sum()
    }

    /// Uploaded share of the file, 0–100.
    pub fn percent_complete(&self) -> f64 {
        if self.descriptor.file_size == 0 {
            return 0.0;
        }
        self.uploaded_bytes() as f64 / self.descriptor.file_size as f64 * 100.0
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    pub fn metadata(&self) -> &UploadMetadata {
        &self.metadata
    }

    pub fn remote(&self) -> Option<&SessionRef> {
        self.remote.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.remote.as_ref().map(|r| r.session_id.as_str())
    }

    pub fn video_id(&self) -> Option<&str> {
        self.remote.as_ref().map(|r| r.video_id.as_str())
    }

    /// Overrides the video id (the completion response is authoritative).
    pub fn set_video_id(&mut self, video_id: String) {
        if let Some(remote) = self.remote.as_mut() {
            remote.video_id = video_id;
        }
    }

    pub fn expires_at_hint(&self) -> Option<DateTime<Utc>> {
        self.remote.as_ref().and_then(|r| r.expires_at)
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }
}
