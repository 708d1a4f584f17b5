//! Leaf components of the resumable upload client.
//!
//! Chunk planning, base64 chunk encoding, ranged byte sources, the
//! per-upload session record with its state machine, the closed error
//! taxonomy, and progress accounting. Nothing here performs network I/O.

mod codec;
mod failure;
mod planner;
mod progress;
mod session;
mod source;
mod validation;

pub use codec::{ChunkCodec, CodecError, EncodedChunk, checksum_bytes};
pub use failure::{ClassifiedError, ErrorKind};
pub use planner::{ByteRange, ChunkConstraints, ChunkPlan, PlanWarning, plan_chunks};
pub use progress::{ProgressTracker, ThroughputMeter};
pub use session::{ChunkRecord, ChunkStatus, FileDescriptor, SessionState, UploadSession};
pub use source::{ByteSource, FileSource, MemorySource, ReadFuture, SequentialSource};
pub use validation::{SUPPORTED_CONTENT_TYPES, content_type_for_path, validate_descriptor};

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    #[error("unknown part number: {0}")]
    UnknownPart(u32),

    #[error("part {part} is {status:?}, expected {expected}")]
    UnexpectedChunkStatus {
        part: u32,
        status: ChunkStatus,
        expected: &'static str,
    },

    #[error("sequential source is at byte {position}, cannot read from {requested}")]
    NonSequentialRead { position: u64, requested: u64 },

    #[error("range {start}..{end} is outside the source ({len} bytes)")]
    RangeOutOfBounds { start: u64, end: u64, len: u64 },
}
