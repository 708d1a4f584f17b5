//! Upload orchestration for resumable chunked video uploads.
//!
//! This crate drives the upload protocol on top of an abstract
//! [`SessionTransport`]. It owns retries, backoff, session recovery,
//! credential refresh, pause/resume and cancellation. Everything the caller
//! needs to observe comes through one ordered stream of [`UploadEvent`]s.
//!
//! # Pipeline
//!
//! 1. **Plan**: validate the file and compute chunk ranges
//! 2. **Init**: open a session on the backend (re-planning if it
//!    negotiates a different chunk size)
//! 3. **Upload**: read, encode and send each pending part
//! 4. **Recover**: replace an expired session without re-sending landed parts
//! 5. **Complete**: validate the session and finalize the asset

pub mod classifier;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod singleflight;
pub mod transport;

// Re-export primary types for convenience.
pub use classifier::{BackoffPolicy, ErrorClassifier, UploadFailure};
pub use config::UploadConfig;
pub use credentials::{CredentialError, CredentialProvider, StaticToken};
pub use error::UploadError;
pub use events::{ProgressSnapshot, UploadEvent, UploadOutcome};
pub use orchestrator::{UploadHandle, UploadOrchestrator};
pub use singleflight::{FlightCoordinator, SingleFlight};
pub use transport::{SessionTransport, TransportError, TransportFuture};
