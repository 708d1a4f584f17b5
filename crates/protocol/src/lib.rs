//! Wire protocol types for the reelup upload client.
//!
//! Every request and response travels inside a JSON [`Message`] envelope.
//! Backend failures are carried as a single normalized [`BackendError`]
//! shape so that classification never has to sniff ad hoc fields.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use envelope::{BackendError, Message};
pub use types::{RecoveryInfo, SessionRef, UploadMetadata};
