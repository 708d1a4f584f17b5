//! WebSocket transport for the reelup upload client.
//!
//! Requests travel as JSON [`Message`](reelup_protocol::Message) envelopes
//! correlated by UUID. This crate is the only place backend error shapes are
//! looked at: replies are normalized into
//! [`BackendError`](reelup_protocol::BackendError) before the classifier
//! sees them.

pub mod client;
pub mod normalize;
mod pumps;
pub mod transport;

pub use client::{WsClient, WsError};
pub use normalize::{normalize_error, normalize_text};
pub use transport::WsSessionTransport;
