//! Background tasks that own the two halves of the socket.

pub(crate) mod ping;
pub(crate) mod read;
pub(crate) mod write;
