//! The client's view of a transport: one request/response exchange at a
//! time, message arrays in and out.

use std::future::Future;

use bayeux_core::Message;
use thiserror::Error;

/// A failed exchange at the transport level, before any protocol reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport error: {reason}")]
pub struct TransportError {
    reason: String,
}

impl TransportError {
    /// An error with the given description.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Carries one batch of messages to the server and returns whatever the
/// server replies with.
///
/// A long-poll HTTP transport performs one POST per call; the connect
/// exchange simply takes as long as the server holds it. Implementations
/// must be usable concurrently, since a held connect overlaps with other
/// exchanges.
pub trait ClientTransport: Send + Sync {
    /// Perform one exchange.
    fn send(
        &self,
        messages: Vec<Message>,
    ) -> impl Future<Output = Result<Vec<Message>, TransportError>> + Send;
}
