//! The surface between the engine and concrete transports.
//!
//! Transports decode wire frames into [`Message`](crate::message::Message)s
//! and hand them to [`BayeuxServer::process`](crate::server::BayeuxServer::process)
//! with a [`Context`]. Socket-style transports may also register a
//! [`TransportSink`] so deliveries can be written without waiting for the
//! next connect exchange.

use std::sync::Weak;

use thiserror::Error;

use crate::message::Message;

/// A transport-level send failure, reported back to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport failure: {reason}")]
pub struct TransportFailure {
    reason: String,
}

impl TransportFailure {
    /// A failure with the given description.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// The write half a transport exposes for direct delivery to one session.
///
/// The transport owns the sink; the session references it weakly, so a
/// transport that goes away simply stops being writable and deliveries fall
/// back to the session queue.
pub trait TransportSink: Send + Sync {
    /// Write one outbound message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportFailure`] if the write fails; the engine treats
    /// this as loss of the session's transport.
    fn try_send(&self, message: &Message) -> Result<(), TransportFailure>;
}

/// Per-request context passed explicitly through the pipeline.
///
/// Carries the identity of the transport the request arrived on instead of
/// relying on any ambient "current transport" lookup.
#[derive(Clone)]
pub struct Context {
    transport_name: String,
    sink: Option<Weak<dyn TransportSink>>,
}

impl Context {
    /// Context for a transport without a direct write path (HTTP long-poll).
    #[must_use]
    pub fn new(transport_name: impl Into<String>) -> Self {
        Self {
            transport_name: transport_name.into(),
            sink: None,
        }
    }

    /// Context for a transport with a direct write path (sockets).
    #[must_use]
    pub fn with_sink(transport_name: impl Into<String>, sink: Weak<dyn TransportSink>) -> Self {
        Self {
            transport_name: transport_name.into(),
            sink: Some(sink),
        }
    }

    /// The transport the request arrived on.
    #[must_use]
    pub fn transport_name(&self) -> &str {
        &self.transport_name
    }

    pub(crate) fn sink(&self) -> Option<Weak<dyn TransportSink>> {
        self.sink.clone()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("transport_name", &self.transport_name)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}
