//! Security policy for handshake, channel creation, subscription, and
//! publish authorization.
//!
//! The policy is an explicit collaborator injected at engine construction
//! and swappable at runtime; denial details flow back to the client in the
//! failure reply of the denied exchange only, with no session or channel
//! state change.

use std::sync::Arc;

use thiserror::Error;

use crate::{channel::id::ChannelId, message::Message, session::ServerSession};

/// A policy denial, with detail the engine echoes to the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct PolicyDenied {
    reason: String,
}

impl PolicyDenied {
    /// Deny with the given client-visible reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The client-visible reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Authorization checks consulted by the pipeline.
///
/// Every check defaults to allow, so an implementation overrides only the
/// operations it restricts.
pub trait SecurityPolicy: Send + Sync {
    /// May this handshake create a session?
    fn can_handshake(&self, message: &Message) -> Result<(), PolicyDenied> {
        let _ = message;
        Ok(())
    }

    /// May `session` create the not-yet-existing `channel`?
    fn can_create(
        &self,
        session: &Arc<ServerSession>,
        channel: &ChannelId,
        message: &Message,
    ) -> Result<(), PolicyDenied> {
        let _ = (session, channel, message);
        Ok(())
    }

    /// May `session` subscribe to `channel`?
    fn can_subscribe(
        &self,
        session: &Arc<ServerSession>,
        channel: &ChannelId,
        message: &Message,
    ) -> Result<(), PolicyDenied> {
        let _ = (session, channel, message);
        Ok(())
    }

    /// May `session` publish to `channel`?
    fn can_publish(
        &self,
        session: &Arc<ServerSession>,
        channel: &ChannelId,
        message: &Message,
    ) -> Result<(), PolicyDenied> {
        let _ = (session, channel, message);
        Ok(())
    }
}

/// A policy that allows every operation.
///
/// The default when no policy is injected; suitable when authorization is
/// handled outside the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenPolicy;

impl SecurityPolicy for OpenPolicy {}
