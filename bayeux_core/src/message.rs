//! The Bayeux protocol message shape shared by server and client.
//!
//! A [`Message`] is the decoded form of one element of a Bayeux message
//! array. Wire framing and JSON codec concerns live in the transports; the
//! engine only ever sees decoded messages.

use serde::{Deserialize, Serialize};

use crate::{channel::id::ChannelId, session::id::SessionId};

/// The handshake meta channel.
pub const META_HANDSHAKE: &str = "/meta/handshake";

/// The long-poll connect meta channel.
pub const META_CONNECT: &str = "/meta/connect";

/// The disconnect meta channel.
pub const META_DISCONNECT: &str = "/meta/disconnect";

/// The subscribe meta channel.
pub const META_SUBSCRIBE: &str = "/meta/subscribe";

/// The unsubscribe meta channel.
pub const META_UNSUBSCRIBE: &str = "/meta/unsubscribe";

/// Failure detail for a message that carries no channel field.
pub const ERROR_CHANNEL_MISSING: &str = "400::channel missing";

/// Failure detail for a `clientId` that names no live session.
pub const ERROR_UNKNOWN_SESSION: &str = "402::session unknown";

/// Failure detail for a message vetoed by an extension or policy.
pub const ERROR_MESSAGE_VETOED: &str = "403::message vetoed";

/// Failure detail for a (un)subscribe without a `subscription` field.
pub const ERROR_SUBSCRIPTION_MISSING: &str = "403::subscription missing";

/// Failure detail for a subscription to a meta channel.
pub const ERROR_SUBSCRIPTION_INVALID: &str = "403::cannot subscribe to meta channel";

/// Failure detail for a meta channel outside the handler table.
pub const ERROR_UNKNOWN_META_CHANNEL: &str = "404::unknown meta channel";

/// Failure detail for a second meta-connect while one is suspended.
pub const ERROR_CONNECT_PENDING: &str = "409::connect already pending";

/// The protocol version advertised in handshake replies.
pub const BAYEUX_VERSION: &str = "1.0";

/// A single decoded Bayeux message.
///
/// Every field except the channel is optional on the wire, and the channel
/// is kept optional here too so that a malformed inbound message can still
/// be represented and answered with a protocol-error reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Message {
    /// The channel this message concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelId>,

    /// The session that originated the message, or the session a meta reply
    /// was issued to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<SessionId>,

    /// Correlation id echoed from request to reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Application payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// The channel being (un)subscribed, on `/meta/(un)subscribe` exchanges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<ChannelId>,

    /// Whether a meta exchange succeeded. Only present on replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,

    /// Failure detail, in `code::text` form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Retry guidance carried on meta replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,

    /// Extension data bag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<serde_json::Map<String, serde_json::Value>>,

    /// Protocol version, on handshake exchanges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Transports the peer supports, on handshake exchanges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_connection_types: Option<Vec<String>>,

    /// The transport in use, on connect exchanges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
}

impl Message {
    /// Create an empty message addressed to `channel`.
    #[must_use]
    pub fn new(channel: ChannelId) -> Self {
        Self {
            channel: Some(channel),
            ..Self::default()
        }
    }

    /// Create a publish message with a payload.
    #[must_use]
    pub fn publish(channel: ChannelId, data: serde_json::Value) -> Self {
        Self {
            channel: Some(channel),
            data: Some(data),
            ..Self::default()
        }
    }

    /// Whether this message addresses a `/meta/...` channel.
    #[must_use]
    pub fn is_meta(&self) -> bool {
        self.channel.as_ref().is_some_and(ChannelId::is_meta)
    }

    /// The channel path, for logging.
    #[must_use]
    pub fn channel_path(&self) -> &str {
        self.channel.as_ref().map_or("<none>", ChannelId::as_str)
    }

    /// Build a successful reply to this message, echoing `channel`, `id`
    /// and `clientId`.
    #[must_use]
    pub fn reply(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            client_id: self.client_id,
            id: self.id.clone(),
            successful: Some(true),
            ..Self::default()
        }
    }

    /// Build a failure reply to this message with the given error detail.
    #[must_use]
    pub fn failed_reply(&self, error: impl Into<String>) -> Self {
        Self {
            channel: self.channel.clone(),
            client_id: self.client_id,
            id: self.id.clone(),
            successful: Some(false),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Mark this message as failed with the given error detail.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.successful = Some(false);
        self.error = Some(error.into());
    }
}

/// Server guidance on how the client should retry or reconnect.
///
/// Absent fields mean "keep the previously received value".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Advice {
    /// What the client should do after the current exchange.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<Reconnect>,

    /// Milliseconds the client should wait before the next connect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,

    /// Milliseconds the server will hold a connect before replying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl Advice {
    /// Advice telling the client to keep issuing connects.
    #[must_use]
    pub const fn retry(interval: u64, timeout: u64) -> Self {
        Self {
            reconnect: Some(Reconnect::Retry),
            interval: Some(interval),
            timeout: Some(timeout),
        }
    }

    /// Advice telling the client its session is gone and it must handshake.
    #[must_use]
    pub const fn handshake() -> Self {
        Self {
            reconnect: Some(Reconnect::Handshake),
            interval: None,
            timeout: None,
        }
    }

    /// Advice telling the client not to reconnect at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            reconnect: Some(Reconnect::None),
            interval: None,
            timeout: None,
        }
    }
}

/// The `reconnect` directive of an [`Advice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reconnect {
    /// Issue another connect after `interval`.
    Retry,

    /// The session is gone; perform a new handshake.
    Handshake,

    /// Stop reconnecting.
    None,
}
