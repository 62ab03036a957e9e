//! Message-pipeline extension hooks.

use std::sync::Arc;

use crate::{message::Message, session::ServerSession};

/// A pipeline hook that can inspect, rewrite, or veto messages at four
/// points: inbound normal, inbound meta, outbound normal, outbound meta.
///
/// Extensions run in registration order on receive and in the **same** order
/// on send (not reversed), since send-side hooks may depend on state their
/// receive-side counterparts established earlier in the chain. A `false`
/// return stops the remaining chain: vetoed inbound messages are answered
/// with a synthesized failure reply, vetoed outbound deliveries are dropped
/// silently without reaching their recipient.
///
/// All hooks default to pass-through, so an implementation overrides only
/// the points it cares about.
pub trait Extension: Send + Sync {
    /// Inbound non-meta message. `from` is the originating session, when the
    /// message names a live one.
    fn rcv(&self, from: Option<&Arc<ServerSession>>, message: &mut Message) -> bool {
        let _ = (from, message);
        true
    }

    /// Inbound meta message.
    fn rcv_meta(&self, from: Option<&Arc<ServerSession>>, message: &mut Message) -> bool {
        let _ = (from, message);
        true
    }

    /// Outbound non-meta message (replies to publishers and every fan-out
    /// delivery alike).
    fn send(&self, message: &mut Message) -> bool {
        let _ = message;
        true
    }

    /// Outbound meta reply. `to` is the session the reply is issued to, when
    /// one exists (a denied handshake has none).
    fn send_meta(&self, to: Option<&Arc<ServerSession>>, message: &mut Message) -> bool {
        let _ = (to, message);
        true
    }
}
