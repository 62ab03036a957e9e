//! Flat capability interfaces for server-side events.
//!
//! Each trait stands alone: an observer implements only the capabilities it
//! cares about and registers each one separately, instead of inheriting from
//! a common listener hierarchy.

use std::sync::Arc;

use async_lock::RwLock;

use crate::{
    channel::{id::ChannelId, ServerChannel},
    message::Message,
    session::ServerSession,
};

/// Observes session lifecycle.
pub trait SessionListener: Send + Sync {
    /// A session was created by a successful handshake.
    fn session_added(&self, session: &Arc<ServerSession>);

    /// A session was torn down. `timed_out` distinguishes expiration from
    /// explicit disconnect or transport failure. Fired exactly once per
    /// session.
    fn session_removed(&self, session: &Arc<ServerSession>, timed_out: bool);
}

/// Observes channel lifecycle.
pub trait ChannelListener: Send + Sync {
    /// A channel became visible in the registry.
    fn channel_added(&self, channel: &Arc<ServerChannel>);

    /// A channel was removed from the registry.
    fn channel_removed(&self, channel: &ChannelId);
}

/// Observes subscription changes.
pub trait SubscriptionListener: Send + Sync {
    /// A session subscribed to a channel.
    fn subscribed(&self, session: &Arc<ServerSession>, channel: &Arc<ServerChannel>);

    /// A session unsubscribed from a channel.
    fn unsubscribed(&self, session: &Arc<ServerSession>, channel: &Arc<ServerChannel>);
}

/// A channel-scoped message observer, able to veto delivery.
pub trait MessageListener: Send + Sync {
    /// Invoked for every publish routed through the channel, before
    /// subscriber fan-out. Returning `false` stops the listener walk and
    /// suppresses fan-out for this message.
    fn on_message(
        &self,
        from: Option<&Arc<ServerSession>>,
        channel: &Arc<ServerChannel>,
        message: &Message,
    ) -> bool;
}

/// Configures a channel while it is being created, before it is visible to
/// any other operation.
pub trait ChannelInitializer: Send + Sync {
    /// Adjust flags or install listeners on the channel under construction.
    fn configure(&self, channel: &mut ChannelSetup);
}

/// The mutable state of a channel under construction, handed to
/// [`ChannelInitializer`]s inside the registry's creation lock.
pub struct ChannelSetup {
    /// The channel being created.
    pub id: ChannelId,

    /// Whether the channel survives with no subscribers or listeners.
    pub persistent: bool,

    /// Whether deliveries on the channel may be held until a non-lazy wake.
    pub lazy: bool,

    /// Message listeners installed before the channel becomes visible.
    pub listeners: Vec<Arc<dyn MessageListener>>,
}

/// The registered server-wide observers, shared by the registries and the
/// pipeline.
#[derive(Default)]
pub struct ServerListeners {
    pub(crate) sessions: RwLock<Vec<Arc<dyn SessionListener>>>,
    pub(crate) channels: RwLock<Vec<Arc<dyn ChannelListener>>>,
    pub(crate) subscriptions: RwLock<Vec<Arc<dyn SubscriptionListener>>>,
    pub(crate) initializers: RwLock<Vec<Arc<dyn ChannelInitializer>>>,
}

impl ServerListeners {
    pub(crate) async fn notify_session_added(&self, session: &Arc<ServerSession>) {
        for listener in self.sessions.read().await.iter() {
            listener.session_added(session);
        }
    }

    pub(crate) async fn notify_session_removed(&self, session: &Arc<ServerSession>, timed_out: bool) {
        for listener in self.sessions.read().await.iter() {
            listener.session_removed(session, timed_out);
        }
    }

    pub(crate) async fn notify_channel_added(&self, channel: &Arc<ServerChannel>) {
        for listener in self.channels.read().await.iter() {
            listener.channel_added(channel);
        }
    }

    pub(crate) async fn notify_channel_removed(&self, channel: &ChannelId) {
        for listener in self.channels.read().await.iter() {
            listener.channel_removed(channel);
        }
    }

    pub(crate) async fn notify_subscribed(
        &self,
        session: &Arc<ServerSession>,
        channel: &Arc<ServerChannel>,
    ) {
        for listener in self.subscriptions.read().await.iter() {
            listener.subscribed(session, channel);
        }
    }

    pub(crate) async fn notify_unsubscribed(
        &self,
        session: &Arc<ServerSession>,
        channel: &Arc<ServerChannel>,
    ) {
        for listener in self.subscriptions.read().await.iter() {
            listener.unsubscribed(session, channel);
        }
    }
}
