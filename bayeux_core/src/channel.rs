//! Server-side channels: subscriber sets and channel-scoped listeners.

pub mod id;
pub mod registry;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_lock::Mutex;

use crate::{
    listener::{ChannelSetup, MessageListener},
    session::{id::SessionId, ServerSession},
};

use id::ChannelId;

/// A channel in the server's namespace.
///
/// The registry owns every channel by path; a channel holds its subscribers
/// strongly (sessions hold only path back-references) and its listeners in
/// registration order. Mutable state sits behind a per-channel lock so
/// activity on one channel never blocks another.
pub struct ServerChannel {
    id: ChannelId,
    persistent: AtomicBool,
    lazy: AtomicBool,
    state: Mutex<ChannelState>,
}

struct ChannelState {
    /// Subscribed sessions in subscription order.
    subscribers: Vec<Arc<ServerSession>>,

    /// Channel-scoped message listeners in registration order.
    listeners: Vec<Arc<dyn MessageListener>>,
}

impl ServerChannel {
    pub(crate) fn from_setup(setup: ChannelSetup) -> Self {
        Self {
            id: setup.id,
            persistent: AtomicBool::new(setup.persistent),
            lazy: AtomicBool::new(setup.lazy),
            state: Mutex::new(ChannelState {
                subscribers: Vec::new(),
                listeners: setup.listeners,
            }),
        }
    }

    /// The channel path.
    #[must_use]
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Whether the channel survives with no subscribers or listeners.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.persistent.load(Ordering::Acquire)
    }

    /// Mark the channel persistent (or not).
    pub fn set_persistent(&self, persistent: bool) {
        self.persistent.store(persistent, Ordering::Release);
    }

    /// Whether deliveries on this channel may be held until a non-lazy wake.
    #[must_use]
    pub fn is_lazy(&self) -> bool {
        self.lazy.load(Ordering::Acquire)
    }

    /// Mark the channel lazy (or not).
    pub fn set_lazy(&self, lazy: bool) {
        self.lazy.store(lazy, Ordering::Release);
    }

    /// Add `session` to the subscriber set.
    ///
    /// Returns `false` if the session was already subscribed.
    pub async fn subscribe(&self, session: &Arc<ServerSession>) -> bool {
        let mut state = self.state.lock().await;
        if state.subscribers.iter().any(|s| s.id() == session.id()) {
            return false;
        }
        state.subscribers.push(Arc::clone(session));
        true
    }

    /// Remove the session with `id` from the subscriber set.
    ///
    /// Returns `false` if it was not subscribed.
    pub async fn unsubscribe(&self, id: SessionId) -> bool {
        let mut state = self.state.lock().await;
        let before = state.subscribers.len();
        state.subscribers.retain(|s| s.id() != id);
        state.subscribers.len() != before
    }

    /// Snapshot of the subscriber set, in subscription order.
    pub async fn subscribers(&self) -> Vec<Arc<ServerSession>> {
        self.state.lock().await.subscribers.clone()
    }

    /// Number of subscribed sessions.
    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.subscribers.len()
    }

    /// Append a message listener.
    pub async fn add_message_listener(&self, listener: Arc<dyn MessageListener>) {
        self.state.lock().await.listeners.push(listener);
    }

    /// Snapshot of the listener chain, in registration order.
    pub async fn message_listeners(&self) -> Vec<Arc<dyn MessageListener>> {
        self.state.lock().await.listeners.clone()
    }

    /// Whether the channel is eligible for removal: non-persistent, not a
    /// meta channel, and carrying neither subscribers nor listeners.
    pub async fn is_removable(&self) -> bool {
        if self.is_persistent() || self.id.is_meta() {
            return false;
        }
        let state = self.state.lock().await;
        state.subscribers.is_empty() && state.listeners.is_empty()
    }
}

impl std::fmt::Debug for ServerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerChannel")
            .field("id", &self.id)
            .field("persistent", &self.is_persistent())
            .field("lazy", &self.is_lazy())
            .finish_non_exhaustive()
    }
}
