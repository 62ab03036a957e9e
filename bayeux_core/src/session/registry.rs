//! The live session table.
//!
//! Removal is the delicate operation here: a session can be torn down by an
//! explicit disconnect, by the expiration sweep, or because its transport
//! failed, and those paths race. The removal token on the session itself
//! ([`ServerSession::mark_removed`]) guarantees exactly one caller performs
//! the teardown; everyone else returns `false` and walks away.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    channel::registry::ChannelRegistry,
    listener::ServerListeners,
    message::{Advice, ERROR_UNKNOWN_SESSION},
    session::{ServerSession, SessionId},
    sharded_map::ShardedMap,
};

/// All sessions known to the server, keyed by id.
pub struct SessionRegistry {
    sessions: ShardedMap<SessionId, Arc<ServerSession>>,
    channels: Arc<ChannelRegistry>,
    listeners: Arc<ServerListeners>,
}

impl SessionRegistry {
    pub(crate) fn new(channels: Arc<ChannelRegistry>, listeners: Arc<ServerListeners>) -> Self {
        Self {
            sessions: ShardedMap::new(),
            channels,
            listeners,
        }
    }

    /// Register a freshly handshaken session.
    pub(crate) async fn add(&self, session: Arc<ServerSession>) {
        debug!(session_id = %session.id(), "session added");
        self.sessions.insert(session.id(), Arc::clone(&session)).await;
        self.listeners.notify_session_added(&session).await;
    }

    /// Look up a live session by id.
    pub async fn get(&self, id: &SessionId) -> Option<Arc<ServerSession>> {
        self.sessions.get_cloned(id).await
    }

    /// Tear a session down.
    ///
    /// Exactly one concurrent caller wins and performs the teardown; it gets
    /// `true`, everyone else gets `false`. The winner answers any suspended
    /// connect with an unsuccessful reply advising a new handshake, drops the
    /// session's subscriptions everywhere, and sweeps channels that became
    /// removable.
    pub async fn remove(&self, session: &Arc<ServerSession>, timed_out: bool) -> bool {
        if !session.mark_removed() {
            return false;
        }
        info!(session_id = %session.id(), timed_out, "session removed");

        self.sessions.remove(&session.id()).await;
        session
            .fail_suspended(ERROR_UNKNOWN_SESSION, Advice::handshake())
            .await;

        for channel_id in session.take_subscriptions().await {
            if let Some(channel) = self.channels.get(&channel_id).await {
                if channel.unsubscribe(session.id()).await {
                    self.listeners
                        .notify_unsubscribed(session, &channel)
                        .await;
                }
                self.channels.sweep(&channel_id).await;
            }
        }

        self.listeners.notify_session_removed(session, timed_out).await;
        true
    }

    /// Remove every session whose deadline has passed.
    ///
    /// Driven periodically by the hosting transport. Expiration loses to any
    /// concurrent removal or activity that claimed the token first.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for session in self.sessions.values().await {
            if session.is_expired(now).await && self.remove(&session, true).await {
                removed += 1;
            }
        }
        removed
    }

    /// All live sessions.
    pub async fn all(&self) -> Vec<Arc<ServerSession>> {
        self.sessions.values().await
    }

    /// The number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.len().await
    }

    /// Whether no sessions are live.
    pub async fn is_empty(&self) -> bool {
        self.sessions.is_empty().await
    }
}
