//! The channel registry: path-keyed ownership of every channel.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_lock::Mutex;

use crate::{
    listener::{ChannelSetup, ServerListeners},
    sharded_map::ShardedMap,
};

use super::{id::ChannelId, ServerChannel};

/// Owns all channels, keyed by path.
///
/// Creation runs channel initializers while the per-shard creation lock is
/// held, so no publish or subscribe can observe a half-initialized channel.
pub struct ChannelRegistry {
    channels: ShardedMap<ChannelId, Arc<ServerChannel>>,
    children: Mutex<HashMap<ChannelId, HashSet<ChannelId>>>,
    listeners: Arc<ServerListeners>,
}

impl ChannelRegistry {
    pub(crate) fn new(listeners: Arc<ServerListeners>) -> Self {
        Self {
            channels: ShardedMap::new(),
            children: Mutex::new(HashMap::new()),
            listeners,
        }
    }

    /// Look up an existing channel.
    pub async fn get(&self, id: &ChannelId) -> Option<Arc<ServerChannel>> {
        self.channels.get_cloned(id).await
    }

    /// Get the channel at `id`, creating it if absent.
    ///
    /// A newly created channel is configured by every registered
    /// [`crate::listener::ChannelInitializer`] before it becomes visible;
    /// `channel_added` fires after publication.
    pub async fn get_or_create(&self, id: &ChannelId, persistent: bool) -> Arc<ServerChannel> {
        let initializers = self.listeners.initializers.read().await.clone();
        let (channel, created) = self
            .channels
            .get_or_insert_with(id.clone(), || {
                let mut setup = ChannelSetup {
                    id: id.clone(),
                    persistent,
                    lazy: false,
                    listeners: Vec::new(),
                };
                for initializer in &initializers {
                    initializer.configure(&mut setup);
                }
                Arc::new(ServerChannel::from_setup(setup))
            })
            .await;

        if created {
            if let Some(parent) = id.parent() {
                self.children
                    .lock()
                    .await
                    .entry(parent)
                    .or_default()
                    .insert(id.clone());
            }
            tracing::debug!(channel = %id, persistent, "channel created");
            self.listeners.notify_channel_added(&channel).await;
        }
        channel
    }

    /// Remove the channel at `id`, detaching it from its parent.
    ///
    /// Children of the removed channel keep their own entries; they are
    /// still registered and each cleans up its parent link when it goes.
    /// Silently does nothing if the channel is already gone.
    pub async fn remove(&self, id: &ChannelId) {
        if self.channels.remove(id).await.is_none() {
            return;
        }
        let mut children = self.children.lock().await;
        if let Some(parent) = id.parent() {
            if let Some(siblings) = children.get_mut(&parent) {
                siblings.remove(id);
                if siblings.is_empty() {
                    children.remove(&parent);
                }
            }
        }
        drop(children);

        tracing::debug!(channel = %id, "channel removed");
        self.listeners.notify_channel_removed(id).await;
    }

    /// Remove the channel at `id` if it is removable (non-persistent, no
    /// subscribers, no listeners).
    pub async fn sweep(&self, id: &ChannelId) {
        let Some(channel) = self.get(id).await else {
            return;
        };
        if channel.is_removable().await {
            self.remove(id).await;
        }
    }

    /// Direct children of `id` currently in the registry.
    pub async fn children(&self, id: &ChannelId) -> Vec<ChannelId> {
        self.children
            .lock()
            .await
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every channel currently in the registry.
    pub async fn all(&self) -> Vec<Arc<ServerChannel>> {
        self.channels.values().await
    }

    /// Number of channels in the registry.
    pub async fn len(&self) -> usize {
        self.channels.len().await
    }

    /// Whether the registry holds no channels.
    pub async fn is_empty(&self) -> bool {
        self.channels.is_empty().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::listener::{ChannelInitializer, ChannelListener, MessageListener};
    use crate::message::Message;
    use crate::session::ServerSession;

    fn registry() -> ChannelRegistry {
        ChannelRegistry::new(Arc::new(ServerListeners::default()))
    }

    fn id(path: &str) -> ChannelId {
        path.parse().expect("valid channel")
    }

    #[tokio::test]
    async fn get_or_create_returns_the_same_channel() {
        let registry = registry();
        let a = registry.get_or_create(&id("/a/b"), false).await;
        let b = registry.get_or_create(&id("/a/b"), true).await;
        assert!(Arc::ptr_eq(&a, &b));
        // The second call must not flip persistence of the existing channel.
        assert!(!b.is_persistent());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = registry();
        registry.get_or_create(&id("/a"), false).await;

        registry.remove(&id("/a")).await;
        assert!(registry.get(&id("/a")).await.is_none());
        registry.remove(&id("/a")).await;
    }

    #[tokio::test]
    async fn children_track_creation_and_removal() {
        let registry = registry();
        registry.get_or_create(&id("/a/b"), false).await;
        registry.get_or_create(&id("/a/c"), false).await;

        let mut children = registry.children(&id("/a")).await;
        children.sort();
        assert_eq!(children, vec![id("/a/b"), id("/a/c")]);

        registry.remove(&id("/a/b")).await;
        assert_eq!(registry.children(&id("/a")).await, vec![id("/a/c")]);
    }

    #[tokio::test]
    async fn removing_a_channel_keeps_its_surviving_children_listed() {
        let registry = registry();
        registry.get_or_create(&id("/a/b"), false).await;
        registry.get_or_create(&id("/a/b/c"), false).await;

        registry.remove(&id("/a/b")).await;
        assert!(registry.get(&id("/a/b/c")).await.is_some());
        assert_eq!(registry.children(&id("/a/b")).await, vec![id("/a/b/c")]);

        // Once the grandchild itself goes, the entry is cleaned up.
        registry.remove(&id("/a/b/c")).await;
        assert!(registry.children(&id("/a/b")).await.is_empty());
    }

    #[tokio::test]
    async fn sweep_removes_only_removable_channels() {
        let registry = registry();
        registry.get_or_create(&id("/a"), true).await;
        registry.sweep(&id("/a")).await;
        assert!(registry.get(&id("/a")).await.is_some());

        registry.get_or_create(&id("/b"), false).await;
        registry.sweep(&id("/b")).await;
        assert!(registry.get(&id("/b")).await.is_none());
    }

    struct CountingInitializer(AtomicUsize);

    impl ChannelInitializer for CountingInitializer {
        fn configure(&self, channel: &mut ChannelSetup) {
            self.0.fetch_add(1, Ordering::SeqCst);
            channel.lazy = true;
            channel.listeners.push(Arc::new(NoopListener));
        }
    }

    struct NoopListener;

    impl MessageListener for NoopListener {
        fn on_message(
            &self,
            _from: Option<&Arc<ServerSession>>,
            _channel: &Arc<ServerChannel>,
            _message: &Message,
        ) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn initializers_run_once_before_publication() {
        let listeners = Arc::new(ServerListeners::default());
        let initializer = Arc::new(CountingInitializer(AtomicUsize::new(0)));
        listeners.initializers.write().await.push(initializer.clone());

        let registry = ChannelRegistry::new(listeners);
        let channel = registry.get_or_create(&id("/init"), false).await;
        registry.get_or_create(&id("/init"), false).await;

        assert_eq!(initializer.0.load(Ordering::SeqCst), 1);
        assert!(channel.is_lazy());
        assert_eq!(channel.message_listeners().await.len(), 1);
    }

    struct RecordingChannelListener {
        added: AtomicUsize,
        removed: AtomicUsize,
    }

    impl ChannelListener for RecordingChannelListener {
        fn channel_added(&self, _channel: &Arc<ServerChannel>) {
            self.added.fetch_add(1, Ordering::SeqCst);
        }

        fn channel_removed(&self, _channel: &ChannelId) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn channel_listeners_observe_lifecycle() {
        let listeners = Arc::new(ServerListeners::default());
        let recorder = Arc::new(RecordingChannelListener {
            added: AtomicUsize::new(0),
            removed: AtomicUsize::new(0),
        });
        listeners.channels.write().await.push(recorder.clone());

        let registry = ChannelRegistry::new(listeners);
        registry.get_or_create(&id("/x"), false).await;
        registry.get_or_create(&id("/x"), false).await;
        registry.remove(&id("/x")).await;
        registry.remove(&id("/x")).await;

        assert_eq!(recorder.added.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.removed.load(Ordering::SeqCst), 1);
    }
}
