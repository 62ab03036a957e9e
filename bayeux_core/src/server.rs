//! The protocol engine: the message pipeline and the meta handler table.
//!
//! Transports decode inbound frames and feed each message through
//! [`BayeuxServer::process`]. The engine owns no sockets and spawns no
//! tasks of its own; a suspended connect is returned to the transport as a
//! [`ConnectHold`] future to await, and session expiration is driven by the
//! transport calling [`BayeuxServer::sweep`] on a cadence.

#[cfg(test)]
mod tests;

use std::{collections::HashSet, sync::Arc, time::Duration};

use async_lock::RwLock;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::{
    channel::{id::ChannelId, registry::ChannelRegistry, ServerChannel},
    config::ServerConfig,
    extension::Extension,
    listener::{
        ChannelInitializer, ChannelListener, ServerListeners, SessionListener,
        SubscriptionListener,
    },
    message::{
        Advice, Message, BAYEUX_VERSION, ERROR_CHANNEL_MISSING, ERROR_CONNECT_PENDING,
        ERROR_MESSAGE_VETOED, ERROR_SUBSCRIPTION_INVALID, ERROR_SUBSCRIPTION_MISSING,
        ERROR_UNKNOWN_META_CHANNEL, ERROR_UNKNOWN_SESSION, META_CONNECT, META_DISCONNECT,
        META_HANDSHAKE, META_SUBSCRIBE, META_UNSUBSCRIBE,
    },
    policy::{OpenPolicy, SecurityPolicy},
    session::{registry::SessionRegistry, ConnectOutcome, Flush, Offer, ServerSession, SessionId},
    transport::{Context, TransportFailure},
};

/// The outcome of processing one inbound message.
pub enum Processed {
    /// Reply to the request with these messages now.
    Replies(Vec<Message>),

    /// A connect was suspended; await the hold for the eventual payload.
    Suspended(ConnectHold),
}

/// A suspended connect, waiting for messages or the hold timeout.
///
/// The transport awaits [`ConnectHold::wait`]; whatever happens to the
/// session in the meantime (delivery, removal, expiration), exactly one
/// payload comes out.
pub struct ConnectHold {
    rx: oneshot::Receiver<Vec<Message>>,
    session: Arc<ServerSession>,
    hold: Duration,
}

impl ConnectHold {
    /// The session whose connect is held.
    #[must_use]
    pub fn session(&self) -> &Arc<ServerSession> {
        &self.session
    }

    /// Wait until the connect is woken or the hold expires.
    ///
    /// On expiry, whoever empties the suspended slot first owns the reply:
    /// if we take it back we return the queue plus the prepared reply, and
    /// if a concurrent deliverer or removal got there first its payload is
    /// already sitting on the channel.
    pub async fn wait(mut self) -> Vec<Message> {
        match tokio::time::timeout(self.hold, &mut self.rx).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(_)) => Vec::new(),
            Err(_) => match self.session.take_suspended().await {
                Some(batch) => batch,
                None => self.rx.try_recv().unwrap_or_default(),
            },
        }
    }
}

/// The Bayeux engine.
///
/// Owns the channel and session registries, the extension chain, the
/// listener sets, and the security policy. Shared behind an [`Arc`] by every
/// transport of the host.
pub struct BayeuxServer {
    config: ServerConfig,
    channels: Arc<ChannelRegistry>,
    sessions: SessionRegistry,
    listeners: Arc<ServerListeners>,
    extensions: RwLock<Vec<Arc<dyn Extension>>>,
    policy: RwLock<Arc<dyn SecurityPolicy>>,
}

impl BayeuxServer {
    /// An engine with the given timing configuration and an open policy.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let listeners = Arc::new(ServerListeners::default());
        let channels = Arc::new(ChannelRegistry::new(Arc::clone(&listeners)));
        let sessions = SessionRegistry::new(Arc::clone(&channels), Arc::clone(&listeners));
        Self {
            config,
            channels,
            sessions,
            listeners,
            extensions: RwLock::new(Vec::new()),
            policy: RwLock::new(Arc::new(OpenPolicy)),
        }
    }

    /// The timing configuration the engine was built with.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run one inbound message through the pipeline.
    ///
    /// Transports call this once per element of the decoded message array
    /// and concatenate the replies. Only a `/meta/connect` can come back
    /// [`Processed::Suspended`].
    pub async fn process(&self, message: Message, context: &Context) -> Processed {
        let Some(channel_id) = message.channel.clone() else {
            return Processed::Replies(vec![message.failed_reply(ERROR_CHANNEL_MISSING)]);
        };

        let session = match message.client_id {
            Some(id) => self.sessions.get(&id).await,
            None => None,
        };
        if let Some(session) = &session {
            session.touch().await;
        }

        trace!(
            channel = %channel_id,
            transport = context.transport_name(),
            "processing inbound message"
        );

        // A vetoed meta exchange is answered so the client is not left
        // hanging; a vetoed publish is discarded without a reply.
        let mut message = message;
        if !self.receive_chain(session.as_ref(), &mut message).await {
            if channel_id.is_meta() {
                return Processed::Replies(vec![message.failed_reply(ERROR_MESSAGE_VETOED)]);
            }
            return Processed::Replies(Vec::new());
        }

        if channel_id.is_meta() {
            return self.process_meta(&channel_id, session, message, context).await;
        }

        Processed::Replies(self.handle_publish(session, message).await)
    }

    async fn process_meta(
        &self,
        channel_id: &ChannelId,
        session: Option<Arc<ServerSession>>,
        message: Message,
        context: &Context,
    ) -> Processed {
        match channel_id.as_str() {
            META_HANDSHAKE => {
                let (to, reply) = self.handle_handshake(message, context).await;
                Processed::Replies(self.send_meta_chain(to.as_ref(), reply).await)
            }
            META_CONNECT => self.handle_connect(session, message, context).await,
            META_DISCONNECT => {
                let reply = self.handle_disconnect(session.as_ref(), &message).await;
                Processed::Replies(self.send_meta_chain(session.as_ref(), reply).await)
            }
            META_SUBSCRIBE => {
                let reply = self.handle_subscribe(session.as_ref(), &message).await;
                Processed::Replies(self.send_meta_chain(session.as_ref(), reply).await)
            }
            META_UNSUBSCRIBE => {
                let reply = self.handle_unsubscribe(session.as_ref(), &message).await;
                Processed::Replies(self.send_meta_chain(session.as_ref(), reply).await)
            }
            _ => {
                let reply = message.failed_reply(ERROR_UNKNOWN_META_CHANNEL);
                Processed::Replies(self.send_meta_chain(session.as_ref(), reply).await)
            }
        }
    }

    async fn handle_handshake(
        &self,
        request: Message,
        context: &Context,
    ) -> (Option<Arc<ServerSession>>, Message) {
        if let Err(denied) = self.policy.read().await.can_handshake(&request) {
            debug!(reason = denied.reason(), "handshake denied");
            let mut reply = request.failed_reply(format!("403::{}", denied.reason()));
            reply.advice = Some(Advice::none());
            return (None, reply);
        }

        let session = Arc::new(ServerSession::new(SessionId::random(), &self.config));
        if let Some(sink) = context.sink() {
            session.set_sink(sink).await;
        }
        self.sessions.add(Arc::clone(&session)).await;

        let mut reply = request.reply();
        reply.client_id = Some(session.id());
        reply.version = Some(BAYEUX_VERSION.to_owned());
        reply.supported_connection_types = Some(vec![context.transport_name().to_owned()]);
        reply.advice = Some(self.retry_advice(self.config.timeout));
        (Some(session), reply)
    }

    async fn handle_connect(
        &self,
        session: Option<Arc<ServerSession>>,
        request: Message,
        context: &Context,
    ) -> Processed {
        let Some(session) = session else {
            let mut reply = request.failed_reply(ERROR_UNKNOWN_SESSION);
            reply.advice = Some(Advice::handshake());
            return Processed::Replies(self.send_meta_chain(None, reply).await);
        };

        // A duplicate connect is rejected before it can disturb the deadline,
        // the connected flag, or the advice bookkeeping of the held one.
        if session.is_suspended().await {
            let reply = request.failed_reply(ERROR_CONNECT_PENDING);
            return Processed::Replies(self.send_meta_chain(Some(&session), reply).await);
        }

        if let Some(sink) = context.sink() {
            session.set_sink(sink).await;
        }

        // The hold honors a client advice hint but never exceeds the
        // configured timeout.
        let hold = request
            .advice
            .as_ref()
            .and_then(|advice| advice.timeout)
            .map_or(self.config.timeout, |hint| {
                self.config.timeout.min(Duration::from_millis(hint))
            });

        let mut reply = request.reply();
        reply.advice = session.advice_delta(self.retry_advice(hold)).await;

        let immediate = session.set_connected();
        session.touch_with_hold(hold).await;

        let mut replies = self.send_meta_chain(Some(&session), reply).await;
        let Some(reply) = replies.pop() else {
            return Processed::Replies(Vec::new());
        };

        match session.begin_connect(reply, immediate).await {
            ConnectOutcome::Immediate(batch) => Processed::Replies(batch),
            ConnectOutcome::AlreadySuspended => {
                let reply = request.failed_reply(ERROR_CONNECT_PENDING);
                Processed::Replies(self.send_meta_chain(Some(&session), reply).await)
            }
            ConnectOutcome::Suspended(rx) => Processed::Suspended(ConnectHold {
                rx,
                session,
                hold,
            }),
        }
    }

    async fn handle_disconnect(
        &self,
        session: Option<&Arc<ServerSession>>,
        request: &Message,
    ) -> Message {
        let Some(session) = session else {
            return request.failed_reply(ERROR_UNKNOWN_SESSION);
        };
        self.sessions.remove(session, false).await;
        let mut reply = request.reply();
        reply.advice = Some(Advice::none());
        reply
    }

    async fn handle_subscribe(
        &self,
        session: Option<&Arc<ServerSession>>,
        request: &Message,
    ) -> Message {
        let Some(session) = session else {
            return request.failed_reply(ERROR_UNKNOWN_SESSION);
        };
        let Some(subscription) = request.subscription.clone() else {
            return request.failed_reply(ERROR_SUBSCRIPTION_MISSING);
        };
        if subscription.is_meta() {
            return request.failed_reply(ERROR_SUBSCRIPTION_INVALID);
        }

        let policy = self.policy.read().await;
        if let Err(denied) = policy.can_subscribe(session, &subscription, request) {
            return request.failed_reply(format!("403::{}", denied.reason()));
        }
        if self.channels.get(&subscription).await.is_none() {
            if let Err(denied) = policy.can_create(session, &subscription, request) {
                return request.failed_reply(format!("403::{}", denied.reason()));
            }
        }
        drop(policy);

        // A concurrent sweep can remove the channel between creation and
        // subscription; retry until the subscribed channel is the one the
        // registry holds.
        loop {
            let channel = self.channels.get_or_create(&subscription, false).await;
            let changed = channel.subscribe(session).await;
            match self.channels.get(&subscription).await {
                Some(current) if Arc::ptr_eq(&current, &channel) => {
                    if changed {
                        session.add_subscription(subscription.clone()).await;
                        self.listeners.notify_subscribed(session, &channel).await;
                    }
                    break;
                }
                _ => continue,
            }
        }

        let mut reply = request.reply();
        reply.subscription = Some(subscription);
        reply
    }

    async fn handle_unsubscribe(
        &self,
        session: Option<&Arc<ServerSession>>,
        request: &Message,
    ) -> Message {
        let Some(session) = session else {
            return request.failed_reply(ERROR_UNKNOWN_SESSION);
        };
        let Some(subscription) = request.subscription.clone() else {
            return request.failed_reply(ERROR_SUBSCRIPTION_MISSING);
        };

        // Idempotent: unsubscribing from a channel the session is not
        // subscribed to (or that no longer exists) still succeeds.
        session.remove_subscription(&subscription).await;
        if let Some(channel) = self.channels.get(&subscription).await {
            if channel.unsubscribe(session.id()).await {
                self.listeners.notify_unsubscribed(session, &channel).await;
            }
            self.channels.sweep(&subscription).await;
        }

        let mut reply = request.reply();
        reply.subscription = Some(subscription);
        reply
    }

    async fn handle_publish(
        &self,
        session: Option<Arc<ServerSession>>,
        request: Message,
    ) -> Vec<Message> {
        let Some(session) = session else {
            return vec![request.failed_reply(ERROR_UNKNOWN_SESSION)];
        };
        // Channel presence was checked in `process`.
        let Some(channel_id) = request.channel.clone() else {
            return vec![request.failed_reply(ERROR_CHANNEL_MISSING)];
        };
        if channel_id.is_wild() {
            return vec![request.failed_reply(ERROR_MESSAGE_VETOED)];
        }

        let policy = self.policy.read().await;
        if let Err(denied) = policy.can_publish(&session, &channel_id, &request) {
            return vec![request.failed_reply(format!("403::{}", denied.reason()))];
        }
        if self.channels.get(&channel_id).await.is_none() {
            if let Err(denied) = policy.can_create(&session, &channel_id, &request) {
                return vec![request.failed_reply(format!("403::{}", denied.reason()))];
            }
        }
        drop(policy);

        let mut reply = request.reply();
        self.route(Some(&session), request).await;
        // A channel created just for this publish does not linger.
        self.channels.sweep(&channel_id).await;
        if !self.send_chain(&mut reply).await {
            debug!(channel = %channel_id, "publish reply vetoed");
            return Vec::new();
        }
        vec![reply]
    }

    async fn send_chain(&self, message: &mut Message) -> bool {
        for extension in self.extensions.read().await.iter() {
            if !extension.send(message) {
                return false;
            }
        }
        true
    }

    /// Route a publish through channel listeners and, for non-service
    /// channels, fan it out to the subscribers of the concrete channel and
    /// of every matching wildcard channel, deduplicated, each recipient at
    /// most once.
    async fn route(&self, from: Option<&Arc<ServerSession>>, message: Message) {
        let Some(channel_id) = message.channel.clone() else {
            return;
        };
        let channel = self.channels.get_or_create(&channel_id, false).await;

        // Listener walk over the concrete channel first, then the wilds,
        // most specific first. Any veto suppresses fan-out entirely.
        let mut observing = vec![Arc::clone(&channel)];
        for wild in channel_id.wilds() {
            if let Some(wild_channel) = self.channels.get(&wild).await {
                observing.push(wild_channel);
            }
        }
        for observer in &observing {
            for listener in observer.message_listeners().await {
                if !listener.on_message(from, observer, &message) {
                    debug!(channel = %channel_id, "publish vetoed by listener");
                    return;
                }
            }
        }

        if channel_id.is_service() {
            return;
        }

        let lazy = channel.is_lazy();
        let mut seen = HashSet::new();
        for observer in &observing {
            for subscriber in observer.subscribers().await {
                if seen.insert(subscriber.id()) {
                    self.deliver_to(&subscriber, message.clone(), lazy).await;
                }
            }
        }
    }

    /// Deliver a message to one session through the outbound extension
    /// chain. A vetoed delivery is dropped for that recipient only.
    async fn deliver_to(&self, to: &Arc<ServerSession>, mut message: Message, lazy: bool) {
        if !self.send_chain(&mut message).await {
            trace!(session_id = %to.id(), "delivery vetoed by extension");
            return;
        }

        match to.offer(message, lazy).await {
            Offer::Queued | Offer::Woke => {}
            Offer::Sink(sink, message) => {
                if let Err(failure) = sink.try_send(&message) {
                    self.notify_transport_failure(to, &failure).await;
                }
            }
        }
    }

    /// Deliver a message directly to one session, outside any publish
    /// fan-out. Laziness follows the target channel's flag when the channel
    /// is registered.
    pub async fn deliver(&self, to: &Arc<ServerSession>, message: Message) {
        let lazy = match &message.channel {
            Some(id) => self
                .channels
                .get(id)
                .await
                .is_some_and(|channel| channel.is_lazy()),
            None => false,
        };
        self.deliver_to(to, message, lazy).await;
    }

    /// Publish a message originated by the server itself.
    pub async fn publish(&self, message: Message) {
        self.route(None, message).await;
    }

    /// Open a delivery batch for a session. Messages offered while the
    /// batch is open queue instead of waking the held connect.
    pub fn start_batch(&self, session: &Arc<ServerSession>) {
        session.start_batch();
    }

    /// Close a delivery batch. Closing the outermost batch flushes the
    /// queue in one payload.
    pub async fn end_batch(&self, session: &Arc<ServerSession>) {
        if !session.end_batch_inner() {
            return;
        }
        match session.flush().await {
            Flush::Woke | Flush::Idle => {}
            Flush::Sink(sink, payload) => {
                for message in &payload {
                    if let Err(failure) = sink.try_send(message) {
                        self.notify_transport_failure(session, &failure).await;
                        return;
                    }
                }
            }
        }
    }

    /// Tear down a session whose transport failed.
    ///
    /// Loses gracefully to any concurrent removal; the session is gone
    /// either way.
    pub async fn notify_transport_failure(
        &self,
        session: &Arc<ServerSession>,
        cause: &TransportFailure,
    ) {
        warn!(session_id = %session.id(), %cause, "transport failure, removing session");
        self.sessions.remove(session, false).await;
    }

    /// Remove expired sessions and channels that have become removable.
    ///
    /// The hosting transport drives this on
    /// [`ServerConfig::sweep_interval`].
    pub async fn sweep(&self) -> usize {
        let removed = self.sessions.sweep().await;
        for channel in self.channels.all().await {
            self.channels.sweep(channel.id()).await;
        }
        removed
    }

    async fn receive_chain(
        &self,
        from: Option<&Arc<ServerSession>>,
        message: &mut Message,
    ) -> bool {
        let meta = message.is_meta();
        for extension in self.extensions.read().await.iter() {
            let passed = if meta {
                extension.rcv_meta(from, message)
            } else {
                extension.rcv(from, message)
            };
            if !passed {
                debug!(channel = message.channel_path(), "inbound message vetoed");
                return false;
            }
        }
        true
    }

    /// Run the outbound meta chain over a reply. A veto drops the reply.
    async fn send_meta_chain(
        &self,
        to: Option<&Arc<ServerSession>>,
        mut reply: Message,
    ) -> Vec<Message> {
        for extension in self.extensions.read().await.iter() {
            if !extension.send_meta(to, &mut reply) {
                debug!(channel = reply.channel_path(), "meta reply vetoed");
                return Vec::new();
            }
        }
        vec![reply]
    }

    fn retry_advice(&self, hold: Duration) -> Advice {
        Advice::retry(
            u64::try_from(self.config.interval.as_millis()).unwrap_or(u64::MAX),
            u64::try_from(hold.as_millis()).unwrap_or(u64::MAX),
        )
    }

    /// Look up a live session.
    pub async fn session(&self, id: &SessionId) -> Option<Arc<ServerSession>> {
        self.sessions.get(id).await
    }

    /// All live sessions.
    pub async fn sessions(&self) -> Vec<Arc<ServerSession>> {
        self.sessions.all().await
    }

    /// Look up a channel.
    pub async fn channel(&self, id: &ChannelId) -> Option<Arc<ServerChannel>> {
        self.channels.get(id).await
    }

    /// Create (or fetch) a channel, optionally persistent.
    pub async fn create_channel(&self, id: &ChannelId, persistent: bool) -> Arc<ServerChannel> {
        self.channels.get_or_create(id, persistent).await
    }

    /// Append an extension to the pipeline chain.
    pub async fn add_extension(&self, extension: Arc<dyn Extension>) {
        self.extensions.write().await.push(extension);
    }

    /// Register a session lifecycle observer.
    pub async fn add_session_listener(&self, listener: Arc<dyn SessionListener>) {
        self.listeners.sessions.write().await.push(listener);
    }

    /// Register a channel lifecycle observer.
    pub async fn add_channel_listener(&self, listener: Arc<dyn ChannelListener>) {
        self.listeners.channels.write().await.push(listener);
    }

    /// Register a subscription observer.
    pub async fn add_subscription_listener(&self, listener: Arc<dyn SubscriptionListener>) {
        self.listeners.subscriptions.write().await.push(listener);
    }

    /// Register a channel initializer, run inside the creation lock of
    /// every channel created afterwards.
    pub async fn add_channel_initializer(&self, initializer: Arc<dyn ChannelInitializer>) {
        self.listeners.initializers.write().await.push(initializer);
    }

    /// Replace the security policy.
    pub async fn set_security_policy(&self, policy: Arc<dyn SecurityPolicy>) {
        *self.policy.write().await = policy;
    }
}

impl Default for BayeuxServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}
