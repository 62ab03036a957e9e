//! The client session state machine.
//!
//! A [`BayeuxClient`] drives the handshake, the long-poll connect loop, and
//! the reconnect policy over any [`ClientTransport`]. The server steers the
//! loop through advice on its replies; consecutive connect failures add
//! linear backoff on top of the advised interval, and only the connect
//! exchange ever touches the backoff.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_lock::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use bayeux_core::{
    message::{
        BAYEUX_VERSION, META_CONNECT, META_DISCONNECT, META_HANDSHAKE, META_SUBSCRIBE,
        META_UNSUBSCRIBE,
    },
    Advice, ChannelId, Message, Reconnect, SessionId,
};

use crate::{
    backoff::Backoff,
    transport::{ClientTransport, TransportError},
};

/// The channel failure notifications are dispatched on.
///
/// Handlers registered here observe every failed exchange: transport errors
/// and unsuccessful replies alike. The dispatched message carries the failed
/// request's channel in its `ext` under `"channel"`.
pub const META_UNSUCCESSFUL: &str = "/meta/unsuccessful";

/// Receives messages dispatched to a subscription or a meta channel.
pub trait MessageHandler: Send + Sync {
    /// Called for each matching message, on the task driving the exchange.
    fn on_message(&self, message: &Message);
}

impl<F> MessageHandler for F
where
    F: Fn(&Message) + Send + Sync,
{
    fn on_message(&self, message: &Message) {
        self(message);
    }
}

/// Why a client operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The exchange never produced a protocol reply.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with an unsuccessful reply.
    #[error("exchange failed: {0}")]
    Unsuccessful(String),

    /// The operation needs a handshaken session.
    #[error("not connected")]
    NotConnected,

    /// The client has been closed.
    #[error("client closed")]
    Closed,
}

/// Where the client is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    /// No live session; a handshake is needed.
    Disconnected,

    /// Handshaken with this session id.
    Connected(SessionId),

    /// Closed for good; no further exchanges.
    Closed,
}

#[derive(Default)]
struct BatchState {
    depth: usize,
    outbox: Vec<Message>,
}

/// A Bayeux client over a pluggable transport.
pub struct BayeuxClient<T> {
    transport: T,
    status: Mutex<ClientStatus>,
    handlers: Mutex<Vec<(ChannelId, Arc<dyn MessageHandler>)>>,
    backoff: Mutex<Backoff>,
    advice: Mutex<Advice>,
    batch: Mutex<BatchState>,
    closed: AtomicBool,
}

impl<T: ClientTransport> BayeuxClient<T> {
    /// A client with the default backoff schedule.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self::with_backoff(transport, Backoff::default())
    }

    /// A client with a custom backoff schedule.
    #[must_use]
    pub fn with_backoff(transport: T, backoff: Backoff) -> Self {
        Self {
            transport,
            status: Mutex::new(ClientStatus::Disconnected),
            handlers: Mutex::new(Vec::new()),
            backoff: Mutex::new(backoff),
            advice: Mutex::new(Advice::default()),
            batch: Mutex::new(BatchState::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// The transport this client drives.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The current lifecycle status.
    pub async fn status(&self) -> ClientStatus {
        *self.status.lock().await
    }

    /// The session id, while connected.
    pub async fn session_id(&self) -> Option<SessionId> {
        match *self.status.lock().await {
            ClientStatus::Connected(id) => Some(id),
            _ => None,
        }
    }

    /// The current backoff pause. Zero while the connect loop is healthy.
    pub async fn backoff_delay(&self) -> Duration {
        self.backoff.lock().await.current()
    }

    /// Register a handler without a server-side subscription, typically for
    /// meta channels or [`META_UNSUCCESSFUL`].
    pub async fn add_handler(&self, channel: ChannelId, handler: Arc<dyn MessageHandler>) {
        self.handlers.lock().await.push((channel, handler));
    }

    /// Perform the handshake and store the assigned session id.
    ///
    /// Handshake failures never touch the backoff; pacing of handshake
    /// retries is the advice interval's job.
    pub async fn handshake(&self) -> Result<SessionId, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let mut request = meta_message(META_HANDSHAKE);
        request.version = Some(BAYEUX_VERSION.to_owned());
        request.supported_connection_types = Some(vec!["long-polling".to_owned()]);

        let batch = match self.transport.send(vec![request.clone()]).await {
            Ok(batch) => batch,
            Err(error) => {
                request.fail(error.to_string());
                self.fail_exchange(&request).await;
                return Err(error.into());
            }
        };
        self.absorb(&batch).await;

        let reply = batch
            .iter()
            .find(|message| message.channel_path() == META_HANDSHAKE);
        match reply {
            Some(reply) if reply.successful == Some(true) => {
                let Some(id) = reply.client_id else {
                    return Err(ClientError::Unsuccessful(
                        "handshake reply carried no clientId".to_owned(),
                    ));
                };
                info!(session_id = %id, "handshake complete");
                *self.status.lock().await = ClientStatus::Connected(id);
                self.dispatch_all(&batch).await;
                Ok(id)
            }
            Some(reply) => {
                let detail = reply.error.clone().unwrap_or_else(|| "handshake failed".to_owned());
                self.notify_unsuccessful(reply).await;
                self.dispatch_all(&batch).await;
                Err(ClientError::Unsuccessful(detail))
            }
            None => Err(ClientError::Unsuccessful(
                "no handshake reply".to_owned(),
            )),
        }
    }

    /// Perform one connect exchange, dispatching whatever arrives with it.
    ///
    /// This is the only operation that mutates the backoff: a successful
    /// exchange resets it, a transport error or unsuccessful reply grows it.
    pub async fn connect(&self) -> Result<Vec<Message>, ClientError> {
        let Some(id) = self.session_id().await else {
            return Err(ClientError::NotConnected);
        };

        let mut request = meta_message(META_CONNECT);
        request.client_id = Some(id);
        request.connection_type = Some("long-polling".to_owned());

        let batch = match self.transport.send(vec![request.clone()]).await {
            Ok(batch) => batch,
            Err(error) => {
                let pause = self.backoff.lock().await.increase();
                warn!(%error, ?pause, "connect exchange failed");
                request.fail(error.to_string());
                self.fail_exchange(&request).await;
                return Err(error.into());
            }
        };
        self.absorb(&batch).await;
        self.dispatch_all(&batch).await;

        let reply = batch
            .iter()
            .find(|message| message.channel_path() == META_CONNECT);
        match reply {
            Some(reply) if reply.successful == Some(true) => {
                self.backoff.lock().await.reset();
                Ok(batch)
            }
            _ => {
                let pause = self.backoff.lock().await.increase();
                let detail = reply
                    .and_then(|reply| reply.error.clone())
                    .unwrap_or_else(|| "connect failed".to_owned());
                warn!(error = %detail, ?pause, "connect rejected");
                if self.reconnect_directive().await == Some(Reconnect::Handshake) {
                    *self.status.lock().await = ClientStatus::Disconnected;
                }
                if let Some(reply) = reply {
                    self.notify_unsuccessful(reply).await;
                }
                Err(ClientError::Unsuccessful(detail))
            }
        }
    }

    /// Subscribe to a channel (wildcards included) and register the handler
    /// for messages arriving on it.
    pub async fn subscribe(
        &self,
        channel: ChannelId,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), ClientError> {
        let Some(id) = self.session_id().await else {
            return Err(ClientError::NotConnected);
        };

        self.handlers
            .lock()
            .await
            .push((channel.clone(), Arc::clone(&handler)));

        let mut request = meta_message(META_SUBSCRIBE);
        request.client_id = Some(id);
        request.subscription = Some(channel.clone());
        match self.exchange(request).await {
            Ok(_) => {
                debug!(channel = %channel, "subscribed");
                Ok(())
            }
            Err(error) => {
                // Roll the handler back so a retried subscribe does not
                // dispatch twice.
                self.handlers.lock().await.retain(|(pattern, registered)| {
                    pattern != &channel || !Arc::ptr_eq(registered, &handler)
                });
                Err(error)
            }
        }
    }

    /// Unsubscribe from a channel and drop its handlers.
    pub async fn unsubscribe(&self, channel: ChannelId) -> Result<(), ClientError> {
        let Some(id) = self.session_id().await else {
            return Err(ClientError::NotConnected);
        };

        let mut request = meta_message(META_UNSUBSCRIBE);
        request.client_id = Some(id);
        request.subscription = Some(channel.clone());
        self.exchange(request).await?;

        self.handlers
            .lock()
            .await
            .retain(|(pattern, _)| pattern != &channel);
        debug!(channel = %channel, "unsubscribed");
        Ok(())
    }

    /// Publish a message. Inside a batch the message is queued and sent in
    /// one exchange when the outermost batch ends.
    pub async fn publish(
        &self,
        channel: ChannelId,
        data: serde_json::Value,
    ) -> Result<(), ClientError> {
        let Some(id) = self.session_id().await else {
            return Err(ClientError::NotConnected);
        };

        let mut message = Message::publish(channel, data);
        message.client_id = Some(id);

        {
            let mut batch = self.batch.lock().await;
            if batch.depth > 0 {
                batch.outbox.push(message);
                return Ok(());
            }
        }

        self.exchange(message).await.map(|_| ())
    }

    /// Open a batch. Publishes queue locally until the outermost batch ends.
    pub async fn start_batch(&self) {
        self.batch.lock().await.depth += 1;
    }

    /// Close a batch. Closing the outermost batch sends every queued message
    /// in a single exchange, preserving publish order.
    pub async fn end_batch(&self) -> Result<(), ClientError> {
        let outbox = {
            let mut batch = self.batch.lock().await;
            batch.depth = batch.depth.saturating_sub(1);
            if batch.depth > 0 {
                return Ok(());
            }
            std::mem::take(&mut batch.outbox)
        };
        if outbox.is_empty() {
            return Ok(());
        }

        let batch = match self.transport.send(outbox.clone()).await {
            Ok(batch) => batch,
            Err(error) => {
                for mut message in outbox {
                    message.fail(error.to_string());
                    self.fail_exchange(&message).await;
                }
                return Err(error.into());
            }
        };
        self.absorb(&batch).await;
        self.dispatch_all(&batch).await;
        for reply in &batch {
            if reply.successful == Some(false) {
                self.notify_unsuccessful(reply).await;
            }
        }
        Ok(())
    }

    /// Disconnect from the server and close the client.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        if let Some(id) = self.session_id().await {
            let mut request = meta_message(META_DISCONNECT);
            request.client_id = Some(id);
            let result = self.exchange(request).await;
            self.close().await;
            result.map(|_| ())
        } else {
            self.close().await;
            Ok(())
        }
    }

    /// Close the client without a disconnect exchange. [`run`](Self::run)
    /// observes the flag and stops.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        *self.status.lock().await = ClientStatus::Closed;
    }

    /// Whether the client has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drive the client until it is closed or the server advises
    /// `reconnect: none`.
    ///
    /// Handshakes when disconnected, then issues connects back to back,
    /// pausing for the advised interval between exchanges and adding the
    /// backoff after failures.
    pub async fn run(&self) -> Result<(), ClientError> {
        while !self.is_closed() {
            match self.status().await {
                ClientStatus::Closed => break,
                ClientStatus::Disconnected => {
                    if self.handshake().await.is_err() {
                        if self.reconnect_directive().await == Some(Reconnect::None) {
                            self.close().await;
                            break;
                        }
                        tokio::time::sleep(self.handshake_pause().await).await;
                    }
                }
                ClientStatus::Connected(_) => match self.connect().await {
                    Ok(_) => {
                        tokio::time::sleep(self.interval().await).await;
                    }
                    Err(_) => {
                        if self.reconnect_directive().await == Some(Reconnect::None) {
                            self.close().await;
                            break;
                        }
                        let pause = self.interval().await + self.backoff_delay().await;
                        tokio::time::sleep(pause).await;
                    }
                },
            }
        }
        Ok(())
    }

    /// The advised pause between connect exchanges.
    pub async fn interval(&self) -> Duration {
        Duration::from_millis(self.advice.lock().await.interval.unwrap_or(0))
    }

    async fn reconnect_directive(&self) -> Option<Reconnect> {
        self.advice.lock().await.reconnect
    }

    /// Failed handshakes are paced by the advised interval, floored so a
    /// zero interval cannot spin the loop.
    async fn handshake_pause(&self) -> Duration {
        self.interval().await.max(Duration::from_millis(100))
    }

    /// One request, one matching reply. Transport errors and unsuccessful
    /// replies are announced on [`META_UNSUCCESSFUL`].
    async fn exchange(&self, request: Message) -> Result<Message, ClientError> {
        let path = request.channel_path().to_owned();
        let batch = match self.transport.send(vec![request.clone()]).await {
            Ok(batch) => batch,
            Err(error) => {
                let mut failed = request;
                failed.fail(error.to_string());
                self.fail_exchange(&failed).await;
                return Err(error.into());
            }
        };
        self.absorb(&batch).await;
        self.dispatch_all(&batch).await;

        let reply = batch
            .into_iter()
            .find(|message| message.channel_path() == path);
        match reply {
            Some(reply) if reply.successful == Some(true) => Ok(reply),
            Some(reply) => {
                let detail = reply
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("{path} failed"));
                self.notify_unsuccessful(&reply).await;
                Err(ClientError::Unsuccessful(detail))
            }
            None => Err(ClientError::Unsuccessful(format!("no reply for {path}"))),
        }
    }

    /// Merge advice from every message in a batch. Absent advice fields keep
    /// their previously received values.
    async fn absorb(&self, batch: &[Message]) {
        let mut advice = self.advice.lock().await;
        for message in batch {
            if let Some(update) = &message.advice {
                if update.reconnect.is_some() {
                    advice.reconnect = update.reconnect;
                }
                if update.interval.is_some() {
                    advice.interval = update.interval;
                }
                if update.timeout.is_some() {
                    advice.timeout = update.timeout;
                }
            }
        }
    }

    async fn dispatch_all(&self, batch: &[Message]) {
        for message in batch {
            self.dispatch(message).await;
        }
    }

    /// Hand a message to every handler whose pattern matches its channel.
    async fn dispatch(&self, message: &Message) {
        let Some(channel) = &message.channel else {
            return;
        };
        let handlers = self.handlers.lock().await.clone();
        for (pattern, handler) in &handlers {
            if pattern == channel || pattern.matches(channel) {
                handler.on_message(message);
            }
        }
    }

    /// Announce a transport-level failure.
    ///
    /// A reply that never arrived cannot be dispatched, so the synthesized
    /// failed request stands in for it: it goes to the handlers of its own
    /// channel first, then to [`META_UNSUCCESSFUL`]. Exchanges that did get
    /// an unsuccessful reply dispatch that reply instead and only call
    /// [`Self::notify_unsuccessful`].
    async fn fail_exchange(&self, failed: &Message) {
        self.dispatch(failed).await;
        self.notify_unsuccessful(failed).await;
    }

    /// Announce a failed exchange on [`META_UNSUCCESSFUL`], carrying the
    /// original channel in `ext`.
    async fn notify_unsuccessful(&self, failed: &Message) {
        let mut notice = failed.clone();
        let mut ext = notice.ext.take().unwrap_or_default();
        ext.insert(
            "channel".to_owned(),
            serde_json::Value::String(failed.channel_path().to_owned()),
        );
        notice.ext = Some(ext);
        notice.channel = ChannelId::parse(META_UNSUCCESSFUL).ok();
        notice.successful = Some(false);
        self.dispatch(&notice).await;
    }
}

/// A message addressed to one of the protocol's own channels. The constants
/// always parse; a `None` channel would be answered by the server with a
/// protocol error rather than panicking here.
fn meta_message(path: &str) -> Message {
    Message {
        channel: ChannelId::parse(path).ok(),
        ..Message::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::sync::Mutex as StdMutex;
    use testresult::TestResult;

    /// Replays a scripted sequence of exchange outcomes.
    struct Scripted {
        script: StdMutex<VecDeque<Result<Vec<Message>, TransportError>>>,
        sent: StdMutex<Vec<Vec<Message>>>,
    }

    impl Scripted {
        fn new(script: Vec<Result<Vec<Message>, TransportError>>) -> Self {
            Self {
                script: StdMutex::new(script.into()),
                sent: StdMutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<Vec<Message>> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl ClientTransport for Scripted {
        fn send(
            &self,
            messages: Vec<Message>,
        ) -> impl Future<Output = Result<Vec<Message>, TransportError>> + Send {
            self.sent.lock().unwrap().push(messages);
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::new("script exhausted")));
            async move { next }
        }
    }

    fn handshake_reply(id: SessionId) -> Message {
        let mut reply = meta_message(META_HANDSHAKE);
        reply.successful = Some(true);
        reply.client_id = Some(id);
        reply.version = Some(BAYEUX_VERSION.to_owned());
        reply
    }

    fn connect_reply(id: SessionId, successful: bool) -> Message {
        let mut reply = meta_message(META_CONNECT);
        reply.successful = Some(successful);
        reply.client_id = Some(id);
        reply
    }

    async fn connected_client(
        script: Vec<Result<Vec<Message>, TransportError>>,
    ) -> (BayeuxClient<Scripted>, SessionId) {
        let id = SessionId::random();
        let mut full = vec![Ok(vec![handshake_reply(id)])];
        full.extend(script);
        let client = BayeuxClient::new(Scripted::new(full));
        let got = client.handshake().await.expect("handshake");
        assert_eq!(got, id);
        (client, id)
    }

    #[tokio::test]
    async fn handshake_stores_the_session_id() -> TestResult {
        let (client, id) = connected_client(vec![]).await;
        assert_eq!(client.status().await, ClientStatus::Connected(id));
        assert_eq!(client.session_id().await, Some(id));
        Ok(())
    }

    #[tokio::test]
    async fn failed_handshake_leaves_the_backoff_alone() -> TestResult {
        let client = BayeuxClient::new(Scripted::new(vec![
            Err(TransportError::new("boom")),
        ]));
        assert!(client.handshake().await.is_err());
        assert_eq!(client.backoff_delay().await, Duration::ZERO);
        assert_eq!(client.status().await, ClientStatus::Disconnected);
        Ok(())
    }

    #[tokio::test]
    async fn connect_failures_grow_the_backoff_and_success_resets_it() -> TestResult {
        let id = SessionId::random();
        let (client, _) = connected_client(vec![
            Err(TransportError::new("boom")),
            Err(TransportError::new("boom")),
            Ok(vec![connect_reply(id, true)]),
        ])
        .await;

        assert!(client.connect().await.is_err());
        assert_eq!(client.backoff_delay().await, Duration::from_secs(1));
        assert!(client.connect().await.is_err());
        assert_eq!(client.backoff_delay().await, Duration::from_secs(2));
        assert!(client.connect().await.is_ok());
        assert_eq!(client.backoff_delay().await, Duration::ZERO);
        Ok(())
    }

    #[tokio::test]
    async fn non_connect_failures_never_touch_the_backoff() -> TestResult {
        let (client, _) = connected_client(vec![
            Err(TransportError::new("subscribe boom")),
            Err(TransportError::new("publish boom")),
            Err(TransportError::new("unsubscribe boom")),
        ])
        .await;

        let handler: Arc<dyn MessageHandler> = Arc::new(|_: &Message| {});
        assert!(client
            .subscribe("/echo".parse()?, handler)
            .await
            .is_err());
        assert!(client
            .publish("/echo".parse()?, serde_json::json!(1))
            .await
            .is_err());
        assert!(client.unsubscribe("/echo".parse()?).await.is_err());
        assert_eq!(client.backoff_delay().await, Duration::ZERO);
        Ok(())
    }

    #[tokio::test]
    async fn unsuccessful_connect_reply_advising_handshake_drops_the_session() -> TestResult {
        let id = SessionId::random();
        let mut terminal = connect_reply(id, false);
        terminal.error = Some("402::session unknown".to_owned());
        terminal.advice = Some(Advice::handshake());

        let (client, _) = connected_client(vec![Ok(vec![terminal])]).await;
        assert!(client.connect().await.is_err());
        assert_eq!(client.status().await, ClientStatus::Disconnected);
        assert_eq!(client.backoff_delay().await, Duration::from_secs(1));
        Ok(())
    }

    #[tokio::test]
    async fn failed_exchanges_notify_the_unsuccessful_channel() -> TestResult {
        let (client, _) = connected_client(vec![Err(TransportError::new("boom"))]).await;

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client
            .add_handler(
                META_UNSUCCESSFUL.parse()?,
                Arc::new(move |message: &Message| {
                    sink.lock().unwrap().push(message.clone());
                }),
            )
            .await;

        assert!(client.unsubscribe("/echo".parse()?).await.is_err());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].successful, Some(false));
        assert_eq!(
            seen[0].ext.as_ref().and_then(|ext| ext.get("channel")),
            Some(&serde_json::Value::String(META_UNSUBSCRIBE.to_owned()))
        );
        Ok(())
    }

    #[tokio::test]
    async fn transport_failure_fires_the_exchange_channel_handler_too() -> TestResult {
        let (client, _) = connected_client(vec![Err(TransportError::new("boom"))]).await;

        let on_unsubscribe = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&on_unsubscribe);
        client
            .add_handler(
                META_UNSUBSCRIBE.parse()?,
                Arc::new(move |message: &Message| {
                    sink.lock().unwrap().push(message.clone());
                }),
            )
            .await;
        let unsuccessful = Arc::new(StdMutex::new(0usize));
        let counter = Arc::clone(&unsuccessful);
        client
            .add_handler(
                META_UNSUCCESSFUL.parse()?,
                Arc::new(move |_: &Message| {
                    *counter.lock().unwrap() += 1;
                }),
            )
            .await;

        assert!(client.unsubscribe("/echo".parse()?).await.is_err());

        let seen = on_unsubscribe.lock().unwrap();
        assert_eq!(seen.len(), 1, "the exchange's own channel is notified");
        assert_eq!(seen[0].channel_path(), META_UNSUBSCRIBE);
        assert_eq!(seen[0].successful, Some(false));
        assert_eq!(*unsuccessful.lock().unwrap(), 1);
        assert_eq!(client.backoff_delay().await, Duration::ZERO);
        Ok(())
    }

    #[tokio::test]
    async fn failed_subscribe_rolls_the_handler_back() -> TestResult {
        let (client, _) = connected_client(vec![Err(TransportError::new("boom"))]).await;

        let handler: Arc<dyn MessageHandler> = Arc::new(|_: &Message| {});
        assert!(client
            .subscribe("/echo".parse()?, handler)
            .await
            .is_err());
        assert!(client.handlers.lock().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn wildcard_handlers_receive_matching_messages() -> TestResult {
        let (client, _) = connected_client(vec![]).await;

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client
            .add_handler(
                "/stock/**".parse()?,
                Arc::new(move |message: &Message| {
                    sink.lock().unwrap().push(message.channel_path().to_owned());
                }),
            )
            .await;

        client
            .dispatch(&Message::publish("/stock/ibm".parse()?, serde_json::json!(1)))
            .await;
        client
            .dispatch(&Message::publish(
                "/stock/nyse/ibm".parse()?,
                serde_json::json!(2),
            ))
            .await;
        client
            .dispatch(&Message::publish("/other".parse()?, serde_json::json!(3)))
            .await;

        assert_eq!(*seen.lock().unwrap(), vec!["/stock/ibm", "/stock/nyse/ibm"]);
        Ok(())
    }

    #[tokio::test]
    async fn batched_publishes_go_out_in_one_exchange_in_order() -> TestResult {
        let mut replies = Vec::new();
        for _ in 0..3 {
            let mut reply = Message::new("/batch/items".parse()?);
            reply.successful = Some(true);
            replies.push(reply);
        }
        let (client, _) = connected_client(vec![Ok(replies)]).await;

        client.start_batch().await;
        for n in 0..3 {
            client
                .publish("/batch/items".parse()?, serde_json::json!(n))
                .await?;
        }
        client.end_batch().await?;

        let sent = client.transport.sent();
        // One handshake exchange, then one batch exchange.
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].len(), 3);
        for (n, message) in sent[1].iter().enumerate() {
            assert_eq!(message.data, Some(serde_json::json!(n)));
        }
        Ok(())
    }

    #[tokio::test]
    async fn operations_require_a_session() -> TestResult {
        let client = BayeuxClient::new(Scripted::new(vec![]));
        assert_eq!(client.connect().await, Err(ClientError::NotConnected));
        assert_eq!(
            client.publish("/echo".parse()?, serde_json::json!(1)).await,
            Err(ClientError::NotConnected)
        );
        Ok(())
    }

    #[tokio::test]
    async fn disconnect_closes_the_client() -> TestResult {
        let id = SessionId::random();
        let mut reply = meta_message(META_DISCONNECT);
        reply.successful = Some(true);
        reply.client_id = Some(id);

        let (client, _) = connected_client(vec![Ok(vec![reply])]).await;
        client.disconnect().await?;
        assert_eq!(client.status().await, ClientStatus::Closed);
        assert!(client.handshake().await.is_err());
        Ok(())
    }
}
