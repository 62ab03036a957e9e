//! Server-side session state.
//!
//! A [`ServerSession`] owns the outbound message queue for one remote client
//! together with the suspended-connect slot that long-polling revolves
//! around. The slot is the arbitration point for every race in the engine:
//! whoever takes the suspended connect out of the slot owns the reply, and
//! sends the wake payload *while still holding the slot lock*, so a
//! concurrent party that finds the slot empty knows the payload is already
//! in flight.
//!
//! Lock order: suspended slot, then queue. Never the reverse.

pub mod id;
pub mod registry;

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use async_lock::Mutex;
use tokio::{sync::oneshot, time::Instant};
use tracing::trace;

use crate::{
    channel::id::ChannelId,
    config::ServerConfig,
    message::{Advice, Message},
    transport::TransportSink,
};

pub use id::SessionId;

/// A connect held open waiting for messages.
///
/// `reply` is the prepared connect reply, advice already baked in at suspend
/// time; `tx` wakes the held request with the full payload.
struct SuspendedConnect {
    tx: oneshot::Sender<Vec<Message>>,
    reply: Message,
}

/// The result of starting a connect exchange.
pub(crate) enum ConnectOutcome {
    /// Reply immediately with this batch; nothing was suspended.
    Immediate(Vec<Message>),
    /// The connect was suspended; the payload will arrive on this channel.
    Suspended(oneshot::Receiver<Vec<Message>>),
    /// Another connect is already suspended for this session.
    AlreadySuspended,
}

/// Where a delivered message ended up.
pub(crate) enum Offer {
    /// Appended to the session queue.
    Queued,
    /// A suspended connect was woken with the payload.
    Woke,
    /// No connect was held; deliver directly through this sink.
    Sink(Arc<dyn TransportSink>, Message),
}

/// What [`ServerSession::flush`] found to do.
pub(crate) enum Flush {
    /// A suspended connect was woken with the queued messages.
    Woke,
    /// Write these queued messages through this sink.
    Sink(Arc<dyn TransportSink>, Vec<Message>),
    /// Nothing queued, or no way to deliver; leave the queue alone.
    Idle,
}

/// One remote client's server-side state.
pub struct ServerSession {
    id: SessionId,
    queue: Mutex<Vec<Message>>,
    suspended: Mutex<Option<SuspendedConnect>>,
    batch_depth: AtomicUsize,
    connected: AtomicBool,
    removed: AtomicBool,
    deadline: Mutex<Instant>,
    subscriptions: Mutex<HashSet<ChannelId>>,
    last_advice: Mutex<Option<Advice>>,
    sink: Mutex<Option<Weak<dyn TransportSink>>>,
    max_interval: Duration,
    max_processing: Duration,
}

impl ServerSession {
    #[must_use]
    pub(crate) fn new(id: SessionId, config: &ServerConfig) -> Self {
        let deadline = Instant::now() + config.max_interval + config.max_processing;
        Self {
            id,
            queue: Mutex::new(Vec::new()),
            suspended: Mutex::new(None),
            batch_depth: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
            removed: AtomicBool::new(false),
            deadline: Mutex::new(deadline),
            subscriptions: Mutex::new(HashSet::new()),
            last_advice: Mutex::new(None),
            sink: Mutex::new(None),
            max_interval: config.max_interval,
            max_processing: config.max_processing,
        }
    }

    /// This session's identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Push the expiration deadline out from now.
    pub(crate) async fn touch(&self) {
        let mut deadline = self.deadline.lock().await;
        *deadline = Instant::now() + self.max_interval + self.max_processing;
    }

    /// Push the deadline out past a connect that will be held for `hold`.
    pub(crate) async fn touch_with_hold(&self, hold: Duration) {
        let mut deadline = self.deadline.lock().await;
        *deadline = Instant::now() + hold + self.max_interval + self.max_processing;
    }

    /// Whether the session's deadline has passed.
    pub(crate) async fn is_expired(&self, now: Instant) -> bool {
        *self.deadline.lock().await <= now
    }

    /// Record that a connect exchange has happened. Returns `true` for the
    /// first connect, which is answered immediately so the client reaches
    /// its connected state before the long poll opens.
    pub(crate) fn set_connected(&self) -> bool {
        self.connected
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the removal token. Returns `true` for exactly one caller.
    pub(crate) fn mark_removed(&self) -> bool {
        self.removed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether the session has been removed from its registry.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// Whether a connect is currently suspended.
    pub(crate) async fn is_suspended(&self) -> bool {
        self.suspended.lock().await.is_some()
    }

    /// Start a connect exchange.
    ///
    /// Replies immediately when the queue is non-empty or `immediate` is set;
    /// otherwise parks `reply` in the suspended slot and hands back the
    /// receiver the payload will arrive on. At most one connect may be
    /// suspended per session.
    pub(crate) async fn begin_connect(&self, reply: Message, immediate: bool) -> ConnectOutcome {
        let mut suspended = self.suspended.lock().await;
        if suspended.is_some() {
            return ConnectOutcome::AlreadySuspended;
        }

        let mut queue = self.queue.lock().await;
        if immediate || !queue.is_empty() {
            let mut batch: Vec<Message> = queue.drain(..).collect();
            batch.push(reply);
            return ConnectOutcome::Immediate(batch);
        }
        drop(queue);

        let (tx, rx) = oneshot::channel();
        *suspended = Some(SuspendedConnect { tx, reply });
        trace!(session_id = %self.id, "connect suspended");
        ConnectOutcome::Suspended(rx)
    }

    /// Hand one outbound message to the session.
    ///
    /// Wakes a suspended connect unless the message is lazy or a batch is
    /// open; otherwise queues it, or routes it to the transport sink when one
    /// is registered and no connect is held.
    pub(crate) async fn offer(&self, message: Message, lazy: bool) -> Offer {
        let mut suspended = self.suspended.lock().await;
        let batching = self.batch_depth.load(Ordering::Acquire) > 0;

        if let Some(held) = suspended.take() {
            if lazy || batching {
                *suspended = Some(held);
                self.queue.lock().await.push(message);
                return Offer::Queued;
            }
            let mut payload: Vec<Message> = self.queue.lock().await.drain(..).collect();
            payload.push(message);
            payload.push(held.reply);
            self.send_payload(held.tx, payload).await;
            return Offer::Woke;
        }

        if !lazy && !batching {
            if let Some(sink) = self.upgrade_sink().await {
                return Offer::Sink(sink, message);
            }
        }

        self.queue.lock().await.push(message);
        Offer::Queued
    }

    /// Drain the queue towards whichever delivery path is available.
    ///
    /// Called when a batch closes. Wakes a suspended connect with the queued
    /// messages, or hands them to the sink, or does nothing when the queue is
    /// empty or there is nowhere to send.
    pub(crate) async fn flush(&self) -> Flush {
        let mut suspended = self.suspended.lock().await;
        let mut queue = self.queue.lock().await;
        if queue.is_empty() {
            return Flush::Idle;
        }

        if let Some(held) = suspended.take() {
            let mut payload: Vec<Message> = queue.drain(..).collect();
            payload.push(held.reply);
            drop(queue);
            self.send_payload(held.tx, payload).await;
            return Flush::Woke;
        }

        if let Some(sink) = self.upgrade_sink().await {
            let payload: Vec<Message> = queue.drain(..).collect();
            return Flush::Sink(sink, payload);
        }

        Flush::Idle
    }

    /// Take back a suspended connect after its hold timed out.
    ///
    /// Returns the queued messages with the connect reply appended, or `None`
    /// if another party already emptied the slot (its payload is on the
    /// oneshot instead).
    pub(crate) async fn take_suspended(&self) -> Option<Vec<Message>> {
        let mut suspended = self.suspended.lock().await;
        let held = suspended.take()?;
        let mut batch: Vec<Message> = self.queue.lock().await.drain(..).collect();
        batch.push(held.reply);
        drop(held.tx);
        Some(batch)
    }

    /// Fail a suspended connect with an unsuccessful reply.
    ///
    /// Used when the session is removed out from under a held connect.
    /// Returns `true` if a connect was held and has now been answered.
    pub(crate) async fn fail_suspended(&self, error: &str, advice: Advice) -> bool {
        let mut suspended = self.suspended.lock().await;
        let Some(held) = suspended.take() else {
            return false;
        };
        let mut reply = held.reply;
        reply.fail(error);
        reply.advice = Some(advice);
        self.send_payload(held.tx, vec![reply]).await;
        true
    }

    /// Sends while the caller still holds the suspended-slot lock. If the
    /// receiver is gone, non-reply messages go back on the queue.
    async fn send_payload(&self, tx: oneshot::Sender<Vec<Message>>, payload: Vec<Message>) {
        if let Err(mut payload) = tx.send(payload) {
            trace!(session_id = %self.id, "connect receiver gone, requeueing");
            payload.pop(); // the connect reply
            if !payload.is_empty() {
                let mut queue = self.queue.lock().await;
                let rest = queue.drain(..).collect::<Vec<_>>();
                queue.extend(payload);
                queue.extend(rest);
            }
        }
    }

    /// Open a batch; deliveries queue instead of waking until it closes.
    pub fn start_batch(&self) {
        self.batch_depth.fetch_add(1, Ordering::AcqRel);
    }

    /// Close a batch. Returns `true` when this closed the outermost batch
    /// and the queue should be flushed. An unmatched close is ignored so the
    /// depth never wraps.
    pub(crate) fn end_batch_inner(&self) -> bool {
        let mut depth = self.batch_depth.load(Ordering::Acquire);
        loop {
            if depth == 0 {
                return false;
            }
            match self.batch_depth.compare_exchange_weak(
                depth,
                depth - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return depth == 1,
                Err(current) => depth = current,
            }
        }
    }

    /// Record a subscription. Returns `false` if it was already present.
    pub(crate) async fn add_subscription(&self, channel: ChannelId) -> bool {
        self.subscriptions.lock().await.insert(channel)
    }

    /// Drop a subscription. Returns `false` if it was not present.
    pub(crate) async fn remove_subscription(&self, channel: &ChannelId) -> bool {
        self.subscriptions.lock().await.remove(channel)
    }

    /// The channels this session is currently subscribed to.
    #[must_use]
    pub async fn subscriptions(&self) -> Vec<ChannelId> {
        self.subscriptions.lock().await.iter().cloned().collect()
    }

    /// Drain the subscription set, for teardown.
    pub(crate) async fn take_subscriptions(&self) -> Vec<ChannelId> {
        self.subscriptions.lock().await.drain().collect()
    }

    /// Suppress advice that repeats what the client last heard.
    ///
    /// Returns the advice to attach, or `None` when unchanged.
    pub(crate) async fn advice_delta(&self, advice: Advice) -> Option<Advice> {
        let mut last = self.last_advice.lock().await;
        if *last == Some(advice) {
            return None;
        }
        *last = Some(advice);
        Some(advice)
    }

    /// Register the transport's write half for direct delivery.
    pub(crate) async fn set_sink(&self, sink: Weak<dyn TransportSink>) {
        *self.sink.lock().await = Some(sink);
    }

    async fn upgrade_sink(&self) -> Option<Arc<dyn TransportSink>> {
        self.sink.lock().await.as_ref().and_then(Weak::upgrade)
    }

    #[cfg(test)]
    pub(crate) async fn queued(&self) -> usize {
        self.queue.lock().await.len()
    }
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("id", &self.id)
            .field("removed", &self.is_removed())
            .finish_non_exhaustive()
    }
}
