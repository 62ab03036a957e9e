use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use testresult::TestResult;

use super::{connected_session, replies, server, subscribe};
use crate::{
    channel::ServerChannel,
    listener::SubscriptionListener,
    message::{
        Message, ERROR_SUBSCRIPTION_INVALID, ERROR_SUBSCRIPTION_MISSING, ERROR_UNKNOWN_SESSION,
        META_SUBSCRIBE, META_UNSUBSCRIBE,
    },
    policy::{PolicyDenied, SecurityPolicy},
    session::{ServerSession, SessionId},
};

fn subscribe_request(id: SessionId, channel: &str) -> Message {
    let mut request = Message::new(META_SUBSCRIBE.parse().unwrap());
    request.client_id = Some(id);
    request.subscription = Some(channel.parse().unwrap());
    request
}

fn unsubscribe_request(id: SessionId, channel: &str) -> Message {
    let mut request = Message::new(META_UNSUBSCRIBE.parse().unwrap());
    request.client_id = Some(id);
    request.subscription = Some(channel.parse().unwrap());
    request
}

#[tokio::test]
async fn subscribe_creates_the_channel_and_echoes_the_subscription() -> TestResult {
    let server = server();
    let id = connected_session(&server).await;

    let batch = replies(&server, subscribe_request(id, "/news/today")).await;
    assert_eq!(batch[0].successful, Some(true));
    assert_eq!(
        batch[0].subscription.as_ref().map(|s| s.as_str()),
        Some("/news/today")
    );

    let channel = server
        .channel(&"/news/today".parse()?)
        .await
        .expect("channel created by subscription");
    assert_eq!(channel.subscriber_count().await, 1);

    let session = server.session(&id).await.expect("session live");
    assert_eq!(session.subscriptions().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn subscribe_requires_a_session() -> TestResult {
    let server = server();
    let batch = replies(
        &server,
        subscribe_request(SessionId::random(), "/news/today"),
    )
    .await;
    assert_eq!(batch[0].successful, Some(false));
    assert_eq!(batch[0].error.as_deref(), Some(ERROR_UNKNOWN_SESSION));
    Ok(())
}

#[tokio::test]
async fn subscribe_requires_a_subscription_field() -> TestResult {
    let server = server();
    let id = connected_session(&server).await;

    let mut request = Message::new(META_SUBSCRIBE.parse()?);
    request.client_id = Some(id);
    let batch = replies(&server, request).await;
    assert_eq!(batch[0].successful, Some(false));
    assert_eq!(batch[0].error.as_deref(), Some(ERROR_SUBSCRIPTION_MISSING));
    Ok(())
}

#[tokio::test]
async fn meta_channels_cannot_be_subscribed() -> TestResult {
    let server = server();
    let id = connected_session(&server).await;
    let batch = replies(&server, subscribe_request(id, "/meta/connect")).await;
    assert_eq!(batch[0].successful, Some(false));
    assert_eq!(batch[0].error.as_deref(), Some(ERROR_SUBSCRIPTION_INVALID));
    Ok(())
}

#[tokio::test]
async fn repeated_subscribe_is_idempotent() -> TestResult {
    let server = server();
    let id = connected_session(&server).await;

    subscribe(&server, id, "/news/today").await;
    subscribe(&server, id, "/news/today").await;

    let channel = server
        .channel(&"/news/today".parse()?)
        .await
        .expect("channel exists");
    assert_eq!(channel.subscriber_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn unsubscribe_succeeds_even_when_not_subscribed() -> TestResult {
    let server = server();
    let id = connected_session(&server).await;

    let batch = replies(&server, unsubscribe_request(id, "/news/today")).await;
    assert_eq!(batch[0].successful, Some(true));
    assert_eq!(
        batch[0].subscription.as_ref().map(|s| s.as_str()),
        Some("/news/today")
    );
    Ok(())
}

#[tokio::test]
async fn unsubscribe_sweeps_the_emptied_channel() -> TestResult {
    let server = server();
    let id = connected_session(&server).await;

    subscribe(&server, id, "/news/today").await;
    assert!(server.channel(&"/news/today".parse()?).await.is_some());

    let batch = replies(&server, unsubscribe_request(id, "/news/today")).await;
    assert_eq!(batch[0].successful, Some(true));
    assert!(
        server.channel(&"/news/today".parse()?).await.is_none(),
        "non-persistent channel removed once empty"
    );
    Ok(())
}

#[tokio::test]
async fn persistent_channels_survive_the_last_unsubscribe() -> TestResult {
    let server = server();
    let id = connected_session(&server).await;

    server.create_channel(&"/news/today".parse()?, true).await;
    subscribe(&server, id, "/news/today").await;
    replies(&server, unsubscribe_request(id, "/news/today")).await;

    assert!(server.channel(&"/news/today".parse()?).await.is_some());
    Ok(())
}

struct MembersOnly;

impl SecurityPolicy for MembersOnly {
    fn can_subscribe(
        &self,
        _session: &Arc<ServerSession>,
        _channel: &crate::channel::id::ChannelId,
        _message: &Message,
    ) -> Result<(), PolicyDenied> {
        Err(PolicyDenied::new("members only"))
    }
}

#[tokio::test]
async fn policy_denial_fails_the_subscribe() -> TestResult {
    let server = server();
    let id = connected_session(&server).await;
    server.set_security_policy(Arc::new(MembersOnly)).await;

    let batch = replies(&server, subscribe_request(id, "/news/today")).await;
    assert_eq!(batch[0].successful, Some(false));
    assert_eq!(batch[0].error.as_deref(), Some("403::members only"));
    assert!(server.channel(&"/news/today".parse()?).await.is_none());
    Ok(())
}

struct CountingSubscriptions {
    subscribed: AtomicUsize,
    unsubscribed: AtomicUsize,
}

impl SubscriptionListener for CountingSubscriptions {
    fn subscribed(&self, _session: &Arc<ServerSession>, _channel: &Arc<ServerChannel>) {
        self.subscribed.fetch_add(1, Ordering::SeqCst);
    }

    fn unsubscribed(&self, _session: &Arc<ServerSession>, _channel: &Arc<ServerChannel>) {
        self.unsubscribed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn subscription_listeners_fire_on_changes_only() -> TestResult {
    let server = server();
    let id = connected_session(&server).await;

    let counting = Arc::new(CountingSubscriptions {
        subscribed: AtomicUsize::new(0),
        unsubscribed: AtomicUsize::new(0),
    });
    server
        .add_subscription_listener(Arc::clone(&counting) as Arc<dyn SubscriptionListener>)
        .await;

    subscribe(&server, id, "/news/today").await;
    subscribe(&server, id, "/news/today").await;
    replies(&server, unsubscribe_request(id, "/news/today")).await;
    replies(&server, unsubscribe_request(id, "/news/today")).await;

    assert_eq!(counting.subscribed.load(Ordering::SeqCst), 1);
    assert_eq!(counting.unsubscribed.load(Ordering::SeqCst), 1);
    Ok(())
}
