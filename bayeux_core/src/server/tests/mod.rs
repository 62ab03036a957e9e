//! Pipeline tests, driven through [`BayeuxServer::process`] the way a
//! transport would drive it.

mod subscription;

use std::{sync::Arc, time::Duration};

use crate::{
    config::ServerConfig,
    message::{Message, META_CONNECT, META_HANDSHAKE, META_SUBSCRIBE},
    server::{BayeuxServer, Processed},
    session::SessionId,
    transport::Context,
};

pub(crate) fn context() -> Context {
    Context::new("long-polling")
}

pub(crate) fn server() -> Arc<BayeuxServer> {
    Arc::new(BayeuxServer::default())
}

pub(crate) fn server_with_timeout(timeout: Duration) -> Arc<BayeuxServer> {
    Arc::new(BayeuxServer::new(ServerConfig {
        timeout,
        ..ServerConfig::default()
    }))
}

/// Process a message that must not suspend, returning its replies.
pub(crate) async fn replies(server: &BayeuxServer, message: Message) -> Vec<Message> {
    match server.process(message, &context()).await {
        Processed::Replies(replies) => replies,
        Processed::Suspended(_) => panic!("unexpected suspension"),
    }
}

pub(crate) fn handshake_request() -> Message {
    let mut request = Message::new(META_HANDSHAKE.parse().unwrap());
    request.version = Some("1.0".into());
    request.supported_connection_types = Some(vec!["long-polling".into()]);
    request
}

/// Handshake and return the new session id.
pub(crate) async fn handshake(server: &BayeuxServer) -> SessionId {
    let batch = replies(server, handshake_request()).await;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].successful, Some(true));
    batch[0].client_id.expect("handshake reply carries clientId")
}

pub(crate) fn connect_request(id: SessionId) -> Message {
    let mut request = Message::new(META_CONNECT.parse().unwrap());
    request.client_id = Some(id);
    request.connection_type = Some("long-polling".into());
    request
}

/// Handshake plus the immediate first connect, leaving the session ready to
/// suspend its next connect.
pub(crate) async fn connected_session(server: &BayeuxServer) -> SessionId {
    let id = handshake(server).await;
    let batch = replies(server, connect_request(id)).await;
    assert_eq!(batch.last().and_then(|reply| reply.successful), Some(true));
    id
}

/// Subscribe a session to a channel, asserting success.
pub(crate) async fn subscribe(server: &BayeuxServer, id: SessionId, channel: &str) {
    let mut request = Message::new(META_SUBSCRIBE.parse().unwrap());
    request.client_id = Some(id);
    request.subscription = Some(channel.parse().unwrap());
    let batch = replies(server, request).await;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].successful, Some(true), "subscribe to {channel}");
}

pub(crate) fn publish_request(
    id: SessionId,
    channel: &str,
    data: serde_json::Value,
) -> Message {
    let mut request = Message::publish(channel.parse().unwrap(), data);
    request.client_id = Some(id);
    request
}

/// Publish and assert the publisher got a success reply.
pub(crate) async fn publish(
    server: &BayeuxServer,
    id: SessionId,
    channel: &str,
    data: serde_json::Value,
) {
    let batch = replies(server, publish_request(id, channel, data)).await;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].successful, Some(true), "publish to {channel}");
}

/// Drain a session's queue by issuing a connect, returning the non-reply
/// messages.
pub(crate) async fn drain(server: &BayeuxServer, id: SessionId) -> Vec<Message> {
    let mut batch = replies(server, connect_request(id)).await;
    let reply = batch.pop().expect("connect reply present");
    assert_eq!(reply.channel_path(), META_CONNECT);
    batch
}
