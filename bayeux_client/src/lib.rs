//! A Bayeux client session over a pluggable transport.
//!
//! The crate provides the protocol state machine only: handshake, the
//! long-poll connect loop with advice-driven reconnection and linear
//! backoff, subscriptions with wildcard-aware local dispatch, and
//! client-side batching. Plug in a [`transport::ClientTransport`] that
//! carries message arrays to a server and back.

pub mod backoff;
pub mod client;
pub mod transport;

pub use backoff::Backoff;
pub use client::{BayeuxClient, ClientError, ClientStatus, MessageHandler, META_UNSUCCESSFUL};
pub use transport::{ClientTransport, TransportError};
