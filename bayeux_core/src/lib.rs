//! A transport-agnostic Bayeux protocol engine.
//!
//! The engine implements the server side of the Bayeux publish/subscribe
//! protocol: the meta handshake/connect/disconnect/subscribe/unsubscribe
//! exchanges, channel-based fan-out with `*` and `**` wildcard matching,
//! long-poll suspension with single-winner race arbitration between
//! delivery, timeout, and session removal, and an extension chain that can
//! inspect, rewrite, or veto messages at every pipeline stage.
//!
//! No sockets, codecs, or tasks live here. A transport decodes frames into
//! [`message::Message`]s, feeds them through
//! [`server::BayeuxServer::process`], and encodes whatever comes back; a
//! suspended connect surfaces as a [`server::ConnectHold`] for the
//! transport to await.

pub mod channel;
pub mod config;
pub mod extension;
pub mod listener;
pub mod message;
pub mod policy;
pub mod server;
pub mod session;
pub mod sharded_map;
pub mod transport;

pub use channel::{id::ChannelId, ServerChannel};
pub use config::ServerConfig;
pub use extension::Extension;
pub use message::{Advice, Message, Reconnect};
pub use policy::{OpenPolicy, PolicyDenied, SecurityPolicy};
pub use server::{BayeuxServer, ConnectHold, Processed};
pub use session::{ServerSession, SessionId};
pub use transport::{Context, TransportFailure, TransportSink};
