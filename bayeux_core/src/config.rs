//! Engine tuning knobs.

use std::time::Duration;

/// Server-side timing configuration.
///
/// All values have conservative defaults; construct with
/// `ServerConfig::default()` and override fields as needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// How long a connect is held open waiting for messages before an empty
    /// reply is returned. Clients may request a shorter hold via advice.
    pub timeout: Duration,

    /// The pause clients should observe between connect exchanges, advertised
    /// in handshake and connect advice.
    pub interval: Duration,

    /// How long a session may go without any activity before it is considered
    /// expired and eligible for sweeping.
    pub max_interval: Duration,

    /// Slack added on top of `max_interval` to absorb network and processing
    /// latency before declaring a session expired.
    pub max_processing: Duration,

    /// How often [`BayeuxServer::sweep`](crate::server::BayeuxServer::sweep)
    /// is expected to run. The engine does not spawn the sweeper itself; the
    /// hosting transport drives it on this cadence.
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            interval: Duration::ZERO,
            max_interval: Duration::from_secs(10),
            max_processing: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(2),
        }
    }
}
