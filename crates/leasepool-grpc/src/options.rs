//! Factory configuration options.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tonic::Status;
use tonic::transport::Channel;

/// A user-supplied liveness probe: send one cheap RPC round trip over the
/// channel and report the measured latency, or the status that killed it.
///
/// A ping/pong RPC is the usual implementation, since the probe has to actually
/// write to the socket to prove the connection is usable.
pub type PingFn =
    Arc<dyn Fn(Channel) -> BoxFuture<'static, Result<Duration, Status>> + Send + Sync>;

/// HTTP/2 keepalive parameters applied to every dialed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveParams {
    /// Interval between keepalive pings.
    pub interval: Duration,

    /// How long to wait for a keepalive ack before treating the
    /// connection as dead.
    pub timeout: Duration,

    /// Whether to send keepalive pings with no active streams.
    pub while_idle: bool,
}

/// Options for [`MutualTlsFactory`](crate::MutualTlsFactory), applied to
/// the endpoint at construction time.
#[derive(Clone, Default)]
pub struct FactoryOptions {
    pub(crate) keepalive: Option<KeepaliveParams>,
    pub(crate) ping: Option<PingFn>,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) tls_domain: Option<String>,
}

impl FactoryOptions {
    /// Options with nothing configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set HTTP/2 keepalive parameters.
    #[must_use]
    pub fn keepalive(mut self, params: KeepaliveParams) -> Self {
        self.keepalive = Some(params);
        self
    }

    /// Probe every connection with `ping`: once after each successful dial
    /// and on every pool liveness check.
    #[must_use]
    pub fn ping(mut self, ping: PingFn) -> Self {
        self.ping = Some(ping);
        self
    }

    /// Set the dial timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Override the domain name used for TLS certificate verification when
    /// it differs from the host in the dial address.
    pub fn tls_domain(mut self, domain: impl Into<String>) -> Self {
        self.tls_domain = Some(domain.into());
        self
    }
}

impl fmt::Debug for FactoryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryOptions")
            .field("keepalive", &self.keepalive)
            .field("ping", &self.ping.is_some())
            .field("connect_timeout", &self.connect_timeout)
            .field("tls_domain", &self.tls_domain)
            .finish()
    }
}
