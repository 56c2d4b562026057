//! Mutual-TLS connection factory for tonic channels.

use async_trait::async_trait;
use thiserror::Error;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tracing::{info, trace};

use leasepool::ConnectionFactory;

use crate::options::FactoryOptions;

/// Errors from dialing or probing a channel.
#[derive(Debug, Error)]
pub enum FactoryError {
    /// Endpoint construction, TLS setup, or dialing failed.
    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),

    /// The configured liveness probe rejected the connection.
    #[error("liveness probe failed: {0}")]
    Probe(tonic::Status),
}

/// A [`ConnectionFactory`] that dials one upstream over mutually
/// authenticated TLS.
///
/// Credential material is consumed as opaque PEM byte buffers at
/// construction time: the CA that signed the server's certificate, plus the
/// client's own certificate and private key. Keepalive, dial timeout, TLS
/// domain override, and the liveness probe come from [`FactoryOptions`].
///
/// When a ping is configured, every freshly dialed channel is probed once
/// before it is handed out, so a connection that completes its handshake
/// but cannot serve requests is rejected at the source.
#[derive(Debug, Clone)]
pub struct MutualTlsFactory {
    endpoint: Endpoint,
    dial_addr: String,
    options: FactoryOptions,
}

impl MutualTlsFactory {
    /// Build a factory for `server_address` (a URI such as
    /// `https://upstream.internal:7443`).
    ///
    /// Fails if the address is not a valid endpoint URI or the TLS
    /// configuration is rejected. The PEM buffers themselves are validated
    /// lazily, at first dial.
    pub fn new(
        ca_cert_pem: &[u8],
        client_cert_pem: &[u8],
        client_key_pem: &[u8],
        server_address: impl Into<String>,
        options: FactoryOptions,
    ) -> Result<Self, FactoryError> {
        let dial_addr = server_address.into();

        let mut tls = ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(ca_cert_pem))
            .identity(Identity::from_pem(client_cert_pem, client_key_pem));
        if let Some(domain) = &options.tls_domain {
            tls = tls.domain_name(domain.clone());
        }

        let mut endpoint = Endpoint::from_shared(dial_addr.clone())?.tls_config(tls)?;
        if let Some(keepalive) = options.keepalive {
            endpoint = endpoint
                .http2_keep_alive_interval(keepalive.interval)
                .keep_alive_timeout(keepalive.timeout)
                .keep_alive_while_idle(keepalive.while_idle);
        }
        if let Some(timeout) = options.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }

        Ok(Self {
            endpoint,
            dial_addr,
            options,
        })
    }

    /// The address this factory dials.
    #[must_use]
    pub fn dial_addr(&self) -> &str {
        &self.dial_addr
    }
}

#[async_trait]
impl ConnectionFactory for MutualTlsFactory {
    type Connection = Channel;
    type Error = FactoryError;

    async fn new_connection(&self) -> Result<Channel, FactoryError> {
        let channel = match self.endpoint.connect().await {
            Ok(channel) => channel,
            Err(err) => {
                info!(dial_addr = %self.dial_addr, error = %err, "failed to dial");
                return Err(FactoryError::Transport(err));
            }
        };

        // A handshake alone proves little; probe before handing it out.
        if let Err(err) = self.connection_ok(&channel).await {
            info!(dial_addr = %self.dial_addr, error = %err, "failed to ping freshly dialed channel");
            return Err(err);
        }

        Ok(channel)
    }

    async fn connection_ok(&self, conn: &Channel) -> Result<(), FactoryError> {
        let Some(ping) = &self.options.ping else {
            return Ok(());
        };
        let latency = ping(conn.clone()).await.map_err(FactoryError::Probe)?;
        trace!(latency_ms = latency.as_millis() as u64, "liveness probe ok");
        Ok(())
    }
}
