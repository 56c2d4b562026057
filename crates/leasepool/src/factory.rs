//! The connection factory contract.

use async_trait::async_trait;

/// Produces and health-checks connections on behalf of a [`Pool`](crate::Pool).
///
/// The pool treats this purely as an interface: it never inspects handshake,
/// credential, or transport detail, and it never distinguishes *why* a
/// factory call failed; classifying root causes is a caller concern.
///
/// # Connection handles
///
/// `Connection` is a cheaply cloneable handle in the style of
/// `tonic::transport::Channel`: the pool keeps one clone in its slot and each
/// outstanding lease carries its own. "Closing" a connection is dropping the
/// last clone, so a factory must not require an explicit close call, and a
/// failed `new_connection` cannot leak a handle: the `Result` carries either
/// the handle or the error, never both.
///
/// # Cancellation
///
/// Factory futures are raced against the caller's cancellation token by the
/// pool and dropped when it fires. Implementations should therefore be
/// drop-safe mid-operation, which every tonic/tokio dial already is.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The connection handle type produced by this factory.
    type Connection: Clone + Send + Sync + 'static;

    /// The error type for failed dials and probes.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Establish a new connection.
    ///
    /// May perform dialing, TLS handshakes, and any post-dial setup.
    async fn new_connection(&self) -> Result<Self::Connection, Self::Error>;

    /// Cheap application-level liveness probe of an existing connection.
    ///
    /// `Ok(())` means "usable right now"; any error means "treat as dead".
    async fn connection_ok(&self, conn: &Self::Connection) -> Result<(), Self::Error>;
}
