//! Pool error types.

use thiserror::Error;

/// Boxed error type for factory implementations that do not have a
/// dedicated error enum of their own.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for pool operations, generic over the factory's error type
pub type PoolResult<T, E> = std::result::Result<T, PoolError<E>>;

/// Errors surfaced by [`Pool::acquire`](crate::Pool::acquire).
///
/// This is a closed set: factory and probe failures pass through verbatim in
/// [`PoolError::Factory`], and everything else describes a decision the pool
/// itself made. Transport-specific detail (status codes, dial errors) never
/// appears here; it stays behind the [`ConnectionFactory`](crate::ConnectionFactory)
/// boundary.
#[derive(Debug, Error)]
pub enum PoolError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The pool has begun shutting down and will never serve this caller
    /// again.
    #[error("pool is closing")]
    Closing,

    /// A freshly reconnected connection failed its liveness probe.
    ///
    /// Distinct from a plain creation failure: the pool healed the
    /// connection slot and the replacement was still unusable, which
    /// usually means the endpoint itself is unhealthy and worth backing
    /// off on.
    #[error("connection not ok")]
    ConnectionNotOk,

    /// The caller's cancellation token fired.
    ///
    /// Takes precedence over any in-flight factory outcome: a dial or
    /// probe result observed after cancellation is discarded.
    #[error("acquire cancelled")]
    Cancelled,

    /// The factory failed to create or probe a connection; the original
    /// error is passed through verbatim.
    #[error(transparent)]
    Factory(#[from] E),
}

impl<E> PoolError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Whether this error is terminal for the pool (no retry will ever
    /// succeed against this pool instance).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closing)
    }
}
