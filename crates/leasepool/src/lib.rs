//! # Leasepool
//!
//! Lifecycle management for a single shared outbound RPC connection to one
//! logical upstream endpoint. Callers that repeatedly need "a working
//! connection right now" borrow it through a [`Lease`] without knowing how
//! to establish, health-check, recycle, or garbage-collect it.
//!
//! ## How it works
//!
//! - **One slot**: the [`Pool`] owns exactly one connection, created on
//!   demand through a [`ConnectionFactory`].
//! - **Probe before reuse**: an existing connection is liveness-checked on
//!   every acquire; a failing connection is discarded and replaced with
//!   exactly one reconnect attempt, never an internal retry loop.
//! - **Idle eviction**: a per-pool watchdog task discards the connection
//!   once it has sat unborrowed past the idle timeout.
//! - **Graceful shutdown**: [`Pool::shutdown`] refuses new borrows, waits
//!   for every outstanding lease to come back, and joins the watchdog
//!   before returning.
//! - **Cancellation**: every acquire takes a
//!   [`CancellationToken`](tokio_util::sync::CancellationToken); a token
//!   that fires mid-dial drops the dial and wins over its outcome.
//!
//! This crate is transport-agnostic. A gRPC factory built on tonic
//! (mutual TLS, keepalive, ping probes) lives in the companion
//! `leasepool-grpc` crate.
//!
//! ## Module organization
//!
//! ```text
//! leasepool/
//! ├── error/      # PoolError: the closed error set surfaced by acquire
//! ├── factory/    # ConnectionFactory: the dial/probe contract
//! └── pool/       # Pool, Lease, watchdog, stats
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod error;
pub mod factory;
pub mod pool;

pub use error::{BoxError, PoolError, PoolResult};
pub use factory::ConnectionFactory;
pub use pool::{Lease, Pool, PoolStats, WATCHDOG_PERIOD};

// Re-exported so callers don't need a direct tokio-util dependency just to
// hand acquire a token.
pub use tokio_util::sync::CancellationToken;
