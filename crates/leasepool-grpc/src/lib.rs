//! # Leasepool gRPC
//!
//! gRPC bindings for [`leasepool`]: a mutual-TLS
//! [`ConnectionFactory`](leasepool::ConnectionFactory) producing
//! `tonic::transport::Channel` handles, plus advisory classification of RPC
//! failures into connection-level versus application-level errors.
//!
//! ```no_run
//! use std::time::Duration;
//! use leasepool::{CancellationToken, Pool};
//! use leasepool_grpc::{FactoryOptions, MutualTlsFactory};
//!
//! # async fn example(ca: &[u8], cert: &[u8], key: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
//! let factory = MutualTlsFactory::new(
//!     ca,
//!     cert,
//!     key,
//!     "https://upstream.internal:7443",
//!     FactoryOptions::new().connect_timeout(Duration::from_secs(5)),
//! )?;
//! let pool = Pool::new(factory, Duration::from_secs(300));
//!
//! let lease = pool.acquire(&CancellationToken::new()).await?;
//! let channel = lease.connection().clone();
//! // hand `channel` to a generated tonic client, issue the request...
//! drop(lease);
//!
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod classify;
pub mod mtls;
pub mod options;

pub use classify::{Classified, ErrorClass, RpcError, classify, decode, is_connection_failure, status_code};
pub use mtls::{FactoryError, MutualTlsFactory};
pub use options::{FactoryOptions, KeepaliveParams, PingFn};

/// A pool of the one shared mutual-TLS channel.
pub type ChannelPool = leasepool::Pool<MutualTlsFactory>;
