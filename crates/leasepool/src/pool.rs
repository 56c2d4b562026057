//! The single-slot connection pool: acquire/release, idle eviction, and
//! graceful shutdown.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::error::{PoolError, PoolResult};
use crate::factory::ConnectionFactory;

/// How often the watchdog wakes to check for an idle connection.
///
/// Also the minimum allowed idle timeout: anything shorter is silently
/// clamped up to this value at construction.
pub const WATCHDOG_PERIOD: Duration = Duration::from_secs(30);

/// Counters describing the pool's activity since construction.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Connections successfully created by the factory.
    pub connections_created: u64,

    /// Connections discarded by the watchdog after sitting idle.
    pub idle_evictions: u64,

    /// Leases handed out.
    pub total_borrows: u64,

    /// Leases returned.
    pub total_returns: u64,
}

/// Mutable pool state, guarded by the state lock.
struct Slot<C> {
    /// The shared connection handle; `None` when absent.
    conn: Option<C>,

    /// When the borrower count last reached zero. Meaningless while
    /// borrowers are outstanding.
    idle_since: Instant,

    /// Monotonic false to true; once set, acquire always fails and no new
    /// connection is ever installed.
    closing: bool,

    stats: PoolStats,
}

struct PoolInner<F: ConnectionFactory> {
    factory: F,
    idle_timeout: Duration,

    /// Guards every state transition. Never held across an await.
    state: Mutex<Slot<F::Connection>>,

    /// Serializes the acquire decision (including its factory awaits) so
    /// two callers cannot race to replace the shared connection, and so
    /// the watchdog never evicts mid-decision.
    acquire_gate: tokio::sync::Mutex<()>,

    /// Outstanding borrower count. Shutdown waits for it to reach zero.
    borrowers: watch::Sender<usize>,

    /// Stops the watchdog task.
    shutdown: CancellationToken,

    /// Join handle for the watchdog, taken exactly once by shutdown.
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

/// Lifecycle manager for a single shared connection to one upstream
/// endpoint.
///
/// The pool owns one connection slot. [`acquire`](Pool::acquire) validates
/// or (re)creates the connection through a [`ConnectionFactory`] and hands
/// out a [`Lease`]; dropping the lease returns the borrow. A background
/// watchdog task, spawned at construction and stopped by
/// [`shutdown`](Pool::shutdown), discards the connection once it has been
/// idle past the configured timeout.
///
/// `Pool` is a cheap handle: clone it freely across tasks. It must be
/// created inside a Tokio runtime because it spawns the watchdog
/// immediately.
pub struct Pool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.state.lock();
        f.debug_struct("Pool")
            .field("idle_timeout", &self.inner.idle_timeout)
            .field("connected", &slot.conn.is_some())
            .field("closing", &slot.closing)
            .field("borrowers", &*self.inner.borrowers.borrow())
            .finish()
    }
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create a pool around `factory` and spawn its watchdog.
    ///
    /// An `idle_timeout` shorter than [`WATCHDOG_PERIOD`] is silently
    /// clamped up to it.
    #[must_use]
    pub fn new(factory: F, idle_timeout: Duration) -> Self {
        let idle_timeout = if idle_timeout < WATCHDOG_PERIOD {
            debug!(
                requested_ms = idle_timeout.as_millis() as u64,
                clamped_ms = WATCHDOG_PERIOD.as_millis() as u64,
                "idle timeout below watchdog period, clamping"
            );
            WATCHDOG_PERIOD
        } else {
            idle_timeout
        };

        let (borrowers, _) = watch::channel(0usize);
        let inner = Arc::new(PoolInner {
            factory,
            idle_timeout,
            state: Mutex::new(Slot {
                conn: None,
                idle_since: Instant::now(),
                closing: false,
                stats: PoolStats::default(),
            }),
            acquire_gate: tokio::sync::Mutex::new(()),
            borrowers,
            shutdown: CancellationToken::new(),
            watchdog: Mutex::new(None),
        });

        let handle = spawn_watchdog(&inner);
        *inner.watchdog.lock() = Some(handle);

        Self { inner }
    }

    /// Borrow the shared connection, creating or healing it as needed.
    ///
    /// An existing connection is probed first; on probe failure the pool
    /// discards it and attempts exactly one reconnect. If the reconnect
    /// dial fails, the *original probe error* is surfaced; the caller
    /// should see why the connection was deemed unusable, not why recovery
    /// failed. If the reconnected connection fails its own probe, the
    /// distinct [`PoolError::ConnectionNotOk`] is surfaced instead. The
    /// pool never retries further; retry and backoff policy belong to the
    /// caller.
    ///
    /// `cancel` is observed throughout: once it fires, the pending dial or
    /// probe is dropped and [`PoolError::Cancelled`] is returned, and no
    /// reconnection is attempted under a cancelled token.
    pub async fn acquire(&self, cancel: &CancellationToken) -> PoolResult<Lease<F>, F::Error> {
        let _gate = tokio::select! {
            guard = self.inner.acquire_gate.lock() => guard,
            () = cancel.cancelled() => return Err(PoolError::Cancelled),
        };

        if self.inner.state.lock().closing {
            return Err(PoolError::Closing);
        }
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        let existing = self.inner.state.lock().conn.clone();
        let conn = match existing {
            None => self.dial(cancel).await?,
            Some(conn) => match self.probe(cancel, &conn).await {
                Ok(()) => conn,
                Err(PoolError::Cancelled) => return Err(PoolError::Cancelled),
                Err(probe_err) => {
                    info!(error = %probe_err, "existing connection failed liveness probe");
                    self.inner.state.lock().conn = None;
                    drop(conn);

                    info!("attempting reconnect");
                    let fresh = match self.dial(cancel).await {
                        Ok(fresh) => fresh,
                        Err(PoolError::Cancelled) => return Err(PoolError::Cancelled),
                        Err(redial_err) => {
                            info!(error = %redial_err, "reconnect failed");
                            return Err(probe_err);
                        }
                    };
                    match self.probe(cancel, &fresh).await {
                        Ok(()) => fresh,
                        Err(PoolError::Cancelled) => return Err(PoolError::Cancelled),
                        Err(reprobe_err) => {
                            info!(error = %reprobe_err, "reconnected connection not ok, closing");
                            drop(fresh);
                            return Err(PoolError::ConnectionNotOk);
                        }
                    }
                }
            },
        };

        let mut slot = self.inner.state.lock();
        if slot.closing {
            // Shutdown began while we were dialing; it wins.
            return Err(PoolError::Closing);
        }
        slot.conn = Some(conn.clone());
        slot.stats.total_borrows += 1;
        self.inner.borrowers.send_modify(|count| *count += 1);
        trace!(borrowers = *self.inner.borrowers.borrow(), "connection leased");

        Ok(Lease {
            conn,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Shut the pool down.
    ///
    /// Ordered and blocking: marks the pool closing and discards the
    /// current connection, stops the watchdog, waits for every outstanding
    /// lease to be returned, then waits for the watchdog task to exit.
    /// Acquire calls issued after this starts fail fast with
    /// [`PoolError::Closing`]. Calling it twice is harmless.
    pub async fn shutdown(&self) {
        {
            let mut slot = self.inner.state.lock();
            slot.closing = true;
            slot.conn = None;
        }
        self.inner.shutdown.cancel();

        debug!("pool closing, waiting for outstanding leases");
        let mut rx = self.inner.borrowers.subscribe();
        let _ = rx.wait_for(|&count| count == 0).await;

        let handle = self.inner.watchdog.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        debug!("pool closed");
    }

    /// Activity counters since construction.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.state.lock().stats.clone()
    }

    /// The effective (post-clamp) idle timeout.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.inner.idle_timeout
    }

    /// Race a factory dial against the cancellation token.
    async fn dial(&self, cancel: &CancellationToken) -> PoolResult<F::Connection, F::Error> {
        let result = tokio::select! {
            result = self.inner.factory.new_connection() => result,
            () = cancel.cancelled() => return Err(PoolError::Cancelled),
        };
        match result {
            Ok(conn) => {
                self.inner.state.lock().stats.connections_created += 1;
                trace!("opened new connection from factory");
                Ok(conn)
            }
            // Cancellation observed alongside a dial failure wins.
            Err(_) if cancel.is_cancelled() => Err(PoolError::Cancelled),
            Err(err) => Err(PoolError::Factory(err)),
        }
    }

    /// Race a liveness probe against the cancellation token.
    ///
    /// Cancellation wins even over a successful probe: a cancelled caller
    /// must not proceed into reconnection.
    async fn probe(
        &self,
        cancel: &CancellationToken,
        conn: &F::Connection,
    ) -> PoolResult<(), F::Error> {
        let result = tokio::select! {
            result = self.inner.factory.connection_ok(conn) => result,
            () = cancel.cancelled() => return Err(PoolError::Cancelled),
        };
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }
        result.map_err(PoolError::Factory)
    }
}

impl<F: ConnectionFactory> PoolInner<F> {
    /// One watchdog wake: evict the connection if it has sat idle past the
    /// timeout with no borrowers. Skips the wake entirely if an acquire is
    /// mid-decision.
    fn evict_idle(&self) {
        let Ok(_gate) = self.acquire_gate.try_lock() else {
            return;
        };
        let mut slot = self.state.lock();
        trace!("watchdog checking idle connection");
        if slot.conn.is_none() {
            return;
        }
        if *self.borrowers.borrow() > 0 {
            return;
        }
        if slot.idle_since.elapsed() > self.idle_timeout {
            slot.conn = None;
            slot.stats.idle_evictions += 1;
            trace!("idle connection closed");
        }
    }
}

/// Spawn the per-pool watchdog task.
///
/// The task holds only a weak reference to the pool internals: if every
/// pool handle is dropped without a shutdown call, the next wake notices
/// and the task exits instead of keeping the pool alive forever.
fn spawn_watchdog<F: ConnectionFactory>(inner: &Arc<PoolInner<F>>) -> JoinHandle<()> {
    let weak: Weak<PoolInner<F>> = Arc::downgrade(inner);
    let shutdown = inner.shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = time::interval(WATCHDOG_PERIOD);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = shutdown.cancelled() => break,
            }
            let Some(inner) = weak.upgrade() else { break };
            inner.evict_idle();
        }
        trace!("pool watchdog exiting");
    })
}

/// A borrow token granting shared use of the pool's connection.
///
/// Access the connection through [`connection`](Lease::connection) or
/// `Deref`. The borrow is returned when the lease is dropped (or via the
/// explicit [`release`](Lease::release)); move semantics make double
/// release and use-after-release unrepresentable. Returning the borrow
/// never fails and never blocks on I/O.
pub struct Lease<F: ConnectionFactory> {
    conn: F::Connection,
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Lease<F> {
    /// The leased connection handle.
    #[must_use]
    pub fn connection(&self) -> &F::Connection {
        &self.conn
    }

    /// Return the borrow explicitly. Equivalent to dropping the lease.
    pub fn release(self) {
        drop(self);
    }
}

impl<F: ConnectionFactory> Deref for Lease<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<F: ConnectionFactory> fmt::Debug for Lease<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> Drop for Lease<F> {
    fn drop(&mut self) {
        let mut slot = self.inner.state.lock();
        self.inner
            .borrowers
            .send_modify(|count| *count = count.saturating_sub(1));
        if *self.inner.borrowers.borrow() == 0 {
            slot.idle_since = Instant::now();
        }
        slot.stats.total_returns += 1;
        trace!(borrowers = *self.inner.borrowers.borrow(), "connection returned");
    }
}
