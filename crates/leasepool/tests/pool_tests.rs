//! Lifecycle tests for the single-slot pool: borrow accounting, idle
//! eviction, reconnect semantics, cancellation precedence, and shutdown
//! ordering.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use leasepool::{CancellationToken, ConnectionFactory, Pool, PoolError, WATCHDOG_PERIOD};
use pretty_assertions::assert_eq;
use tokio::task::yield_now;
use tokio::time;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct MockError(&'static str);

/// A cloneable connection handle whose last clone decrements the factory's
/// live-connection gauge on drop, so tests can observe "closed".
#[derive(Clone)]
struct MockConn {
    _live: Arc<LiveGuard>,
}

struct LiveGuard {
    live: Arc<AtomicUsize>,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct MockFactory {
    state: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    dials: AtomicUsize,
    probes: AtomicUsize,
    live: Arc<AtomicUsize>,
    fail_dials: AtomicUsize,
    fail_probes: AtomicUsize,
    stall_dials: AtomicBool,
}

impl MockFactory {
    fn dials(&self) -> usize {
        self.state.dials.load(Ordering::SeqCst)
    }

    fn probes(&self) -> usize {
        self.state.probes.load(Ordering::SeqCst)
    }

    /// Open logical connections (pool slot and leases share one handle).
    fn live(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    /// Fail the next `n` dial attempts.
    fn fail_dials(&self, n: usize) {
        self.state.fail_dials.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` liveness probes.
    fn fail_probes(&self, n: usize) {
        self.state.fail_probes.store(n, Ordering::SeqCst);
    }

    /// Park dial attempts until cleared.
    fn stall_dials(&self, stalled: bool) {
        self.state.stall_dials.store(stalled, Ordering::SeqCst);
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    type Connection = MockConn;
    type Error = MockError;

    async fn new_connection(&self) -> Result<MockConn, MockError> {
        self.state.dials.fetch_add(1, Ordering::SeqCst);
        while self.state.stall_dials.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        if take_one(&self.state.fail_dials) {
            return Err(MockError("dial refused"));
        }
        self.state.live.fetch_add(1, Ordering::SeqCst);
        Ok(MockConn {
            _live: Arc::new(LiveGuard {
                live: Arc::clone(&self.state.live),
            }),
        })
    }

    async fn connection_ok(&self, _conn: &MockConn) -> Result<(), MockError> {
        self.state.probes.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.state.fail_probes) {
            return Err(MockError("probe failed"));
        }
        Ok(())
    }
}

fn pool_with(factory: &MockFactory, idle_timeout: Duration) -> Pool<MockFactory> {
    Pool::new(factory.clone(), idle_timeout)
}

#[tokio::test]
async fn first_acquire_dials_and_reuse_only_probes() {
    let factory = MockFactory::default();
    let pool = pool_with(&factory, WATCHDOG_PERIOD);
    let cancel = CancellationToken::new();

    let lease = pool.acquire(&cancel).await.unwrap();
    assert_eq!(factory.dials(), 1);
    assert_eq!(factory.probes(), 0);
    drop(lease);

    let lease = pool.acquire(&cancel).await.unwrap();
    assert_eq!(factory.dials(), 1, "healthy connection must be reused");
    assert_eq!(factory.probes(), 1);
    drop(lease);

    pool.shutdown().await;
}

#[tokio::test]
async fn lease_returns_exactly_once_on_drop_or_release() {
    let factory = MockFactory::default();
    let pool = pool_with(&factory, WATCHDOG_PERIOD);
    let cancel = CancellationToken::new();

    let lease = pool.acquire(&cancel).await.unwrap();
    drop(lease);
    let stats = pool.stats();
    assert_eq!(stats.total_borrows, 1);
    assert_eq!(stats.total_returns, 1);

    let lease = pool.acquire(&cancel).await.unwrap();
    lease.release();
    let stats = pool.stats();
    assert_eq!(stats.total_borrows, 2);
    assert_eq!(stats.total_returns, 2);

    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn watchdog_never_evicts_while_borrowed() {
    let factory = MockFactory::default();
    let pool = pool_with(&factory, WATCHDOG_PERIOD);
    let cancel = CancellationToken::new();

    let lease = pool.acquire(&cancel).await.unwrap();
    for _ in 0..4 {
        time::advance(Duration::from_secs(31)).await;
        yield_now().await;
    }
    assert_eq!(factory.live(), 1, "borrowed connection must survive ticks");
    assert_eq!(pool.stats().idle_evictions, 0);

    // Once returned, the idle clock restarts and eviction happens.
    drop(lease);
    for _ in 0..3 {
        time::advance(Duration::from_secs(31)).await;
        yield_now().await;
    }
    assert_eq!(factory.live(), 0);
    assert_eq!(pool.stats().idle_evictions, 1);

    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn idle_connection_is_evicted_and_next_acquire_dials_fresh() {
    let factory = MockFactory::default();
    let pool = pool_with(&factory, Duration::from_secs(30));
    let cancel = CancellationToken::new();

    let lease = pool.acquire(&cancel).await.unwrap();
    drop(lease);
    assert_eq!(factory.live(), 1);

    for _ in 0..3 {
        time::advance(Duration::from_secs(31)).await;
        yield_now().await;
    }
    assert_eq!(factory.live(), 0, "idle connection should be discarded");
    assert_eq!(pool.stats().idle_evictions, 1);

    let lease = pool.acquire(&cancel).await.unwrap();
    assert_eq!(factory.dials(), 2, "eviction must force a fresh dial");
    drop(lease);

    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn short_idle_windows_wait_for_the_clamped_timeout() {
    let factory = MockFactory::default();
    // Requested far below the watchdog period; clamped up to it.
    let pool = pool_with(&factory, Duration::from_secs(1));
    assert_eq!(pool.idle_timeout(), WATCHDOG_PERIOD);
    let cancel = CancellationToken::new();

    let lease = pool.acquire(&cancel).await.unwrap();
    drop(lease);

    time::advance(Duration::from_secs(5)).await;
    yield_now().await;
    assert_eq!(factory.live(), 1, "clamp must keep the connection past 1s");

    pool.shutdown().await;
}

#[tokio::test]
async fn creation_failure_surfaces_factory_error_verbatim() {
    let factory = MockFactory::default();
    let pool = pool_with(&factory, WATCHDOG_PERIOD);
    let cancel = CancellationToken::new();

    factory.fail_dials(1);
    let err = pool.acquire(&cancel).await.unwrap_err();
    assert!(matches!(err, PoolError::Factory(_)));
    assert_eq!(err.to_string(), "dial refused");
    assert_eq!(pool.stats().connections_created, 0);

    // Transient: the caller's own retry succeeds.
    let lease = pool.acquire(&cancel).await.unwrap();
    assert_eq!(factory.dials(), 2);
    drop(lease);

    pool.shutdown().await;
}

#[tokio::test]
async fn failed_probe_reconnects_once_and_surfaces_the_probe_error() {
    let factory = MockFactory::default();
    let pool = pool_with(&factory, WATCHDOG_PERIOD);
    let cancel = CancellationToken::new();

    let lease = pool.acquire(&cancel).await.unwrap();
    drop(lease);

    factory.fail_probes(1);
    factory.fail_dials(1);
    let err = pool.acquire(&cancel).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "probe failed",
        "the original probe error must win over the reconnect error"
    );
    assert_eq!(factory.dials(), 2);
    assert_eq!(factory.probes(), 1);
    assert_eq!(factory.live(), 0, "the stale connection must be discarded");

    pool.shutdown().await;
}

#[tokio::test]
async fn unhealthy_reconnect_surfaces_connection_not_ok() {
    let factory = MockFactory::default();
    let pool = pool_with(&factory, WATCHDOG_PERIOD);
    let cancel = CancellationToken::new();

    let lease = pool.acquire(&cancel).await.unwrap();
    drop(lease);

    // First probe kills the existing connection, the reconnect dial
    // succeeds, and the re-probe rejects the replacement.
    factory.fail_probes(2);
    let err = pool.acquire(&cancel).await.unwrap_err();
    assert!(matches!(err, PoolError::ConnectionNotOk));
    assert_eq!(factory.dials(), 2);
    assert_eq!(factory.probes(), 2);
    assert_eq!(factory.live(), 0, "both connections must be discarded");

    pool.shutdown().await;
}

#[tokio::test]
async fn cancelled_token_wins_over_a_pending_dial() {
    let factory = MockFactory::default();
    let pool = pool_with(&factory, WATCHDOG_PERIOD);
    let cancel = CancellationToken::new();

    factory.stall_dials(true);
    let task = tokio::spawn({
        let pool = pool.clone();
        let cancel = cancel.clone();
        async move { pool.acquire(&cancel).await.map(|lease| lease.release()) }
    });
    while factory.dials() == 0 {
        yield_now().await;
    }

    cancel.cancel();
    let result = task.await.unwrap();
    assert!(matches!(result, Err(PoolError::Cancelled)));
    assert_eq!(pool.stats().connections_created, 0);
    assert_eq!(factory.live(), 0, "no connection may be left installed");

    // A fresh token acquires normally afterwards.
    factory.stall_dials(false);
    let lease = pool.acquire(&CancellationToken::new()).await.unwrap();
    drop(lease);

    pool.shutdown().await;
}

#[tokio::test]
async fn already_cancelled_token_never_reaches_the_factory() {
    let factory = MockFactory::default();
    let pool = pool_with(&factory, WATCHDOG_PERIOD);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = pool.acquire(&cancel).await.unwrap_err();
    assert!(matches!(err, PoolError::Cancelled));
    assert_eq!(factory.dials(), 0);

    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_blocks_until_the_last_lease_returns() {
    let factory = MockFactory::default();
    let pool = pool_with(&factory, WATCHDOG_PERIOD);
    let cancel = CancellationToken::new();

    let lease = pool.acquire(&cancel).await.unwrap();
    let task = tokio::spawn({
        let pool = pool.clone();
        async move { pool.shutdown().await }
    });
    for _ in 0..20 {
        yield_now().await;
    }
    assert!(
        !task.is_finished(),
        "shutdown must not return while a lease is out"
    );

    drop(lease);
    task.await.unwrap();
    assert_eq!(factory.live(), 0);
}

#[tokio::test]
async fn acquire_after_shutdown_fails_fast() {
    let factory = MockFactory::default();
    let pool = pool_with(&factory, WATCHDOG_PERIOD);
    let cancel = CancellationToken::new();

    let lease = pool.acquire(&cancel).await.unwrap();
    drop(lease);
    pool.shutdown().await;

    let dials_before = factory.dials();
    let err = pool.acquire(&cancel).await.unwrap_err();
    assert!(matches!(err, PoolError::Closing));
    assert_eq!(factory.dials(), dials_before, "factory must not be invoked");
}

#[tokio::test]
async fn shutdown_wins_over_a_dial_already_in_flight() {
    let factory = MockFactory::default();
    let pool = pool_with(&factory, WATCHDOG_PERIOD);
    let cancel = CancellationToken::new();

    factory.stall_dials(true);
    let task = tokio::spawn({
        let pool = pool.clone();
        let cancel = cancel.clone();
        async move { pool.acquire(&cancel).await.map(|lease| lease.release()) }
    });
    while factory.dials() == 0 {
        yield_now().await;
    }

    // No lease exists yet, so shutdown may complete immediately; the dial
    // that later finishes must not install its connection.
    pool.shutdown().await;
    factory.stall_dials(false);
    let result = task.await.unwrap();
    assert!(matches!(result, Err(PoolError::Closing)));
    assert_eq!(factory.live(), 0, "the raced connection must be dropped");
}

#[tokio::test]
async fn double_shutdown_does_not_deadlock() {
    let factory = MockFactory::default();
    let pool = pool_with(&factory, WATCHDOG_PERIOD);

    pool.shutdown().await;
    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn abandoned_pool_watchdog_exits_quietly() {
    let factory = MockFactory::default();
    let pool = pool_with(&factory, WATCHDOG_PERIOD);
    drop(pool);

    // The watchdog holds only a weak reference; its next wake notices the
    // pool is gone and exits rather than ticking forever.
    time::advance(Duration::from_secs(61)).await;
    yield_now().await;
}
