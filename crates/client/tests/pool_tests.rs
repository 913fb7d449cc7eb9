//! Pool lifecycle behaviour, exercised through the factory seam with an
//! in-process fake so no server is needed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use pretty_assertions::assert_eq;
use quadra_client::pool::{ConnFactory, ConnPool, PoolConfig, SessionMode};
use quadra_client::{QuadraError, QuadraResult};

#[derive(Default)]
struct Stats {
    made: AtomicUsize,
    destroyed: AtomicUsize,
    rollbacks: AtomicUsize,
    closers_run: AtomicUsize,
}

struct FakeConn {
    id: usize,
    autocommit: bool,
    dedicated: bool,
    pending_writes: usize,
    broken: bool,
    stats: Arc<Stats>,
}

impl FakeConn {
    fn write(&mut self) {
        self.pending_writes += 1;
    }

    fn rollback(&mut self) {
        self.pending_writes = 0;
        self.stats.rollbacks.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mirrors the repository factory's hook semantics over an in-memory
/// connection: rollback on activate, session-mode autocommit enforcement,
/// rollback-on-passivate for open transactions, validation by liveness.
struct FakeFactory {
    mode: SessionMode,
    next_id: AtomicUsize,
    stats: Arc<Stats>,
}

impl FakeFactory {
    fn new(mode: SessionMode) -> (Self, Arc<Stats>) {
        let stats = Arc::new(Stats::default());
        (
            Self {
                mode,
                next_id: AtomicUsize::new(0),
                stats: stats.clone(),
            },
            stats,
        )
    }
}

impl ConnFactory for FakeFactory {
    type Conn = FakeConn;

    async fn make(&self) -> QuadraResult<FakeConn> {
        self.stats.made.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConn {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            autocommit: true,
            dedicated: false,
            pending_writes: 0,
            broken: false,
            stats: self.stats.clone(),
        })
    }

    async fn activate(&self, conn: &mut FakeConn) -> QuadraResult<()> {
        conn.rollback();
        let required = self.mode.required_autocommit();
        if conn.autocommit != required {
            conn.autocommit = required;
            conn.dedicated = true;
        }
        Ok(())
    }

    async fn passivate(&self, conn: &mut FakeConn) -> QuadraResult<()> {
        if !conn.autocommit {
            conn.rollback();
        }
        Ok(())
    }

    async fn validate(&self, conn: &mut FakeConn) -> bool {
        !conn.broken
    }

    async fn destroy(&self, _conn: FakeConn) {
        self.stats.destroyed.fetch_add(1, Ordering::SeqCst);
    }

    fn force_closer(&self, _conn: &FakeConn) -> Option<BoxFuture<'static, ()>> {
        let stats = self.stats.clone();
        Some(
            async move {
                stats.closers_run.fetch_add(1, Ordering::SeqCst);
            }
            .boxed(),
        )
    }
}

fn pool_config() -> PoolConfig {
    PoolConfig::default()
}

#[tokio::test]
async fn borrow_respects_max_active_and_times_out() {
    let (factory, _) = FakeFactory::new(SessionMode::Tx);
    let pool = ConnPool::create(
        factory,
        PoolConfig {
            max_active: 2,
            max_wait: Some(Duration::from_millis(100)),
            ..pool_config()
        },
    )
    .await
    .unwrap();

    let first = pool.borrow().await.unwrap();
    let second = pool.borrow().await.unwrap();

    match pool.borrow().await {
        Err(QuadraError::PoolExhausted { waited }) => {
            assert!(waited >= Duration::from_millis(100));
        }
        other => panic!("expected pool exhaustion, got {:?}", other.map(|_| ())),
    }

    first.close().await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test]
async fn returning_a_connection_unblocks_a_waiting_borrow() {
    let (factory, stats) = FakeFactory::new(SessionMode::Shared);
    let pool = ConnPool::create(
        factory,
        PoolConfig {
            max_active: 1,
            max_wait: Some(Duration::from_secs(5)),
            ..pool_config()
        },
    )
    .await
    .unwrap();

    let first = pool.borrow().await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.borrow().await.map(|conn| conn.id) })
    };
    // Give the waiter time to queue up before releasing.
    tokio::time::sleep(Duration::from_millis(50)).await;
    first.close().await.unwrap();

    let reused_id = waiter.await.unwrap().unwrap();
    assert_eq!(reused_id, 0, "the returned connection should be reused");
    assert_eq!(stats.made.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn prewarm_parks_initial_size_connections_idle() {
    let (factory, stats) = FakeFactory::new(SessionMode::Shared);
    let pool = ConnPool::create(
        factory,
        PoolConfig {
            initial_size: 2,
            ..pool_config()
        },
    )
    .await
    .unwrap();

    assert_eq!(stats.made.load(Ordering::SeqCst), 2);
    assert_eq!(pool.num_idle().await, 2);
    assert_eq!(pool.num_active().await, 0);
}

#[tokio::test]
async fn activate_enforces_the_configured_session_mode() {
    let (factory, _) = FakeFactory::new(SessionMode::Tx);
    let pool = ConnPool::create(factory, pool_config()).await.unwrap();
    let conn = pool.borrow().await.unwrap();
    assert!(!conn.autocommit, "TX checkout must turn autocommit off");
    assert!(conn.dedicated);
    conn.close().await.unwrap();

    let (factory, _) = FakeFactory::new(SessionMode::Dedicated);
    let pool = ConnPool::create(factory, pool_config()).await.unwrap();
    let conn = pool.borrow().await.unwrap();
    assert!(conn.autocommit, "DEDICATED checkout must keep autocommit on");
    conn.close().await.unwrap();
}

#[tokio::test]
async fn passivation_rolls_back_pending_writes() {
    let (factory, stats) = FakeFactory::new(SessionMode::Tx);
    let pool = ConnPool::create(factory, pool_config()).await.unwrap();

    let mut conn = pool.borrow().await.unwrap();
    conn.write();
    assert_eq!(conn.pending_writes, 1);
    let id = conn.id;
    conn.close().await.unwrap();

    let conn = pool.borrow().await.unwrap();
    assert_eq!(conn.id, id, "same underlying connection");
    assert_eq!(
        conn.pending_writes, 0,
        "checked-in connections must not carry an open transaction"
    );
    assert!(stats.rollbacks.load(Ordering::SeqCst) >= 2);
    conn.close().await.unwrap();
}

#[tokio::test]
async fn borrow_validation_failure_evicts_instead_of_propagating() {
    let (factory, stats) = FakeFactory::new(SessionMode::Shared);
    let pool = ConnPool::create(
        factory,
        PoolConfig {
            test_on_borrow: true,
            ..pool_config()
        },
    )
    .await
    .unwrap();

    let mut conn = pool.borrow().await.unwrap();
    let broken_id = conn.id;
    // Simulate the backend dying while the connection sits idle (an
    // expired session surfaces as a failed liveness probe).
    conn.broken = true;
    conn.close().await.unwrap();

    let conn = pool.borrow().await.unwrap();
    assert_ne!(conn.id, broken_id, "the dead connection must not be handed out");
    assert_eq!(stats.destroyed.load(Ordering::SeqCst), 1);
    conn.close().await.unwrap();
}

#[tokio::test]
async fn evictor_destroys_idle_connections_that_fail_validation() {
    let (factory, stats) = FakeFactory::new(SessionMode::Shared);
    let pool = ConnPool::create(
        factory,
        PoolConfig {
            eviction_interval: Some(Duration::from_millis(30)),
            test_while_idle: true,
            ..pool_config()
        },
    )
    .await
    .unwrap();

    let mut conn = pool.borrow().await.unwrap();
    conn.broken = true;
    conn.close().await.unwrap();
    assert_eq!(pool.num_idle().await, 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(pool.num_idle().await, 0);
    assert_eq!(stats.destroyed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn evictor_maintains_min_idle() {
    let (factory, stats) = FakeFactory::new(SessionMode::Shared);
    let pool = ConnPool::create(
        factory,
        PoolConfig {
            min_idle: 2,
            eviction_interval: Some(Duration::from_millis(30)),
            ..pool_config()
        },
    )
    .await
    .unwrap();

    assert_eq!(pool.num_idle().await, 0);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(pool.num_idle().await, 2);
    assert_eq!(stats.made.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn closing_the_pool_twice_is_safe_and_fails_new_borrows() {
    let (factory, stats) = FakeFactory::new(SessionMode::Shared);
    let pool = ConnPool::create(
        factory,
        PoolConfig {
            initial_size: 1,
            ..pool_config()
        },
    )
    .await
    .unwrap();

    pool.close().await;
    pool.close().await;
    assert_eq!(stats.destroyed.load(Ordering::SeqCst), 1);

    match pool.borrow().await {
        Err(QuadraError::PoolClosed) => {}
        other => panic!("expected PoolClosed, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn connections_returned_after_close_are_destroyed() {
    let (factory, stats) = FakeFactory::new(SessionMode::Shared);
    let pool = ConnPool::create(factory, pool_config()).await.unwrap();

    let conn = pool.borrow().await.unwrap();
    pool.close().await;
    assert_eq!(stats.destroyed.load(Ordering::SeqCst), 0);

    conn.close().await.unwrap();
    assert_eq!(stats.destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(pool.num_idle().await, 0);
}

#[tokio::test]
async fn force_close_releases_sessions_of_borrowed_connections() {
    let (factory, stats) = FakeFactory::new(SessionMode::Tx);
    let pool = ConnPool::create(factory, pool_config()).await.unwrap();

    let conn = pool.borrow().await.unwrap();
    pool.force_close().await;
    assert_eq!(
        stats.closers_run.load(Ordering::SeqCst),
        1,
        "the borrowed connection's server-side session must be released"
    );

    conn.close().await.unwrap();
    assert_eq!(stats.destroyed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn detach_removes_the_connection_from_pool_accounting() {
    let (factory, stats) = FakeFactory::new(SessionMode::Shared);
    let pool = ConnPool::create(
        factory,
        PoolConfig {
            max_active: 1,
            max_wait: Some(Duration::from_millis(200)),
            ..pool_config()
        },
    )
    .await
    .unwrap();

    let conn = pool.borrow().await.unwrap();
    let owned = conn.detach().await;
    assert_eq!(pool.num_active().await, 0);

    // Capacity is free again; the detached object is ours, not the pool's.
    let second = pool.borrow().await.unwrap();
    assert_ne!(second.id, owned.id);
    assert_eq!(stats.destroyed.load(Ordering::SeqCst), 0);
    second.close().await.unwrap();
    drop(owned);
}

#[tokio::test]
async fn dropping_a_guard_returns_the_connection() {
    let (factory, stats) = FakeFactory::new(SessionMode::Shared);
    let pool = ConnPool::create(factory, pool_config()).await.unwrap();

    let conn = pool.borrow().await.unwrap();
    drop(conn);

    // The reaper processes drop-returns asynchronously.
    tokio::time::timeout(Duration::from_secs(1), async {
        while pool.num_idle().await != 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("dropped guard should land back in the pool");
    assert_eq!(stats.made.load(Ordering::SeqCst), 1);
    assert_eq!(pool.num_active().await, 0);
}
