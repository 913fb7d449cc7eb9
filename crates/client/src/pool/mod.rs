//! Pooling for repository connections.
//!
//! The pool wraps a [`ConnFactory`] with checkout/checkin/validation
//! lifecycle hooks:
//!
//! ```no_run
//! # async fn demo() -> quadra_client::QuadraResult<()> {
//! use quadra_client::pool::{ConnConfig, ConnPool, PoolConfig, RepoConnFactory, SessionMode};
//! use url::Url;
//!
//! let factory = RepoConnFactory::new(
//!     ConnConfig::builder()
//!         .server_url(Url::parse("http://localhost:10035").unwrap())
//!         .username("test")
//!         .password("xyzzy")
//!         .repository("my_repo")
//!         .session(SessionMode::Tx)
//!         .build()
//!         .unwrap(),
//! );
//! let pool = ConnPool::create(factory, PoolConfig::default()).await?;
//! let conn = pool.borrow().await?;
//! conn.size(&[]).await?;
//! conn.commit().await?;
//! conn.close().await?; // returns to the pool
//! # Ok(())
//! # }
//! ```
//!
//! Borrowed connections are guards whose `close()` (or drop) returns them
//! to the pool instead of closing the socket; `detach()` unwraps the
//! underlying client for code that needs its identity. Closing the pool is
//! important because backend sessions stay alive server-side until their
//! lifetime elapses.

pub mod config;
pub mod factory;

use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{QuadraError, QuadraResult};

pub use config::{ConnConfig, PoolConfig, SessionMode};
pub use factory::{ConnFactory, RepoConnFactory};

struct IdleConn<C> {
    conn: C,
    idle_since: Instant,
}

struct PoolState<C> {
    idle: VecDeque<IdleConn<C>>,
    /// Connections currently borrowed (or being created for a borrow).
    active: usize,
    /// Idle connections temporarily pulled out for validation; they still
    /// count against capacity.
    reserved: usize,
    closed: bool,
}

struct PoolInner<F: ConnFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Conn>>,
    notify: Notify,
    return_tx: UnboundedSender<(u64, F::Conn)>,
    /// Detached session closers for borrowed connections, keyed by guard
    /// id; force-close runs these for connections it cannot own.
    closers: Mutex<HashMap<u64, BoxFuture<'static, ()>>>,
    next_id: AtomicU64,
    evictor: Mutex<Option<JoinHandle<()>>>,
    signal_hook: Mutex<Option<JoinHandle<()>>>,
}

/// Thread-safe connection pool; clones share the same pool.
pub struct ConnPool<F: ConnFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnFactory> Clone for ConnPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: ConnFactory> ConnPool<F> {
    /// Build the pool, pre-warming `initial_size` connections and
    /// installing the optional process-signal shutdown hook.
    pub async fn create(factory: F, config: PoolConfig) -> QuadraResult<Self> {
        let (return_tx, return_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(PoolInner {
            factory,
            config,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                active: 0,
                reserved: 0,
                closed: false,
            }),
            notify: Notify::new(),
            return_tx,
            closers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            evictor: Mutex::new(None),
            signal_hook: Mutex::new(None),
        });

        spawn_reaper(&inner, return_rx);
        if let Some(interval) = inner.config.eviction_interval {
            let handle = spawn_evictor(&inner, interval);
            *inner.evictor.lock().await = Some(handle);
        }
        if inner.config.shutdown_hook {
            let handle = spawn_signal_hook(&inner);
            *inner.signal_hook.lock().await = Some(handle);
        }

        let pool = Self { inner };

        if pool.inner.config.initial_size > 0 {
            let mut warmed = Vec::with_capacity(pool.inner.config.initial_size);
            for _ in 0..pool.inner.config.initial_size {
                warmed.push(pool.borrow().await?);
            }
            // Park them idle again.
            for conn in warmed {
                conn.close().await?;
            }
        }

        Ok(pool)
    }

    /// Check out a connection, waiting up to `max_wait` for capacity.
    ///
    /// The factory's activate hook runs before the connection is handed
    /// out; a connection that fails its optional borrow-time validation is
    /// destroyed and replaced rather than surfaced.
    pub async fn borrow(&self) -> QuadraResult<PooledConn<F>> {
        enum Plan<C> {
            Reuse(C),
            Create,
            Wait,
        }

        let start = Instant::now();
        let deadline = self.inner.config.max_wait.map(|wait| start + wait);

        loop {
            let plan = {
                let mut state = self.inner.state.lock().await;
                if state.closed {
                    return Err(QuadraError::PoolClosed);
                }
                if let Some(idle) = state.idle.pop_front() {
                    state.active += 1;
                    Plan::Reuse(idle.conn)
                } else if state.active + state.reserved + state.idle.len()
                    < self.inner.config.max_active
                {
                    state.active += 1;
                    Plan::Create
                } else {
                    Plan::Wait
                }
            };

            match plan {
                Plan::Reuse(mut conn) => {
                    if self.inner.config.test_on_borrow
                        && !self.inner.factory.validate(&mut conn).await
                    {
                        // Evict quietly and look for another one.
                        self.inner.discard(conn).await;
                        continue;
                    }
                    match self.inner.factory.activate(&mut conn).await {
                        Ok(()) => return Ok(self.inner.register_guard(conn).await),
                        Err(err) => {
                            self.inner.discard(conn).await;
                            return Err(err);
                        }
                    }
                }
                Plan::Create => {
                    let mut conn = match self.inner.factory.make().await {
                        Ok(conn) => conn,
                        Err(err) => {
                            self.inner.release_slot().await;
                            return Err(err);
                        }
                    };
                    match self.inner.factory.activate(&mut conn).await {
                        Ok(()) => return Ok(self.inner.register_guard(conn).await),
                        Err(err) => {
                            self.inner.discard(conn).await;
                            return Err(err);
                        }
                    }
                }
                Plan::Wait => match deadline {
                    None => self.inner.notify.notified().await,
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            return Err(QuadraError::PoolExhausted {
                                waited: start.elapsed(),
                            });
                        }
                        if tokio::time::timeout(deadline - now, self.inner.notify.notified())
                            .await
                            .is_err()
                        {
                            return Err(QuadraError::PoolExhausted {
                                waited: start.elapsed(),
                            });
                        }
                    }
                },
            }
        }
    }

    /// Borrowed connections right now.
    pub async fn num_active(&self) -> usize {
        self.inner.state.lock().await.active
    }

    /// Idle connections parked in the pool.
    pub async fn num_idle(&self) -> usize {
        let state = self.inner.state.lock().await;
        state.idle.len() + state.reserved
    }

    /// Close the pool: destroy idle connections, fail waiting borrows, and
    /// deregister the shutdown hook. Safe to call more than once.
    /// Connections still borrowed are destroyed as they come back.
    pub async fn close(&self) {
        self.inner.close_pool(false).await;
    }

    /// Close the pool and additionally release the server-side sessions of
    /// connections that are still borrowed. This is what the shutdown hook
    /// runs; the borrowed objects themselves stay with their holders.
    pub async fn force_close(&self) {
        self.inner.close_pool(true).await;
    }
}

impl<F: ConnFactory> PoolInner<F> {
    async fn register_guard(self: &Arc<Self>, conn: F::Conn) -> PooledConn<F> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Some(closer) = self.factory.force_closer(&conn) {
            self.closers.lock().await.insert(id, closer);
        }
        PooledConn {
            conn: Some(conn),
            id,
            inner: self.clone(),
        }
    }

    /// Destroy a connection that was counted active.
    async fn discard(&self, conn: F::Conn) {
        self.factory.destroy(conn).await;
        self.release_slot().await;
    }

    async fn release_slot(&self) {
        self.state.lock().await.active -= 1;
        self.notify.notify_one();
    }

    async fn handle_return(&self, id: u64, mut conn: F::Conn) -> QuadraResult<()> {
        self.closers.lock().await.remove(&id);

        if let Err(err) = self.factory.passivate(&mut conn).await {
            warn!("passivation failed, destroying connection: {err}");
            self.discard(conn).await;
            return Err(err);
        }

        if self.config.test_on_return && !self.factory.validate(&mut conn).await {
            self.discard(conn).await;
            return Ok(());
        }

        {
            let mut state = self.state.lock().await;
            if !state.closed && state.idle.len() < self.config.max_idle {
                state.active -= 1;
                state.idle.push_back(IdleConn {
                    conn,
                    idle_since: Instant::now(),
                });
                drop(state);
                self.notify.notify_one();
                return Ok(());
            }
        }
        // Closed, or no idle headroom.
        self.discard(conn).await;
        Ok(())
    }

    async fn run_eviction(&self) {
        let candidates: Vec<IdleConn<F::Conn>> = {
            let mut state = self.state.lock().await;
            if state.closed {
                return;
            }
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.reserved += drained.len();
            drained
        };

        let mut kept = Vec::new();
        for mut idle in candidates {
            if idle.idle_since.elapsed() >= self.config.min_evictable_idle {
                debug!("evicting idle connection (idle too long)");
                self.factory.destroy(idle.conn).await;
                self.state.lock().await.reserved -= 1;
                self.notify.notify_one();
                continue;
            }
            if self.config.test_while_idle && !self.factory.validate(&mut idle.conn).await {
                debug!("evicting idle connection (validation failed)");
                self.factory.destroy(idle.conn).await;
                self.state.lock().await.reserved -= 1;
                self.notify.notify_one();
                continue;
            }
            kept.push(idle);
        }

        let grow_by = {
            let mut state = self.state.lock().await;
            state.reserved -= kept.len();
            if state.closed {
                drop(state);
                for idle in kept {
                    self.factory.destroy(idle.conn).await;
                }
                return;
            }
            for idle in kept {
                state.idle.push_back(idle);
            }
            let total = state.active + state.reserved + state.idle.len();
            self.config
                .min_idle
                .saturating_sub(state.idle.len())
                .min(self.config.max_active.saturating_sub(total))
        };

        for _ in 0..grow_by {
            match self.factory.make().await {
                Ok(mut conn) => {
                    if let Err(err) = self.factory.passivate(&mut conn).await {
                        debug!("min-idle connection failed passivation: {err}");
                        self.factory.destroy(conn).await;
                        break;
                    }
                    let mut state = self.state.lock().await;
                    if state.closed || state.idle.len() >= self.config.max_idle {
                        drop(state);
                        self.factory.destroy(conn).await;
                        break;
                    }
                    state.idle.push_back(IdleConn {
                        conn,
                        idle_since: Instant::now(),
                    });
                    drop(state);
                    self.notify.notify_one();
                }
                Err(err) => {
                    debug!("min-idle maintenance could not create a connection: {err}");
                    break;
                }
            }
        }
    }

    async fn close_pool(&self, force: bool) {
        let idle: Vec<IdleConn<F::Conn>> = {
            let mut state = self.state.lock().await;
            state.closed = true;
            state.idle.drain(..).collect()
        };
        for idle in idle {
            self.factory.destroy(idle.conn).await;
        }
        // Wake every waiting borrow so it can fail with PoolClosed.
        self.notify.notify_waiters();

        if let Some(evictor) = self.evictor.lock().await.take() {
            evictor.abort();
        }
        if force {
            // Release server-side sessions of connections still out with
            // borrowers; the objects themselves are destroyed on return.
            let closers: Vec<_> = self
                .closers
                .lock()
                .await
                .drain()
                .map(|(_, closer)| closer)
                .collect();
            for closer in closers {
                closer.await;
            }
        } else {
            // Deregister the signal hook so a closed pool does not linger
            // behind it. The hook's own close leaves the handle in place;
            // it has already fired.
            if let Some(hook) = self.signal_hook.lock().await.take() {
                hook.abort();
            }
        }
    }
}

fn spawn_reaper<F: ConnFactory>(
    inner: &Arc<PoolInner<F>>,
    mut return_rx: UnboundedReceiver<(u64, F::Conn)>,
) {
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        // Runs until every pool handle and guard is gone; a guard dropped
        // without an explicit close lands here.
        while let Some((id, conn)) = return_rx.recv().await {
            match weak.upgrade() {
                Some(inner) => {
                    let _ = inner.handle_return(id, conn).await;
                }
                None => break,
            }
        }
    });
}

fn spawn_evictor<F: ConnFactory>(
    inner: &Arc<PoolInner<F>>,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else { break };
            inner.run_eviction().await;
        }
    })
}

fn spawn_signal_hook<F: ConnFactory>(inner: &Arc<PoolInner<F>>) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        if let Some(inner) = weak.upgrade() {
            debug!("shutdown signal received, force-closing connection pool");
            inner.close_pool(true).await;
        }
    })
}

/// A borrowed connection. Dereferences to the underlying connection;
/// `close()` (or dropping the guard) returns it to the pool.
pub struct PooledConn<F: ConnFactory> {
    conn: Option<F::Conn>,
    id: u64,
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnFactory> PooledConn<F> {
    /// Return the connection to the pool, running the passivation hook
    /// inline. Preferred over dropping the guard when the caller can
    /// await.
    pub async fn close(mut self) -> QuadraResult<()> {
        match self.conn.take() {
            Some(conn) => self.inner.handle_return(self.id, conn).await,
            None => Ok(()),
        }
    }

    /// Unwrap the underlying connection, removing it from pool
    /// accounting. The caller owns it from here on.
    pub async fn detach(mut self) -> F::Conn {
        let conn = self.conn.take().expect("detach on a consumed guard");
        self.inner.closers.lock().await.remove(&self.id);
        self.inner.release_slot().await;
        conn
    }
}

impl<F: ConnFactory> Deref for PooledConn<F> {
    type Target = F::Conn;

    fn deref(&self) -> &F::Conn {
        self.conn.as_ref().expect("pooled connection already returned")
    }
}

impl<F: ConnFactory> DerefMut for PooledConn<F> {
    fn deref_mut(&mut self) -> &mut F::Conn {
        self.conn.as_mut().expect("pooled connection already returned")
    }
}

impl<F: ConnFactory> Drop for PooledConn<F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // Hand the connection to the reaper task; it passivates and
            // re-idles (or destroys, when the pool has closed).
            let _ = self.inner.return_tx.send((self.id, conn));
        }
    }
}
