//! Connection manufacturing and lifecycle hooks.

use std::future::Future;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::error::{QuadraError, QuadraResult};
use crate::http::{QuadraHttpClient, QuadraRepoClient};
use crate::pool::config::{ConnConfig, SessionMode};

/// Lifecycle surface the pool drives. `make` builds a connection from
/// configuration; `activate` runs on checkout, `passivate` on checkin,
/// `validate` on liveness probes, `destroy` on eviction and shutdown.
pub trait ConnFactory: Send + Sync + 'static {
    type Conn: Send + 'static;

    fn make(&self) -> impl Future<Output = QuadraResult<Self::Conn>> + Send;

    fn activate(&self, conn: &mut Self::Conn) -> impl Future<Output = QuadraResult<()>> + Send;

    fn passivate(&self, conn: &mut Self::Conn) -> impl Future<Output = QuadraResult<()>> + Send;

    fn validate(&self, conn: &mut Self::Conn) -> impl Future<Output = bool> + Send;

    fn destroy(&self, conn: Self::Conn) -> impl Future<Output = ()> + Send;

    /// A detached closer for a borrowed connection, used by the pool's
    /// force-close path (process-exit hook) to release server-side state
    /// without owning the connection. `None` when there is nothing worth
    /// closing remotely.
    fn force_closer(&self, _conn: &Self::Conn) -> Option<BoxFuture<'static, ()>> {
        None
    }
}

/// Manufactures [`QuadraRepoClient`] connections from declarative
/// configuration, creating the remote repository on first use.
pub struct RepoConnFactory {
    config: ConnConfig,
    /// Serializes check-then-create so factories racing on a missing
    /// repository do not both attempt creation.
    create_guard: Mutex<()>,
}

impl RepoConnFactory {
    pub fn new(config: ConnConfig) -> Self {
        Self {
            config,
            create_guard: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ConnConfig {
        &self.config
    }
}

impl ConnFactory for RepoConnFactory {
    type Conn = QuadraRepoClient;

    /// Each connection gets its own transport (and with it, its own
    /// keep-alive connection manager); `close()` on the client releases
    /// the session and dropping it releases the manager.
    #[instrument(name = "quadra.pool.make", skip(self), fields(repo = %self.config.repository))]
    async fn make(&self) -> QuadraResult<QuadraRepoClient> {
        let transport = QuadraHttpClient::new(
            self.config.server_url.clone(),
            Some(&self.config.username),
            Some(&self.config.password),
            self.config.http_socket_timeout,
            self.config.use_gzip,
        )?;

        let spec = self.config.repo_spec();
        if !transport.has_repository(&spec).await? {
            let _guard = self.create_guard.lock().await;
            // Someone may have created it while we waited for the lock.
            if !transport.has_repository(&spec).await? {
                transport.put_repository(&spec).await?;
            }
        }

        let mut client = QuadraRepoClient::new(transport, spec);
        if let Some(lifetime) = self.config.session_lifetime {
            client.set_session_lifetime(lifetime);
        }
        Ok(client)
    }

    /// Checkout hook: always roll back first to clear any straggling
    /// transaction state, then force autocommit to what the configured
    /// session mode requires.
    async fn activate(&self, conn: &mut QuadraRepoClient) -> QuadraResult<()> {
        conn.rollback().await?;

        let required = self.config.session.required_autocommit();
        match self.config.session {
            SessionMode::Shared => {
                if conn.is_autocommit() != required {
                    // User code toggled autocommit, which silently turned
                    // this shared connection into a dedicated session.
                    warn!(
                        "connection for {} became dedicated (autocommit was off on a SHARED pool); restoring",
                        conn.root()
                    );
                    conn.set_autocommit(required).await?;
                }
            }
            SessionMode::Dedicated => {
                if !conn.is_dedicated_session() || conn.is_autocommit() != required {
                    conn.set_autocommit(required).await?;
                    debug!("dedicated backend for {}", conn.root());
                }
            }
            SessionMode::Tx => {
                if conn.is_autocommit() != required {
                    conn.set_autocommit(required).await?;
                    debug!("tx backend for {}", conn.root());
                }
            }
        }
        Ok(())
    }

    /// Checkin hook: a connection parked idle must not hold a transaction
    /// (and with it, server-side resources).
    async fn passivate(&self, conn: &mut QuadraRepoClient) -> QuadraResult<()> {
        if !conn.is_autocommit() && conn.is_writable() {
            conn.rollback().await?;
        }
        Ok(())
    }

    /// A ping only proves the network is up; `size()` also proves the
    /// repository (and the session, when one is bound) still exists.
    async fn validate(&self, conn: &mut QuadraRepoClient) -> bool {
        match conn.size(&[]).await {
            Ok(_) => true,
            Err(err) => {
                debug!("validate failed for {}: {err}", conn.root());
                false
            }
        }
    }

    /// Close errors are logged and swallowed: destruction runs during
    /// eviction and shutdown races, where the session is often already
    /// gone (expired lifetime manifests as a connect failure).
    async fn destroy(&self, mut conn: QuadraRepoClient) {
        if let Err(err) = conn.close().await {
            match err {
                QuadraError::Network { message, .. } => {
                    debug!("ignoring close error (probably session timeout): {message}")
                }
                other => debug!("ignoring close error: {other}"),
            }
        }
    }

    fn force_closer(&self, conn: &QuadraRepoClient) -> Option<BoxFuture<'static, ()>> {
        let closer = conn.detached_session_closer()?;
        Some(closer.boxed())
    }
}
