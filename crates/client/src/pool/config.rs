//! Declarative configuration for pooled connections.

use std::time::Duration;

use derive_builder::Builder;
use serde::Deserialize;
use url::Url;

/// Commit discipline a pooled connection is held to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionMode {
    /// No dedicated backend; autocommit is always on. A connection can
    /// still silently become dedicated if user code toggles autocommit.
    #[default]
    Shared,
    /// Dedicated backend with autocommit forced on.
    Dedicated,
    /// Dedicated backend with autocommit off; work is bracketed by
    /// explicit commit/rollback.
    Tx,
}

impl SessionMode {
    /// The autocommit value this mode requires after checkout.
    pub fn required_autocommit(&self) -> bool {
        !matches!(self, SessionMode::Tx)
    }
}

/// Everything the factory needs to manufacture one connection.
#[derive(Clone, Debug, Builder, Deserialize)]
#[builder(setter(into, strip_option), pattern = "owned")]
pub struct ConnConfig {
    pub server_url: Url,
    pub username: String,
    pub password: String,
    /// Absent means the root catalog.
    #[builder(default)]
    #[serde(default)]
    pub catalog: Option<String>,
    pub repository: String,
    #[builder(default)]
    #[serde(default)]
    pub session: SessionMode,
    /// Seconds of permitted backend idleness; server default when absent.
    #[builder(default)]
    #[serde(default)]
    pub session_lifetime: Option<u64>,
    /// Per-socket-operation timeout; not a per-request deadline.
    #[builder(default)]
    #[serde(default, with = "opt_millis")]
    pub http_socket_timeout: Option<Duration>,
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub use_gzip: bool,
}

impl ConnConfig {
    pub fn builder() -> ConnConfigBuilder {
        ConnConfigBuilder::default()
    }

    pub fn repo_spec(&self) -> crate::spec::RepoSpec {
        crate::spec::RepoSpec {
            catalog: self.catalog.clone(),
            repository: self.repository.clone(),
        }
    }
}

/// Pool sizing and lifecycle knobs. The defaults mirror a conservative
/// generic object pool: eight connections, unbounded checkout wait, no
/// background eviction.
#[derive(Clone, Debug, Builder, Deserialize)]
#[builder(setter(into, strip_option), pattern = "owned")]
#[serde(default)]
pub struct PoolConfig {
    /// Connections created and parked idle at pool construction.
    #[builder(default)]
    pub initial_size: usize,
    /// Upper bound on connections that exist at once (idle + borrowed).
    #[builder(default = "8")]
    pub max_active: usize,
    /// How long a borrow may wait for a free connection; `None` blocks
    /// indefinitely.
    #[builder(default)]
    #[serde(with = "opt_millis")]
    pub max_wait: Option<Duration>,
    /// Idle connections the evictor keeps available.
    #[builder(default)]
    pub min_idle: usize,
    /// Idle connections beyond this are destroyed on return.
    #[builder(default = "8")]
    pub max_idle: usize,
    /// Period of the background eviction task; `None` disables it.
    #[builder(default)]
    #[serde(with = "opt_millis")]
    pub eviction_interval: Option<Duration>,
    /// Idle age past which the evictor destroys a connection.
    #[builder(default = "Duration::from_secs(30 * 60)")]
    #[serde(with = "millis")]
    pub min_evictable_idle: Duration,
    #[builder(default)]
    pub test_on_borrow: bool,
    #[builder(default)]
    pub test_on_return: bool,
    #[builder(default)]
    pub test_while_idle: bool,
    /// Install a process-signal hook that force-closes the pool.
    #[builder(default)]
    pub shutdown_hook: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 0,
            max_active: 8,
            max_wait: None,
            min_idle: 0,
            max_idle: 8,
            eviction_interval: None,
            min_evictable_idle: Duration::from_secs(30 * 60),
            test_on_borrow: false,
            test_on_return: false,
            test_while_idle: false,
            shutdown_hook: false,
        }
    }
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }
}

fn default_true() -> bool {
    true
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
