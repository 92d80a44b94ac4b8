//! PostgreSQL pool sizing for labeling runs.
//!
//! Every in-flight infer-and-save task holds a connection for its lookup and
//! upsert, so the pool has to be at least as large as the batch limit or tasks
//! end up queueing on the pool instead of the limiter.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use autolabel_core::{defaults, Error, Result};

/// Default pool size. Stays above the default label concurrency.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 20;

pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;

pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Pool options read from `DB_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

impl PoolConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// `DB_MAX_CONNECTIONS`, `DB_MIN_CONNECTIONS`, `DB_ACQUIRE_TIMEOUT_SECS`,
    /// `DB_IDLE_TIMEOUT_SECS`. Unparsable values keep the default.
    ///
    /// `min_connections` is capped at `max_connections`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());
        let mut config = Self::default();

        if let Some(n) = parse("DB_MAX_CONNECTIONS").filter(|n| *n > 0) {
            config.max_connections = u32::try_from(n).unwrap_or(u32::MAX);
        }
        if let Some(n) = parse("DB_MIN_CONNECTIONS") {
            config.min_connections = u32::try_from(n).unwrap_or(u32::MAX);
        }
        if let Some(secs) = parse("DB_ACQUIRE_TIMEOUT_SECS").filter(|s| *s > 0) {
            config.acquire_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse("DB_IDLE_TIMEOUT_SECS").filter(|s| *s > 0) {
            config.idle_timeout = Duration::from_secs(secs);
        }
        config.min_connections = config.min_connections.min(config.max_connections);
        config
    }

    /// Whether `concurrency` tasks can each hold a connection at once.
    pub fn covers(&self, concurrency: usize) -> bool {
        self.max_connections as usize >= concurrency
    }
}

/// Open a pool. Warns when it is smaller than the label concurrency.
pub async fn create_pool(
    database_url: &str,
    config: &PoolConfig,
    concurrency: usize,
) -> Result<PgPool> {
    let start = Instant::now();

    if !config.covers(concurrency) {
        warn!(
            subsystem = "db",
            component = "pool",
            max_connections = config.max_connections,
            concurrency,
            "Pool smaller than label concurrency, tasks will wait on connections"
        );
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "create",
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database connection pool established"
    );
    Ok(pool)
}

/// Log pool occupancy after a labeling run.
///
/// No idle connection left means tasks were queueing on the pool rather than
/// on the batch limiter.
pub fn log_pool_metrics(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle();

    debug!(
        subsystem = "db",
        component = "pool",
        op = "metrics",
        pool_size = size,
        pool_idle = idle,
        "Pool occupancy"
    );

    if idle == 0 && size > 0 {
        warn!(
            subsystem = "db",
            component = "pool",
            pool_size = size,
            "Connection pool has no idle connections"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_default_pool_covers_label_concurrency() {
        assert!(PoolConfig::default().covers(defaults::LABEL_CONCURRENCY));
    }

    #[test]
    fn test_pool_overrides() {
        let config = PoolConfig::from_lookup(lookup_from(&[
            ("DB_MAX_CONNECTIONS", "40"),
            ("DB_MIN_CONNECTIONS", "5"),
            ("DB_ACQUIRE_TIMEOUT_SECS", "60"),
            ("DB_IDLE_TIMEOUT_SECS", "120"),
        ]));
        assert_eq!(config.max_connections, 40);
        assert_eq!(config.min_connections, 5);
        assert_eq!(config.acquire_timeout, Duration::from_secs(60));
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_pool_garbage_and_zero_keep_defaults() {
        let config = PoolConfig::from_lookup(lookup_from(&[
            ("DB_MAX_CONNECTIONS", "0"),
            ("DB_ACQUIRE_TIMEOUT_SECS", "soon"),
        ]));
        assert_eq!(config, PoolConfig::default());
    }

    #[test]
    fn test_min_connections_capped_at_max() {
        let config = PoolConfig::from_lookup(lookup_from(&[
            ("DB_MAX_CONNECTIONS", "4"),
            ("DB_MIN_CONNECTIONS", "10"),
        ]));
        assert_eq!(config.min_connections, 4);
        assert!(!config.covers(15));
    }
}
