//! # autolabel-db
//!
//! Persistence and object storage for autolabel.
//!
//! This crate provides:
//! - Connection pool management
//! - PostgreSQL and in-memory implementations of `RecordRepository`
//! - Filesystem and S3-compatible implementations of `ObjectStore`
//!
//! ## Example
//!
//! ```rust,ignore
//! use autolabel_db::{open_object_store, Database, PoolConfig, StorageConfig};
//!
//! let db = Database::connect(&url, &PoolConfig::from_env(), concurrency).await?;
//! db.migrate().await?;
//! let store = open_object_store(&StorageConfig::from_env()?).await?;
//! ```

pub mod memory;
pub mod object_store;
pub mod pool;
pub mod records;
pub mod s3;

use std::sync::Arc;

use tracing::info;

// Re-export core types
pub use autolabel_core::*;

pub use memory::InMemoryRecordRepository;
pub use object_store::FilesystemObjectStore;
pub use pool::{create_pool, log_pool_metrics, PoolConfig};
pub use records::PgRecordRepository;
pub use s3::S3ObjectStore;

/// Connection pool plus the record repository built on it.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Image annotation records.
    pub records: Arc<PgRecordRepository>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            records: Arc::new(PgRecordRepository::new(pool.clone())),
            pool,
        }
    }

    /// Open a pool sized for `concurrency` labeling tasks.
    pub async fn connect(url: &str, config: &PoolConfig, concurrency: usize) -> Result<Self> {
        let pool = create_pool(url, config, concurrency).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Log pool occupancy, typically after a labeling run.
    pub fn log_pool_metrics(&self) {
        log_pool_metrics(&self.pool);
    }
}

/// Build the object store selected by configuration.
pub async fn open_object_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match config {
        StorageConfig::Filesystem { root, public_url } => {
            let mut store = FilesystemObjectStore::new(root.clone());
            if let Some(url) = public_url {
                store = store.with_public_url(url.clone());
            }
            store.validate().await?;
            info!(
                subsystem = "storage",
                component = "filesystem",
                op = "open",
                root = %root.display(),
                "Filesystem object store ready"
            );
            Ok(Arc::new(store))
        }
        StorageConfig::S3(s3) => Ok(Arc::new(S3ObjectStore::connect(s3).await?)),
    }
}
