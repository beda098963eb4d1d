//! Store Service
//!
//! [`TimedStore`] wires the pieces together: it opens one [`TtlShard`] per
//! configured worker, loads and compacts their logs, starts their background
//! tasks and finally the [`Router`] in front of them. Shutdown runs the same
//! steps in reverse.

use crate::config::Config;
use crate::ring::{Router, RouterError, RouterStats};
use crate::storage::{ShardStats, StoreError, Ttl, TtlShard};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Errors raised while starting or using the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("shard load task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// A running sharded store.
///
/// # Example
///
/// ```
/// use timedkv::config::Config;
/// use timedkv::TimedStore;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut config = Config::default();
/// config.store.persist = false;
///
/// let mut store = TimedStore::open(config).unwrap();
/// store.start().await.unwrap();
///
/// store.set("ping", "pong").await.unwrap();
/// assert_eq!(store.get("ping").await.unwrap(), Some("pong".to_string()));
///
/// store.shutdown().await;
/// # }
/// ```
#[derive(Debug)]
pub struct TimedStore {
    config: Config,
    shards: Vec<Arc<TtlShard>>,
    router: Router,
}

impl TimedStore {
    /// Opens every shard named by `config`.
    ///
    /// Fails on the first shard whose log cannot be opened.
    pub fn open(config: Config) -> ServiceResult<Self> {
        let shards = (0..config.router.workers)
            .map(|index| TtlShard::open(index, &config.store).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        let router = Router::new(shards.clone(), config.router.clone())?;

        Ok(Self {
            config,
            shards,
            router,
        })
    }

    /// Loads every shard log, starts the shards and then the router.
    pub async fn start(&mut self) -> ServiceResult<()> {
        let mut replayed = 0u64;
        let mut retained = 0u64;

        for shard in &self.shards {
            let shard = Arc::clone(shard);
            let report = tokio::task::spawn_blocking(move || shard.load()).await??;
            replayed += report.replayed;
            retained += report.retained;
        }

        for shard in &self.shards {
            shard.run()?;
        }
        self.router.run()?;

        info!(
            shards = self.shards.len(),
            replayed,
            retained,
            persist = self.config.store.persist,
            "Store started"
        );
        Ok(())
    }

    /// Stops the router, then closes every shard.
    ///
    /// A shard that fails to close is logged and the others are still closed.
    pub async fn shutdown(&self) {
        self.router.stop().await;

        for shard in &self.shards {
            if let Err(e) = shard.close().await {
                error!(shard = shard.id(), error = %e, "Failed to close shard");
            }
        }

        let stats = self.shard_stats();
        info!(keys = stats.keys, appended = stats.appended, "Store shut down");
    }

    /// See [`Router::get`].
    pub async fn get(&self, key: impl Into<String>) -> ServiceResult<Option<String>> {
        Ok(self.router.get(key).await?)
    }

    /// See [`Router::set`].
    pub async fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> ServiceResult<bool> {
        Ok(self.router.set(key, value).await?)
    }

    /// See [`Router::set_with_ttl`].
    pub async fn set_with_ttl(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Ttl,
    ) -> ServiceResult<bool> {
        Ok(self.router.set_with_ttl(key, value, ttl).await?)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> RouterStats {
        self.router.stats()
    }

    pub fn shard_stats(&self) -> ShardStats {
        self.router.shard_stats()
    }
}
