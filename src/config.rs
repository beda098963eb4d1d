//! Configuration
//!
//! All tunables are plain values threaded into constructors; nothing in the
//! library reads process-wide state. The binary builds a [`Config`] from an
//! optional TOML file and its command-line flags.
//!
//! ```toml
//! [router]
//! workers = 5
//! ttl = "1m"
//!
//! [store]
//! gc_interval = "333ms"
//! save_path = "./data/"
//! persist = true
//!
//! [log]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings for the shard ring.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterConfig {
    /// Number of shards in the ring
    pub workers: usize,

    /// TTL applied by `Router::set` and re-applied on every read hit
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Capacity of the shared intake queue
    pub intake_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            ttl: Duration::from_secs(60),
            intake_capacity: 100,
        }
    }
}

/// Settings for each TTL shard.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Interval between eviction sweeps
    #[serde(with = "humantime_serde")]
    pub gc_interval: Duration,

    /// Number of sweep tasks per shard. Only one is ever started.
    pub gc_workers: usize,

    /// Directory holding the shard logs
    pub save_path: PathBuf,

    /// Mirror writes into the shard log
    pub persist: bool,

    /// Capacity of each shard's write-behind queue
    pub persist_queue: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            gc_interval: Duration::from_millis(333),
            gc_workers: 1,
            save_path: PathBuf::from("./data/"),
            persist: true,
            persist_queue: 100,
        }
    }
}

impl StoreConfig {
    /// Log file for the shard with the given index.
    pub fn log_path(&self, index: usize) -> PathBuf {
        self.save_path.join(format!("#store{}.db", index))
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub router: RouterConfig,
    pub store: StoreConfig,
    pub log: LogConfig,
}

impl Config {
    /// Parses configuration from TOML text and validates it.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads configuration from a TOML file and validates it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Checks values that would otherwise fail later at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.router.workers == 0 {
            return Err(ConfigError::Invalid("router.workers must be at least 1".into()));
        }
        if self.router.intake_capacity == 0 {
            return Err(ConfigError::Invalid(
                "router.intake_capacity must be at least 1".into(),
            ));
        }
        if self.router.ttl.is_zero() {
            return Err(ConfigError::Invalid(
                "router.ttl must be non-zero, a zero TTL drops every write".into(),
            ));
        }
        if self.store.gc_interval.is_zero() {
            return Err(ConfigError::Invalid("store.gc_interval must be non-zero".into()));
        }
        if self.store.persist_queue == 0 {
            return Err(ConfigError::Invalid(
                "store.persist_queue must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
