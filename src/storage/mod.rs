//! Storage Module
//!
//! This module provides the per-shard storage of TimedKV: an in-memory map of
//! expiring entries, a background sweeper that deletes dead entries, and an
//! append-only log that lets a shard rebuild its map after a restart.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         TtlShard                            │
//! │  ┌──────────────────────┐      ┌──────────────────────────┐ │
//! │  │ DashMap<String,Entry>│◄─────│ sweep_loop (gc_interval) │ │
//! │  └──────────┬───────────┘      └──────────────────────────┘ │
//! │             │ set()                                         │
//! │             ▼                                               │
//! │  ┌──────────────────────┐      ┌──────────────────────────┐ │
//! │  │ mpsc (persist_queue) │─────>│ LogWriter ──> #storeN.db │ │
//! │  └──────────────────────┘      └──────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! 1. [`TtlShard::open`] creates the log file if it does not exist.
//! 2. [`TtlShard::load`] replays the log into the map and compacts it.
//! 3. [`TtlShard::run`] starts the sweeper and the persister.
//! 4. [`TtlShard::close`] cancels both, flushing every queued append first.
//!
//! ## Example
//!
//! ```
//! use timedkv::config::StoreConfig;
//! use timedkv::storage::{TtlShard, Ttl};
//! use std::time::Duration;
//!
//! let config = StoreConfig { persist: false, ..Default::default() };
//! let shard = TtlShard::open(0, &config).unwrap();
//!
//! shard.put("session".into(), "abc123".into(), Ttl::After(Duration::from_secs(60)));
//! assert_eq!(shard.get("session"), Some("abc123".to_string()));
//!
//! // A zero TTL is ignored
//! shard.put("session".into(), "other".into(), Ttl::from_secs(0));
//! assert_eq!(shard.get("session"), Some("abc123".to_string()));
//! ```

pub mod entry;
pub mod expiry;
pub mod log;
pub mod shard;

pub use entry::{unix_now, Entry, Ttl};
pub use log::{DurableLog, LogRecord, DEFAULT_LOG_NAME};
pub use shard::{LoadReport, ShardStats, TtlShard};

use crate::codec::CodecError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a shard or its log.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The log file could not be opened or created
    #[error("failed to open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The log could not be replayed or rewritten
    #[error("log codec error: {0}")]
    Codec(#[from] CodecError),

    /// `run` was called on a persisting shard before `load`
    #[error("shard {0} must be loaded before it runs")]
    NotLoaded(usize),

    #[error("shard {0} is already running")]
    AlreadyRunning(usize),

    #[error("shard {0} is closed")]
    Closed(usize),
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
