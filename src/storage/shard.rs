//! TTL Shard
//!
//! One partition of the keyspace. A shard owns a concurrent map of
//! `key -> Entry`, an optional [`DurableLog`], and the two background tasks
//! that maintain them: the expiry sweeper and the log persister.
//!
//! ## Expiry
//!
//! Expired entries are hidden immediately and deleted later:
//! 1. **Lazy**: [`TtlShard::get`] compares the entry's expiry with the clock,
//!    so an expired entry is never returned, swept or not.
//! 2. **Active**: the sweeper calls [`TtlShard::cleanup_expired`] every
//!    `gc_interval` to reclaim memory.
//!
//! ## Concurrency Model
//!
//! The map is a `DashMap`, so the router's listener, the sweeper and callers of
//! [`TtlShard::range`] all access it without an outer lock. Each operation is
//! atomic per key.

use crate::config::StoreConfig;
use crate::storage::entry::{unix_now, Entry, Ttl};
use crate::storage::expiry;
use crate::storage::log::{DurableLog, LogRecord, LogWriter};
use crate::storage::{StoreError, StoreResult};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Live counters shared with the shard's background tasks.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) gets: AtomicU64,
    pub(crate) hits: AtomicU64,
    pub(crate) sets: AtomicU64,
    pub(crate) expired: AtomicU64,
    pub(crate) appended: AtomicU64,
    pub(crate) append_failures: AtomicU64,
}

/// Shard statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardStats {
    /// Entries currently held, live or not yet swept
    pub keys: u64,
    /// Total lookups
    pub gets: u64,
    /// Lookups that found a live entry
    pub hits: u64,
    /// Writes applied to the map
    pub sets: u64,
    /// Entries removed by the sweeper
    pub expired: u64,
    /// Records written to the log
    pub appended: u64,
    /// Records the persister failed to write
    pub append_failures: u64,
}

impl std::ops::AddAssign for ShardStats {
    fn add_assign(&mut self, other: Self) {
        self.keys += other.keys;
        self.gets += other.gets;
        self.hits += other.hits;
        self.sets += other.sets;
        self.expired += other.expired;
        self.appended += other.appended;
        self.append_failures += other.append_failures;
    }
}

/// Outcome of [`TtlShard::load`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Records read from the log
    pub replayed: u64,
    /// Records written back by compaction
    pub retained: u64,
}

/// An in-memory partition with TTL eviction and write-behind persistence.
///
/// # Example
///
/// ```
/// use timedkv::config::StoreConfig;
/// use timedkv::storage::{TtlShard, Ttl};
///
/// let config = StoreConfig { persist: false, ..Default::default() };
/// let shard = TtlShard::open(3, &config).unwrap();
///
/// shard.put("name".into(), "alice".into(), Ttl::Never);
/// assert_eq!(shard.get("name"), Some("alice".to_string()));
/// assert_eq!(shard.get("missing"), None);
/// ```
pub struct TtlShard {
    id: usize,
    config: StoreConfig,
    map: DashMap<String, Entry>,
    log: Option<DurableLog>,
    /// Set once by `run` when persistence is enabled
    persist_tx: OnceLock<mpsc::Sender<LogRecord>>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    loaded: AtomicBool,
    running: AtomicBool,
}

impl std::fmt::Debug for TtlShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlShard")
            .field("id", &self.id)
            .field("keys", &self.map.len())
            .field("log", &self.log.as_ref().map(|l| l.path()))
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl TtlShard {
    /// Creates shard `id`, opening its log under `config.save_path` when
    /// persistence is enabled.
    pub fn open(id: usize, config: &StoreConfig) -> StoreResult<Self> {
        let log = if config.persist {
            Some(DurableLog::open(config.log_path(id))?)
        } else {
            None
        };
        Ok(Self::with_log(id, config, log))
    }

    /// Creates shard `id` on top of an already opened log.
    pub fn with_log(id: usize, config: &StoreConfig, log: Option<DurableLog>) -> Self {
        Self {
            id,
            config: config.clone(),
            map: DashMap::new(),
            log,
            persist_tx: OnceLock::new(),
            counters: Arc::new(Counters::default()),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            loaded: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    /// Index this shard was created with.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The shard's log, if persistence is enabled.
    pub fn log(&self) -> Option<&DurableLog> {
        self.log.as_ref()
    }

    /// Returns the value for `key` if a live entry exists.
    ///
    /// Reading does not extend the entry's lifetime.
    pub fn get(&self, key: &str) -> Option<String> {
        self.counters.gets.fetch_add(1, Ordering::Relaxed);

        let entry = self.map.get(key)?;
        if !entry.is_live() {
            return None;
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.value.clone())
    }

    /// Returns the full entry for `key` if it is live.
    pub fn get_entry(&self, key: &str) -> Option<Entry> {
        self.map
            .get(key)
            .filter(|entry| entry.is_live())
            .map(|entry| entry.value().clone())
    }

    /// Writes `key` into the map without touching the log.
    ///
    /// # Returns
    ///
    /// The entry that was stored, or `None` if `ttl` is zero and the write was
    /// ignored.
    pub fn put(&self, key: String, value: String, ttl: Ttl) -> Option<Entry> {
        let expiry = ttl.expiry_from_now()?;
        let entry = Entry::new(value, expiry);

        self.map.insert(key, entry.clone());
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        Some(entry)
    }

    /// Queues a stored entry for the log.
    ///
    /// Waits while the persist queue is full. Does nothing when persistence is
    /// disabled or the shard is not running.
    pub async fn persist(&self, key: String, entry: Entry) {
        let Some(tx) = self.persist_tx.get() else {
            return;
        };
        if tx.send(LogRecord::new(key, entry)).await.is_err() {
            debug!(shard = self.id, "Persister closed, log record dropped");
        }
    }

    /// Writes `key` and queues it for the log.
    ///
    /// # Returns
    ///
    /// `false` if `ttl` is zero and nothing was written.
    pub async fn set(&self, key: String, value: String, ttl: Ttl) -> bool {
        match self.put(key.clone(), value, ttl) {
            Some(entry) => {
                self.persist(key, entry).await;
                true
            }
            None => false,
        }
    }

    /// Inserts an entry exactly as given, bypassing TTL computation and the log.
    pub fn restore(&self, key: String, entry: Entry) {
        self.map.insert(key, entry);
    }

    /// Calls `f` for every live entry.
    ///
    /// Concurrent writes may or may not be observed; the map is never
    /// mutated by the iteration itself.
    pub fn range<F: FnMut(&str, &Entry)>(&self, mut f: F) {
        let now = unix_now();
        for item in self.map.iter() {
            if item.value().is_live_at(now) {
                f(item.key(), item.value());
            }
        }
    }

    /// Removes every entry that is no longer live.
    ///
    /// # Returns
    ///
    /// The number of entries removed.
    pub fn cleanup_expired(&self) -> u64 {
        let now = unix_now();
        let mut removed = 0u64;

        self.map.retain(|_, entry| {
            let live = entry.is_live_at(now);
            if !live {
                removed += 1;
            }
            live
        });

        if removed > 0 {
            self.counters.expired.fetch_add(removed, Ordering::Relaxed);
        }
        removed
    }

    /// Number of entries held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the shard holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns shard statistics.
    pub fn stats(&self) -> ShardStats {
        ShardStats {
            keys: self.map.len() as u64,
            gets: self.counters.gets.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            appended: self.counters.appended.load(Ordering::Relaxed),
            append_failures: self.counters.append_failures.load(Ordering::Relaxed),
        }
    }

    /// Replays the log into the map, then rewrites the log with one record per
    /// live key.
    ///
    /// Must be called before [`run`](Self::run). Without a log this only marks
    /// the shard as loaded.
    pub fn load(&self) -> StoreResult<LoadReport> {
        if self.running.load(Ordering::Acquire) {
            return Err(StoreError::AlreadyRunning(self.id));
        }

        let Some(log) = &self.log else {
            self.loaded.store(true, Ordering::Release);
            return Ok(LoadReport::default());
        };

        let replayed = log.replay(|record| self.restore(record.key, record.entry))?;
        let dropped = self.cleanup_expired();

        let mut snapshot = Vec::with_capacity(self.map.len());
        self.range(|key, entry| snapshot.push(LogRecord::new(key, entry.clone())));
        let retained = log.compact(snapshot)?;

        self.loaded.store(true, Ordering::Release);
        info!(
            shard = self.id,
            replayed,
            retained,
            dropped,
            "Shard log loaded"
        );
        Ok(LoadReport { replayed, retained })
    }

    /// Starts the expiry sweeper and, when persistence is enabled, the log
    /// persister.
    pub fn run(self: &Arc<Self>) -> StoreResult<()> {
        if self.cancel.is_cancelled() {
            return Err(StoreError::Closed(self.id));
        }
        if self.log.is_some() && !self.loaded.load(Ordering::Acquire) {
            return Err(StoreError::NotLoaded(self.id));
        }
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(StoreError::AlreadyRunning(self.id));
        }

        if let Some(log) = &self.log {
            let file = match log.append_handle() {
                Ok(file) => file,
                Err(e) => {
                    self.running.store(false, Ordering::Release);
                    return Err(e);
                }
            };
            let (tx, rx) = mpsc::channel(self.config.persist_queue.max(1));
            let writer = LogWriter::new(self.id, file, rx, Arc::clone(&self.counters));
            self.tracker.spawn(writer.run(self.cancel.clone()));
            let _ = self.persist_tx.set(tx);
        }

        if self.config.gc_workers > 1 {
            warn!(
                shard = self.id,
                gc_workers = self.config.gc_workers,
                "Only one sweeper per shard is supported"
            );
        }
        self.tracker.spawn(expiry::sweep_loop(
            Arc::clone(self),
            self.config.gc_interval,
            self.cancel.clone(),
        ));

        info!(shard = self.id, persist = self.log.is_some(), "Shard running");
        Ok(())
    }

    /// Stops the background tasks and waits for them to exit.
    ///
    /// Queued log records are written and synced before this returns. Safe to
    /// call more than once.
    pub async fn close(&self) -> StoreResult<()> {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.running.store(false, Ordering::Release);

        info!(shard = self.id, keys = self.map.len(), "Shard closed");
        Ok(())
    }
}
