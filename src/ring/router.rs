//! The router and the per-shard listeners that serve it.

use crate::config::RouterConfig;
use crate::ring::task::{Task, TaskKind};
use crate::ring::{RouterError, RouterResult};
use crate::storage::{ShardStats, Ttl, TtlShard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

#[derive(Debug, Default)]
struct Counters {
    gets: AtomicU64,
    sets: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    forwards: AtomicU64,
}

/// Router statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Get requests submitted
    pub gets: u64,
    /// Set requests submitted
    pub sets: u64,
    /// Gets answered with a value
    pub hits: u64,
    /// Gets that went around the whole ring without a hit
    pub misses: u64,
    /// Ring forwards performed by all listeners
    pub forwards: u64,
}

/// Presents N shards as one keyspace.
///
/// # Example
///
/// ```
/// use timedkv::config::{RouterConfig, StoreConfig};
/// use timedkv::ring::Router;
/// use timedkv::storage::TtlShard;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = StoreConfig { persist: false, ..Default::default() };
/// let shards = (0..3)
///     .map(|i| Arc::new(TtlShard::open(i, &store).unwrap()))
///     .collect();
///
/// let config = RouterConfig { workers: 3, ..Default::default() };
/// let mut router = Router::new(shards, config).unwrap();
/// router.run().unwrap();
///
/// router.set("ping", "pong").await.unwrap();
/// assert_eq!(router.get("ping").await.unwrap(), Some("pong".to_string()));
/// assert_eq!(router.get("missing").await.unwrap(), None);
///
/// router.stop().await;
/// # }
/// ```
pub struct Router {
    shards: Vec<Arc<TtlShard>>,
    config: RouterConfig,
    intake_tx: mpsc::Sender<Task>,
    /// Shared by every listener; whoever holds the lock takes the next task
    intake_rx: Arc<Mutex<mpsc::Receiver<Task>>>,
    /// `ring_tx[i]` feeds shard `i`
    ring_tx: Vec<mpsc::UnboundedSender<Task>>,
    /// Handed to the listeners by `run`
    ring_rx: Option<Vec<mpsc::UnboundedReceiver<Task>>>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("shards", &self.shards.len())
            .field("running", &self.is_running())
            .field("stopped", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Router {
    /// Builds the ring over `shards`, in the given order.
    ///
    /// Fails if the number of shards differs from `config.workers`.
    pub fn new(shards: Vec<Arc<TtlShard>>, config: RouterConfig) -> RouterResult<Self> {
        if config.workers == 0 {
            return Err(RouterError::NoShards);
        }
        if shards.len() != config.workers {
            return Err(RouterError::ShardCountMismatch {
                expected: config.workers,
                actual: shards.len(),
            });
        }

        let (intake_tx, intake_rx) = mpsc::channel(config.intake_capacity.max(1));
        let (ring_tx, ring_rx): (Vec<_>, Vec<_>) =
            (0..shards.len()).map(|_| mpsc::unbounded_channel()).unzip();

        Ok(Self {
            shards,
            config,
            intake_tx,
            intake_rx: Arc::new(Mutex::new(intake_rx)),
            ring_tx,
            ring_rx: Some(ring_rx),
            counters: Arc::new(Counters::default()),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// Starts one listener per shard.
    pub fn run(&mut self) -> RouterResult<()> {
        if self.cancel.is_cancelled() {
            return Err(RouterError::Stopped);
        }
        let receivers = self.ring_rx.take().ok_or(RouterError::AlreadyRunning)?;
        let n = self.shards.len();

        for (index, inbound) in receivers.into_iter().enumerate() {
            let listener = Listener {
                index,
                shard: Arc::clone(&self.shards[index]),
                intake: Arc::clone(&self.intake_rx),
                inbound,
                next: self.ring_tx[(index + 1) % n].clone(),
                refresh: Ttl::After(self.config.ttl),
                counters: Arc::clone(&self.counters),
            };
            self.tracker.spawn(listener.run(self.cancel.clone()));
        }

        info!(shards = n, ttl = ?self.config.ttl, "Router running");
        Ok(())
    }

    /// Cancels every listener and waits for all of them to exit.
    ///
    /// Requests still queued are dropped; their callers get
    /// [`RouterError::Stopped`].
    pub async fn stop(&self) {
        info!("Stopping router");
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        let mut intake = self.intake_rx.lock().await;
        intake.close();
        let mut dropped = 0usize;
        while intake.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Dropped queued requests on shutdown");
        }
        info!("Router stopped");
    }

    /// Returns true between `run` and `stop`.
    pub fn is_running(&self) -> bool {
        self.ring_rx.is_none() && !self.cancel.is_cancelled()
    }

    /// Looks `key` up across the ring.
    ///
    /// A hit resets the entry's TTL to the configured default.
    pub async fn get(&self, key: impl Into<String>) -> RouterResult<Option<String>> {
        self.ensure_running()?;
        self.counters.gets.fetch_add(1, Ordering::Relaxed);

        let (task, rx) = Task::get(key);
        self.submit(task, rx).await
    }

    /// Like [`get`](Self::get), but reports a missing key as an empty string.
    pub async fn get_or_empty(&self, key: impl Into<String>) -> RouterResult<String> {
        Ok(self.get(key).await?.unwrap_or_default())
    }

    /// Stores `key` with the configured default TTL.
    pub async fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> RouterResult<bool> {
        self.set_with_ttl(key, value, Ttl::After(self.config.ttl)).await
    }

    /// Stores `key` in whichever shard picks the request up.
    ///
    /// Returns once that shard has written its map. `Ok(false)` means the TTL
    /// was zero and nothing was stored.
    pub async fn set_with_ttl(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Ttl,
    ) -> RouterResult<bool> {
        self.ensure_running()?;
        self.counters.sets.fetch_add(1, Ordering::Relaxed);

        let (task, rx) = Task::set(key, value, ttl);
        self.submit(task, rx).await
    }

    /// Number of shards in the ring.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// The shards in ring order.
    pub fn shards(&self) -> &[Arc<TtlShard>] {
        &self.shards
    }

    /// Returns router statistics.
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            gets: self.counters.gets.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            forwards: self.counters.forwards.load(Ordering::Relaxed),
        }
    }

    /// Sum of every shard's statistics.
    pub fn shard_stats(&self) -> ShardStats {
        let mut total = ShardStats::default();
        for shard in &self.shards {
            total += shard.stats();
        }
        total
    }

    fn ensure_running(&self) -> RouterResult<()> {
        if self.cancel.is_cancelled() {
            return Err(RouterError::Stopped);
        }
        if self.ring_rx.is_some() {
            return Err(RouterError::NotRunning);
        }
        Ok(())
    }

    async fn submit<T>(&self, task: Task, rx: oneshot::Receiver<T>) -> RouterResult<T> {
        self.intake_tx
            .send(task)
            .await
            .map_err(|_| RouterError::Stopped)?;
        rx.await.map_err(|_| RouterError::Stopped)
    }
}

/// Serves one shard: takes tasks from the shared intake and from its own
/// ring inbound.
struct Listener {
    index: usize,
    shard: Arc<TtlShard>,
    intake: Arc<Mutex<mpsc::Receiver<Task>>>,
    inbound: mpsc::UnboundedReceiver<Task>,
    /// Inbound of shard `(index + 1) % n`
    next: mpsc::UnboundedSender<Task>,
    /// TTL re-applied on every hit
    refresh: Ttl,
    counters: Arc<Counters>,
}

impl Listener {
    async fn run(mut self, cancel: CancellationToken) {
        debug!(shard = self.index, "Listener started");

        loop {
            // Forwarded lookups go first so traversals already in flight finish
            let task = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(task) = self.inbound.recv() => task,
                task = next_intake(&self.intake) => match task {
                    Some(task) => task,
                    None => break,
                },
            };
            self.handle(task).await;
        }

        debug!(shard = self.index, "Listener stopped");
    }

    async fn handle(&self, task: Task) {
        let Task {
            key,
            kind,
            origin,
            hops,
        } = task;

        match kind {
            TaskKind::Set {
                value,
                ttl,
                respond,
            } => match self.shard.put(key.clone(), value, ttl) {
                Some(entry) => {
                    let _ = respond.send(true);
                    self.shard.persist(key, entry).await;
                }
                None => {
                    let _ = respond.send(false);
                }
            },
            TaskKind::Get { respond } => self.lookup(key, respond, origin, hops).await,
        }
    }

    async fn lookup(
        &self,
        key: String,
        respond: oneshot::Sender<Option<String>>,
        origin: Option<usize>,
        hops: usize,
    ) {
        if origin == Some(self.index) {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            trace!(shard = self.index, key = %key, hops, "Key not found in any shard");
            let _ = respond.send(None);
            return;
        }

        if let Some(value) = self.shard.get(&key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            trace!(shard = self.index, key = %key, hops, "Key found");
            let _ = respond.send(Some(value.clone()));

            if let Some(entry) = self.shard.put(key.clone(), value, self.refresh) {
                self.shard.persist(key, entry).await;
            }
            return;
        }

        let task = Task {
            key,
            kind: TaskKind::Get { respond },
            origin: Some(origin.unwrap_or(self.index)),
            hops: hops + 1,
        };
        self.counters.forwards.fetch_add(1, Ordering::Relaxed);

        if self.next.send(task).is_err() {
            // The next listener is gone; dropping the task tells the caller
            debug!(shard = self.index, "Ring closed, dropping forwarded lookup");
        }
    }
}

async fn next_intake(intake: &Mutex<mpsc::Receiver<Task>>) -> Option<Task> {
    intake.lock().await.recv().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::storage::{unix_now, Entry};
    use std::time::Duration;

    fn shards(n: usize) -> Vec<Arc<TtlShard>> {
        let config = StoreConfig {
            persist: false,
            ..Default::default()
        };
        (0..n)
            .map(|i| Arc::new(TtlShard::open(i, &config).unwrap()))
            .collect()
    }

    fn config(workers: usize) -> RouterConfig {
        RouterConfig {
            workers,
            ..Default::default()
        }
    }

    fn running(n: usize) -> Router {
        let mut router = Router::new(shards(n), config(n)).unwrap();
        router.run().unwrap();
        router
    }

    #[test]
    fn test_shard_count_mismatch() {
        let result = Router::new(shards(3), config(5));
        assert_eq!(
            result.err(),
            Some(RouterError::ShardCountMismatch {
                expected: 5,
                actual: 3
            })
        );
    }

    #[test]
    fn test_no_shards() {
        assert_eq!(
            Router::new(Vec::new(), config(0)).err(),
            Some(RouterError::NoShards)
        );
    }

    #[tokio::test]
    async fn test_requests_before_run() {
        let router = Router::new(shards(2), config(2)).unwrap();
        assert_eq!(router.get("key").await, Err(RouterError::NotRunning));
        assert_eq!(router.set("key", "value").await, Err(RouterError::NotRunning));
    }

    #[tokio::test]
    async fn test_run_twice() {
        let mut router = running(2);
        assert_eq!(router.run(), Err(RouterError::AlreadyRunning));
        router.stop().await;
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let router = running(3);

        assert_eq!(router.set("key", "value").await, Ok(true));
        assert_eq!(router.get("key").await, Ok(Some("value".to_string())));

        router.stop().await;
    }

    #[tokio::test]
    async fn test_missing_key_visits_every_shard_once() {
        let router = running(4);

        assert_eq!(router.get("missing").await, Ok(None));

        let stats = router.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.forwards, 4);
        assert_eq!(router.shard_stats().gets, 4);

        router.stop().await;
    }

    #[tokio::test]
    async fn test_single_shard_ring() {
        let router = running(1);

        assert_eq!(router.get("missing").await, Ok(None));
        assert_eq!(router.stats().forwards, 1);

        router.set("key", "value").await.unwrap();
        assert_eq!(router.get("key").await, Ok(Some("value".to_string())));

        router.stop().await;
    }

    #[tokio::test]
    async fn test_key_in_one_shard_is_always_found() {
        for owner in 0..5 {
            let shards = shards(5);
            shards[owner].put("needle".into(), "found".into(), Ttl::Never);

            let mut router = Router::new(shards, config(5)).unwrap();
            router.run().unwrap();
            let router = Arc::new(router);

            let mut handles = Vec::new();
            for _ in 0..20 {
                let router = Arc::clone(&router);
                handles.push(tokio::spawn(async move { router.get("needle").await }));
            }
            for handle in handles {
                assert_eq!(handle.await.unwrap(), Ok(Some("found".to_string())));
            }

            let stats = router.stats();
            assert_eq!(stats.hits, 20);
            assert_eq!(stats.misses, 0);
            assert!(stats.forwards <= 20 * 4);

            router.stop().await;
        }
    }

    #[tokio::test]
    async fn test_zero_ttl_keeps_previous_value() {
        let router = running(1);

        router.set("key", "original").await.unwrap();
        assert_eq!(
            router.set_with_ttl("key", "ignored", Ttl::from_secs(0)).await,
            Ok(false)
        );
        assert_eq!(router.get("key").await, Ok(Some("original".to_string())));

        router.stop().await;
    }

    #[tokio::test]
    async fn test_hit_refreshes_ttl() {
        let shards = shards(2);
        shards[1].restore("key".into(), Entry::new("value", unix_now() + 2));

        let mut router = Router::new(shards, config(2)).unwrap();
        router.run().unwrap();

        assert_eq!(router.get("key").await, Ok(Some("value".to_string())));

        // The refresh is applied right after the answer is sent
        tokio::time::sleep(Duration::from_millis(50)).await;
        let entry = router.shards()[1].get_entry("key").unwrap();
        assert!(entry.expiry >= unix_now() + 59);

        router.stop().await;
    }

    #[tokio::test]
    async fn test_hit_refresh_turns_persistent_key_into_expiring() {
        let router = running(1);

        router.set_with_ttl("key", "value", Ttl::Never).await.unwrap();
        assert!(router.shards()[0].get_entry("key").unwrap().is_persistent());

        router.get("key").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!router.shards()[0].get_entry("key").unwrap().is_persistent());

        router.stop().await;
    }

    #[tokio::test]
    async fn test_huge_ttl_keeps_listener_alive() {
        let router = running(1);

        assert_eq!(
            router.set_with_ttl("key", "value", Ttl::from_secs(i64::MAX)).await,
            Ok(true)
        );
        assert_eq!(
            router.set_with_ttl("max", "value", Ttl::After(Duration::MAX)).await,
            Ok(true)
        );

        let lookup = tokio::time::timeout(Duration::from_secs(5), router.get("other"));
        assert_eq!(lookup.await.unwrap(), Ok(None));
        assert_eq!(router.get("key").await, Ok(Some("value".to_string())));

        router.stop().await;
    }

    #[tokio::test]
    async fn test_sub_second_default_ttl_survives_refresh() {
        let config = RouterConfig {
            workers: 2,
            ttl: Duration::from_millis(500),
            ..Default::default()
        };
        let mut router = Router::new(shards(2), config).unwrap();
        router.run().unwrap();

        for i in 0..50 {
            let key = format!("key{}", i);
            assert_eq!(router.set(key.clone(), "value").await, Ok(true));
            assert_eq!(router.get(key.clone()).await, Ok(Some("value".to_string())));
            assert_eq!(router.get(key).await, Ok(Some("value".to_string())));
        }

        router.stop().await;
    }

    #[tokio::test]
    async fn test_empty_value_is_distinct_from_missing() {
        let router = running(2);

        router.set("empty", "").await.unwrap();

        assert_eq!(router.get("empty").await, Ok(Some(String::new())));
        assert_eq!(router.get("missing").await, Ok(None));

        // The empty-string contract cannot tell the two apart
        assert_eq!(router.get_or_empty("empty").await, Ok(String::new()));
        assert_eq!(router.get_or_empty("missing").await, Ok(String::new()));

        router.stop().await;
    }

    #[tokio::test]
    async fn test_requests_after_stop() {
        let router = running(3);
        router.set("key", "value").await.unwrap();

        router.stop().await;
        assert!(!router.is_running());
        assert_eq!(router.get("key").await, Err(RouterError::Stopped));
        assert_eq!(router.set("key", "v").await, Err(RouterError::Stopped));
    }
}
