//! Durable Shard Log
//!
//! Every shard mirrors its writes into one append-only file. On startup the
//! file is replayed into the map and then rewritten so that it holds exactly
//! one record per key, which keeps its size proportional to the number of
//! keys rather than the number of writes ever made.
//!
//! Appends are write-behind: [`TtlShard`](crate::storage::TtlShard) pushes a
//! [`LogRecord`] onto a bounded queue and the [`LogWriter`] task drains it.
//! A failed append is logged and counted; it never fails the write that
//! produced it.

use crate::codec::{encode_frame, RecordDecoder, RecordEncoder};
use crate::storage::entry::Entry;
use crate::storage::shard::Counters;
use crate::storage::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// File name used when a log path names a directory.
pub const DEFAULT_LOG_NAME: &str = ".temp.db";

/// One persisted write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub key: String,
    pub entry: Entry,
}

impl LogRecord {
    /// Encoded size of a record with an empty key and value: two 8-byte
    /// length prefixes and the 8-byte expiry.
    pub const MIN_ENCODED_LEN: usize = 24;

    pub fn new(key: impl Into<String>, entry: Entry) -> Self {
        Self {
            key: key.into(),
            entry,
        }
    }
}

/// The on-disk log of a single shard.
#[derive(Debug)]
pub struct DurableLog {
    path: PathBuf,
}

impl DurableLog {
    /// Opens the log at `path`, creating the file and its directory if needed.
    ///
    /// A path that names a directory gets [`DEFAULT_LOG_NAME`] appended.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = resolve_path(path.as_ref());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Open {
                path: path.clone(),
                source,
            })?;
        }

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| StoreError::Open {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), "Log file opened");
        Ok(Self { path })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the log file in bytes.
    pub fn size(&self) -> StoreResult<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Reads every record in the log, in write order.
    ///
    /// # Returns
    ///
    /// The number of records replayed.
    pub fn replay<F: FnMut(LogRecord)>(&self, apply: F) -> StoreResult<u64> {
        let file = File::open(&self.path)?;
        let mut decoder =
            RecordDecoder::new(file).with_min_record_len(LogRecord::MIN_ENCODED_LEN);
        let replayed = decoder.decode(apply)?;

        let stats = decoder.stats();
        debug!(
            path = %self.path.display(),
            records = replayed,
            bytes = stats.bytes_read,
            reassembled = stats.reassembled,
            "Log replayed"
        );
        Ok(replayed)
    }

    /// Replaces the whole log with `records`.
    ///
    /// The new content is written to a sibling file and renamed over the log,
    /// so a crash mid-compaction leaves the old log intact.
    pub fn compact<I>(&self, records: I) -> StoreResult<u64>
    where
        I: IntoIterator<Item = LogRecord>,
    {
        let tmp = self.path.with_extension("compact");
        let file = File::create(&tmp)?;
        let mut encoder = RecordEncoder::new(BufWriter::new(file));

        for record in records {
            encoder.encode(&record)?;
        }
        encoder.flush()?;
        encoder.get_mut().get_ref().sync_all()?;
        let written = encoder.records();
        drop(encoder);

        fs::rename(&tmp, &self.path)?;

        debug!(
            path = %self.path.display(),
            records = written,
            "Log compacted"
        );
        Ok(written)
    }

    /// Opens an append handle for the persister.
    pub(crate) fn append_handle(&self) -> StoreResult<tokio::fs::File> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| StoreError::Open {
                path: self.path.clone(),
                source,
            })?;
        Ok(tokio::fs::File::from_std(file))
    }
}

fn resolve_path(path: &Path) -> PathBuf {
    let names_dir = path.as_os_str().to_string_lossy().ends_with(MAIN_SEPARATOR)
        || path.is_dir()
        || path.as_os_str().is_empty();
    if names_dir {
        path.join(DEFAULT_LOG_NAME)
    } else {
        path.to_path_buf()
    }
}

/// Background task that appends queued records to a shard log.
pub(crate) struct LogWriter {
    shard: usize,
    writer: tokio::io::BufWriter<tokio::fs::File>,
    rx: mpsc::Receiver<LogRecord>,
    counters: Arc<Counters>,
}

impl LogWriter {
    pub(crate) fn new(
        shard: usize,
        file: tokio::fs::File,
        rx: mpsc::Receiver<LogRecord>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            shard,
            writer: tokio::io::BufWriter::new(file),
            rx,
            counters,
        }
    }

    /// Appends records until cancelled, then drains the queue and syncs.
    pub(crate) async fn run(mut self, cancel: CancellationToken) {
        debug!(shard = self.shard, "Persister started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                maybe_record = self.rx.recv() => match maybe_record {
                    Some(record) => {
                        self.append(&record).await;
                        if self.rx.is_empty() {
                            self.flush().await;
                        }
                    }
                    None => break,
                },
            }
        }

        self.drain().await;
        info!(shard = self.shard, "Persister stopped");
    }

    async fn append(&mut self, record: &LogRecord) {
        let frame = match encode_frame(record) {
            Ok(frame) => frame,
            Err(e) => {
                self.counters.append_failures.fetch_add(1, Ordering::Relaxed);
                error!(shard = self.shard, key = %record.key, "Failed to encode log record: {}", e);
                return;
            }
        };

        match self.writer.write_all(&frame).await {
            Ok(()) => {
                self.counters.appended.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.append_failures.fetch_add(1, Ordering::Relaxed);
                error!(shard = self.shard, key = %record.key, "Failed to append log record: {}", e);
            }
        }
    }

    async fn flush(&mut self) {
        if let Err(e) = self.writer.flush().await {
            error!(shard = self.shard, "Failed to flush log: {}", e);
        }
    }

    /// Stops accepting records and writes out everything still queued.
    async fn drain(&mut self) {
        self.rx.close();
        let mut drained = 0u64;
        while let Some(record) = self.rx.recv().await {
            self.append(&record).await;
            drained += 1;
        }
        if drained > 0 {
            debug!(shard = self.shard, drained, "Drained pending log records");
        }

        self.flush().await;
        if let Err(e) = self.writer.get_ref().sync_all().await {
            warn!(shard = self.shard, "Failed to sync log: {}", e);
        }
    }
}
