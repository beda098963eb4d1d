//! Shard Ring & Router
//!
//! This module makes a fixed pool of independent [`TtlShard`]s behave as one
//! keyspace without any key-to-shard index.
//!
//! ## Architecture
//!
//! ```text
//!                    Router::get / Router::set
//!                               │
//!                               ▼
//!                ┌──────────────────────────────┐
//!                │  shared intake (mpsc, MPMC)  │
//!                └──────┬────────┬────────┬─────┘
//!                       │        │        │   whichever listener is idle
//!                       ▼        ▼        ▼
//!                  ┌────────┐┌────────┐┌────────┐
//!              ┌──>│Shard 0 ││Shard 1 ││Shard 2 │──┐
//!              │   └───┬────┘└───┬────┘└───▲────┘  │
//!              │       └─────────┘─────────┘       │
//!              │        ring inbound (miss)        │
//!              └───────────────────────────────────┘
//! ```
//!
//! ## Routing
//!
//! - **Set** is applied by the shard that dequeues it. Placement depends on
//!   which listener was free, not on the key.
//! - **Get** is looked up in the dequeuing shard. On a miss the shard stamps
//!   its own index as the task's origin and forwards it to the next shard.
//!   Each shard along the ring either answers (and refreshes the entry's TTL)
//!   or forwards again. When the task comes back to its origin the origin
//!   answers not-found. A lookup therefore visits every shard at most once.
//!
//! The ring is an index-addressed `Vec` of senders; shard `i` forwards to
//! shard `(i + 1) % n`.
//!
//! [`TtlShard`]: crate::storage::TtlShard

pub mod router;
pub mod task;

pub use router::{Router, RouterStats};
pub use task::{Task, TaskKind};

use thiserror::Error;

/// Errors returned by the router.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// The number of shards does not match the configured worker count
    #[error("router expects {expected} shards, got {actual}")]
    ShardCountMismatch { expected: usize, actual: usize },

    #[error("router needs at least one shard")]
    NoShards,

    #[error("router is already running")]
    AlreadyRunning,

    #[error("router is not running")]
    NotRunning,

    /// The router was stopped before the request was answered
    #[error("router stopped")]
    Stopped,
}

/// Result type for router operations.
pub type RouterResult<T> = Result<T, RouterError>;
