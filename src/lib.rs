//! # timedkv - A Sharded Key-Value Store with Expiring Entries
//!
//! timedkv keeps string keys and values in a fixed number of independent
//! in-memory shards. Every entry carries an expiry time, and every shard can
//! mirror its writes into an append-only log that is replayed on startup.
//!
//! ## Features
//!
//! - **TTL on every entry**: expired entries are hidden on read and swept in
//!   the background
//! - **Write-behind persistence**: each shard appends to its own log through a
//!   bounded queue and compacts it on load
//! - **Index-free routing**: shards form a ring; a lookup travels the ring
//!   until one shard answers or every shard has missed
//! - **Async**: built on Tokio, one listener task per shard
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               TimedStore                                │
//! │                                                                         │
//! │   get / set ──> ┌──────────────────────────────────────────────────┐    │
//! │                 │                   Router                         │    │
//! │                 │    shared intake ──> Listener 0..N (ring)        │    │
//! │                 └──────────────────────┬───────────────────────────┘    │
//! │                                        │                                │
//! │            ┌───────────────────────────┼──────────────────────────┐     │
//! │            ▼                           ▼                          ▼     │
//! │   ┌────────────────┐          ┌────────────────┐         ┌────────────┐ │
//! │   │   TtlShard 0   │          │   TtlShard 1   │   ...   │ TtlShard N │ │
//! │   │ DashMap + TTL  │          │ DashMap + TTL  │         │            │ │
//! │   │ sweeper/writer │          │ sweeper/writer │         │            │ │
//! │   └───────┬────────┘          └───────┬────────┘         └─────┬──────┘ │
//! │           ▼                           ▼                        ▼        │
//! │      #store0.db                  #store1.db               #storeN.db    │
//! │        (record codec: bincode frames + separator)                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use timedkv::{Config, TimedStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut store = TimedStore::open(Config::default())?;
//!     store.start().await?;
//!
//!     store.set("name", "alice").await?;
//!     println!("{:?}", store.get("name").await?);
//!
//!     store.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`codec`]: framing of serialized records in a byte stream
//! - [`storage`]: TTL shards and their durable logs
//! - [`ring`]: the router and the shard ring behind it
//! - [`service`]: startup and shutdown of the whole store
//! - [`config`]: TOML configuration

pub mod codec;
pub mod config;
pub mod ring;
pub mod service;
pub mod storage;

pub use codec::{CodecError, RecordDecoder, RecordEncoder};
pub use config::Config;
pub use ring::{Router, RouterError, RouterStats};
pub use service::{ServiceError, TimedStore};
pub use storage::{Entry, StoreError, Ttl, TtlShard};

/// Version of timedkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
