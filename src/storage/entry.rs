//! Stored values and their expiry.
//!
//! Expiry is an absolute Unix timestamp in seconds so that it survives a
//! restart: the same number is written to the shard log and compared against
//! the wall clock after replay.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix time in whole seconds.
#[inline]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// How long a value should live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ttl {
    /// The value never expires
    Never,
    /// The value expires this long after it is written.
    ///
    /// A zero duration makes the write a no-op.
    After(Duration),
}

impl Ttl {
    /// Builds a TTL from signed seconds.
    ///
    /// Negative means never expire, zero means do not store, positive is a
    /// lifetime in seconds.
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            s if s < 0 => Ttl::Never,
            s => Ttl::After(Duration::from_secs(s as u64)),
        }
    }

    /// Returns true if a write with this TTL is ignored.
    #[inline]
    pub fn is_noop(&self) -> bool {
        matches!(self, Ttl::After(d) if d.is_zero())
    }

    /// Absolute expiry for a value written now, or `None` for a no-op TTL.
    ///
    /// `0` means "never expires". Sub-second lifetimes round up to a whole
    /// second and lifetimes past the end of `i64` saturate.
    pub fn expiry_from_now(&self) -> Option<i64> {
        match self {
            Ttl::Never => Some(0),
            Ttl::After(d) if d.is_zero() => None,
            Ttl::After(d) => Some(unix_now().saturating_add(ceil_secs(*d))),
        }
    }
}

/// Whole seconds in `d`, rounded up.
fn ceil_secs(d: Duration) -> i64 {
    let secs = d.as_secs().saturating_add(u64::from(d.subsec_nanos() > 0));
    i64::try_from(secs).unwrap_or(i64::MAX)
}

impl From<Duration> for Ttl {
    fn from(d: Duration) -> Self {
        Ttl::After(d)
    }
}

/// A value together with its absolute expiry.
///
/// Entries are never edited in place; a write replaces the whole entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The stored value
    pub value: String,
    /// Unix seconds after which the entry is dead (`<= 0` = never)
    pub expiry: i64,
}

impl Entry {
    /// Creates an entry with an explicit absolute expiry.
    pub fn new(value: impl Into<String>, expiry: i64) -> Self {
        Self {
            value: value.into(),
            expiry,
        }
    }

    /// Returns true if the entry never expires.
    #[inline]
    pub fn is_persistent(&self) -> bool {
        self.expiry <= 0
    }

    /// Returns true if the entry is still visible at `now`.
    #[inline]
    pub fn is_live_at(&self, now: i64) -> bool {
        self.expiry <= 0 || self.expiry > now
    }

    /// Returns true if the entry is still visible.
    #[inline]
    pub fn is_live(&self) -> bool {
        self.is_live_at(unix_now())
    }
}
