//! Separator-Framed Record Codec
//!
//! This module turns a sequence of records into one continuous byte stream and
//! recovers the same sequence from it. It is the on-disk format of every shard
//! log in TimedKV.
//!
//! ## Frame Format
//!
//! ```text
//! ┌──────────────────────┬────────────┬──────────────────────┬────────────┐
//! │  record 0 (bincode)  │ SEPARATOR  │  record 1 (bincode)  │ SEPARATOR  │ ...
//! └──────────────────────┴────────────┴──────────────────────┴────────────┘
//! ```
//!
//! There is no header, no length prefix and no checksum. Records are found by
//! scanning for [`SEPARATOR`], a fixed 16-byte sequence that does not overlap
//! with itself and cannot occur inside a UTF-8 string.
//!
//! ## Reassembly
//!
//! The serialized payload is not self-delimiting, so a payload that happens to
//! contain the separator is cut in two by the scan. The decoder detects this
//! because the first piece is shorter than the smallest record that can exist
//! (`min_record_len`): it keeps the piece, re-appends the separator it swallowed
//! and prepends both to the next token. A separator that straddles two reads
//! from the underlying reader is handled by rescanning the tail of the buffer
//! after every refill.
//!
//! ## Example
//!
//! ```
//! use timedkv::codec::{RecordDecoder, RecordEncoder};
//!
//! let mut encoder = RecordEncoder::new(Vec::new());
//! encoder.encode(&("ping".to_string(), 1u64)).unwrap();
//! encoder.encode(&("pong".to_string(), 2u64)).unwrap();
//! let bytes = encoder.into_inner();
//!
//! let mut decoded = Vec::new();
//! let mut decoder = RecordDecoder::new(bytes.as_slice());
//! decoder.decode(|record: (String, u64)| decoded.push(record)).unwrap();
//! assert_eq!(decoded, vec![("ping".to_string(), 1), ("pong".to_string(), 2)]);
//! ```

pub mod decoder;
pub mod encoder;

pub use decoder::{DecodeStats, RecordDecoder};
pub use encoder::{encode_frame, RecordEncoder};

use thiserror::Error;

/// Marks the end of every record in the stream.
///
/// The leading `0xF1` is never followed by `0x7E` in valid UTF-8 and appears
/// nowhere else in the sequence, so the separator has no self-overlap.
pub const SEPARATOR: [u8; 16] = [
    0xF1, 0x7E, 0x5D, b'T', b'I', b'M', b'E', b'D', b'K', b'V', 0x00, 0x9C, 0xA3, 0xE4, 0x1B,
    0x42,
];

/// Length of [`SEPARATOR`] in bytes.
pub const SEPARATOR_LEN: usize = SEPARATOR.len();

/// Default lower bound on the size of one encoded record: a single
/// fixed-width length prefix.
pub const DEFAULT_MIN_RECORD_LEN: usize = 8;

/// Default number of bytes pulled from the reader per refill (64 KB).
pub const DEFAULT_SCAN_CAPACITY: usize = 64 * 1024;

/// Maximum size of a single encoded record (512 MB).
///
/// Also caps what a corrupt length prefix can make the decoder allocate.
pub const MAX_RECORD_SIZE: usize = 512 * 1024 * 1024;

/// Errors that can occur while encoding or decoding a record stream.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The underlying reader or writer failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be serialized
    #[error("failed to encode record: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// A complete token between two separators is not a valid record
    #[error("malformed record at byte {offset}: {source}")]
    Decode {
        offset: u64,
        #[source]
        source: bincode::error::DecodeError,
    },

    /// A token decoded into a record but left bytes behind
    #[error("record at byte {offset} has {trailing} trailing bytes")]
    TrailingBytes { offset: u64, trailing: usize },

    /// The stream ended in the middle of a record
    #[error("truncated record at byte {offset} ({len} bytes before end of stream)")]
    Truncated { offset: u64, len: usize },
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// The bincode configuration shared by the encoder and decoder.
///
/// Fixed-width integers keep the minimum size of a record predictable, which
/// is what the reassembly threshold relies on.
pub(crate) fn wire_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_fixed_int_encoding()
        .with_limit::<MAX_RECORD_SIZE>()
}

/// Finds the first separator at or after `from`.
pub(crate) fn find_separator(buf: &[u8], from: usize) -> Option<usize> {
    if buf.len() < from + SEPARATOR_LEN {
        return None;
    }
    buf[from..]
        .windows(SEPARATOR_LEN)
        .position(|window| window == SEPARATOR)
        .map(|pos| pos + from)
}
