//! Streaming Record Decoder
//!
//! Reads a separator-framed stream in fixed-size chunks and hands every
//! recovered record to a callback, in the order the records were written.
//!
//! ## How the Decoder Works
//!
//! ```text
//!  reader ──read(scan_capacity)──> buf ──find SEPARATOR──> token
//!                                                            │
//!                       ┌────────────────────────────────────┤
//!                       │ len < min_record_len               │ otherwise
//!                       ▼                                    ▼
//!             pending = token + SEPARATOR          decode(pending + token)
//!             (prepended to next token)                      │
//!                                                            ▼
//!                                                     callback(record)
//! ```
//!
//! 1. If the buffer holds no separator, pull another chunk from the reader and
//!    rescan the last `SEPARATOR_LEN - 1` bytes, since a separator may have
//!    been cut by the previous read.
//! 2. A token shorter than the smallest possible record cannot be a record on
//!    its own. It is the head of a record whose payload contained the
//!    separator, so it is kept together with the separator it lost.
//! 3. Anything left after the last separator at end of stream must decode as
//!    one complete record, otherwise the stream is truncated.

use crate::codec::{
    find_separator, wire_config, CodecError, CodecResult, DEFAULT_MIN_RECORD_LEN,
    DEFAULT_SCAN_CAPACITY, SEPARATOR, SEPARATOR_LEN,
};
use bytes::{Buf, BytesMut};
use serde::de::DeserializeOwned;
use std::io::{ErrorKind, Read};

/// Counters collected while decoding a stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStats {
    /// Records delivered to the callback
    pub records: u64,
    /// Short tokens that were carried over and joined with the next token
    pub reassembled: u64,
    /// Successful reads from the underlying reader
    pub refills: u64,
    /// Total bytes pulled from the underlying reader
    pub bytes_read: u64,
}

/// A token that was too short to be a record, waiting for the rest of it.
struct Pending {
    /// Stream offset where the record starts
    offset: u64,
    /// Bytes seen so far, including the separator that split them
    bytes: BytesMut,
}

/// Decodes a separator-framed stream from a reader.
pub struct RecordDecoder<R: Read> {
    reader: R,
    /// Bytes read but not yet consumed
    buf: BytesMut,
    /// Read target for each refill
    scratch: Vec<u8>,
    /// Tokens shorter than this are treated as fragments
    min_record_len: usize,
    /// Stream offset of `buf[0]`
    offset: u64,
    eof: bool,
    stats: DecodeStats,
}

impl<R: Read> std::fmt::Debug for RecordDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordDecoder")
            .field("buffered", &self.buf.len())
            .field("scan_capacity", &self.scratch.len())
            .field("min_record_len", &self.min_record_len)
            .field("offset", &self.offset)
            .field("eof", &self.eof)
            .finish()
    }
}

impl<R: Read> RecordDecoder<R> {
    /// Creates a decoder with the default scan capacity and fragment threshold.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(DEFAULT_SCAN_CAPACITY),
            scratch: vec![0; DEFAULT_SCAN_CAPACITY],
            min_record_len: DEFAULT_MIN_RECORD_LEN,
            offset: 0,
            eof: false,
            stats: DecodeStats::default(),
        }
    }

    /// Sets how many bytes are requested from the reader per refill.
    pub fn with_scan_capacity(mut self, capacity: usize) -> Self {
        self.scratch = vec![0; capacity.max(1)];
        self
    }

    /// Sets the size of the smallest record the stream can contain.
    ///
    /// Must not exceed the encoded size of any real record, or valid records
    /// will be mistaken for fragments.
    pub fn with_min_record_len(mut self, len: usize) -> Self {
        self.min_record_len = len;
        self
    }

    /// Returns the counters collected so far.
    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Decodes every record in the stream, calling `callback` once per record.
    ///
    /// # Returns
    ///
    /// The number of records delivered by this call.
    ///
    /// # Errors
    ///
    /// Stops at the first malformed record. Records before it have already been
    /// delivered; nothing after it is.
    pub fn decode<T, F>(&mut self, mut callback: F) -> CodecResult<u64>
    where
        T: DeserializeOwned,
        F: FnMut(T),
    {
        let mut decoded = 0u64;
        let mut pending: Option<Pending> = None;
        let mut search_from = 0usize;

        loop {
            let Some(pos) = find_separator(&self.buf, search_from) else {
                if self.eof {
                    break;
                }
                search_from = self.buf.len().saturating_sub(SEPARATOR_LEN - 1);
                self.fill()?;
                continue;
            };
            search_from = 0;

            let raw = self.buf.split_to(pos);
            self.buf.advance(SEPARATOR_LEN);
            let raw_offset = self.offset;
            self.offset += (pos + SEPARATOR_LEN) as u64;

            let (start, mut token) = join(pending.take(), raw_offset, raw);

            if token.len() < self.min_record_len {
                token.extend_from_slice(&SEPARATOR);
                self.stats.reassembled += 1;
                pending = Some(Pending {
                    offset: start,
                    bytes: token,
                });
                continue;
            }

            callback(decode_token(&token, start)?);
            decoded += 1;
            self.stats.records += 1;
        }

        let tail = self.buf.split();
        let tail_offset = self.offset;
        self.offset += tail.len() as u64;

        let (start, token) = join(pending, tail_offset, tail);
        if token.is_empty() {
            return Ok(decoded);
        }

        match decode_token(&token, start) {
            Ok(record) => {
                callback(record);
                decoded += 1;
                self.stats.records += 1;
                Ok(decoded)
            }
            Err(_) => Err(CodecError::Truncated {
                offset: start,
                len: token.len(),
            }),
        }
    }

    /// Pulls one chunk from the reader into the buffer.
    fn fill(&mut self) -> CodecResult<()> {
        loop {
            match self.reader.read(&mut self.scratch) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&self.scratch[..n]);
                    self.stats.refills += 1;
                    self.stats.bytes_read += n as u64;
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Prepends a pending fragment, if any, to a freshly scanned token.
fn join(pending: Option<Pending>, offset: u64, raw: BytesMut) -> (u64, BytesMut) {
    match pending {
        Some(mut p) => {
            p.bytes.extend_from_slice(&raw);
            (p.offset, p.bytes)
        }
        None => (offset, raw),
    }
}

/// Decodes exactly one record from a complete token.
fn decode_token<T: DeserializeOwned>(token: &[u8], offset: u64) -> CodecResult<T> {
    let (record, read) = bincode::serde::decode_from_slice::<T, _>(token, wire_config())
        .map_err(|source| CodecError::Decode { offset, source })?;

    if read != token.len() {
        return Err(CodecError::TrailingBytes {
            offset,
            trailing: token.len() - read,
        });
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RecordEncoder;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pair {
        key: String,
        value: String,
        expiry: i64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Blob {
        data: Vec<u8>,
    }

    fn pair(i: usize) -> Pair {
        Pair {
            key: format!("key:{}", i),
            value: "v".repeat(i % 37),
            expiry: i as i64 - 10,
        }
    }

    fn encode_all<T: Serialize>(records: &[T]) -> Vec<u8> {
        let mut encoder = RecordEncoder::new(Vec::new());
        for record in records {
            encoder.encode(record).unwrap();
        }
        encoder.into_inner()
    }

    fn decode_all<T: DeserializeOwned>(decoder: &mut RecordDecoder<&[u8]>) -> CodecResult<Vec<T>> {
        let mut out = Vec::new();
        decoder.decode(|record| out.push(record))?;
        Ok(out)
    }

    #[test]
    fn test_empty_stream() {
        let mut decoder = RecordDecoder::new(&[][..]);
        let records: Vec<Pair> = decode_all(&mut decoder).unwrap();
        assert!(records.is_empty());
        assert_eq!(decoder.stats().refills, 0);
    }

    #[test]
    fn test_single_record() {
        let bytes = encode_all(&[pair(1)]);
        let mut decoder = RecordDecoder::new(bytes.as_slice());
        assert_eq!(decode_all::<Pair>(&mut decoder).unwrap(), vec![pair(1)]);
    }

    #[test]
    fn test_preserves_order() {
        let records: Vec<Pair> = (0..50).map(pair).collect();
        let bytes = encode_all(&records);

        let mut decoder = RecordDecoder::new(bytes.as_slice());
        assert_eq!(decode_all::<Pair>(&mut decoder).unwrap(), records);
        assert_eq!(decoder.stats().records, 50);
    }

    #[test]
    fn test_separator_split_across_reads() {
        // 7-byte reads cut almost every separator in two
        let records: Vec<Pair> = (0..2_000).map(pair).collect();
        let bytes = encode_all(&records);

        let mut decoder = RecordDecoder::new(bytes.as_slice()).with_scan_capacity(7);
        assert_eq!(decode_all::<Pair>(&mut decoder).unwrap(), records);

        let stats = decoder.stats();
        assert_eq!(stats.records, 2_000);
        assert_eq!(stats.bytes_read, bytes.len() as u64);
        assert!(stats.refills > 2_000);
        assert_eq!(stats.reassembled, 0);
    }

    #[test]
    fn test_payload_containing_separator() {
        let mut data = vec![1, 2, 3];
        data.extend_from_slice(&SEPARATOR);
        data.extend_from_slice(&[4, 5]);
        let records = vec![
            Blob { data: vec![9; 40] },
            Blob { data },
            Blob { data: vec![7; 40] },
        ];
        let bytes = encode_all(&records);

        // 8-byte length prefix + 3 bytes is the head left before the embedded separator
        let mut decoder = RecordDecoder::new(bytes.as_slice())
            .with_scan_capacity(5)
            .with_min_record_len(12);
        assert_eq!(decode_all::<Blob>(&mut decoder).unwrap(), records);
        assert_eq!(decoder.stats().reassembled, 1);
    }

    #[test]
    fn test_many_embedded_separators_across_scan_sizes() {
        // Every third record carries the separator 0..=3 bytes into its payload,
        // so its head (8-byte prefix + up to 3 bytes) stays under 12
        let records: Vec<Blob> = (0..300usize)
            .map(|i| {
                if i % 3 == 0 {
                    let mut data = vec![(i % 7) as u8; i % 4];
                    data.extend_from_slice(&SEPARATOR);
                    data.extend(std::iter::repeat(0xAA).take(i % 23));
                    Blob { data }
                } else {
                    Blob {
                        data: vec![b'x'; 4 + i % 30],
                    }
                }
            })
            .collect();
        let bytes = encode_all(&records);

        for capacity in [1, 3, 15, 16, 17, 64, 4096] {
            let mut decoder = RecordDecoder::new(bytes.as_slice())
                .with_scan_capacity(capacity)
                .with_min_record_len(12);
            assert_eq!(decode_all::<Blob>(&mut decoder).unwrap(), records);

            let stats = decoder.stats();
            assert_eq!(stats.records, 300);
            assert_eq!(stats.reassembled, 100);
        }
    }

    #[test]
    fn test_payload_ending_with_separator() {
        let records = vec![Blob {
            data: SEPARATOR.to_vec(),
        }];
        let bytes = encode_all(&records);

        let mut decoder = RecordDecoder::new(bytes.as_slice()).with_min_record_len(9);
        assert_eq!(decode_all::<Blob>(&mut decoder).unwrap(), records);
    }

    #[test]
    fn test_final_record_without_separator() {
        let mut bytes = encode_all(&[pair(1)]);
        let last = encode_all(&[pair(2)]);
        bytes.extend_from_slice(&last[..last.len() - SEPARATOR_LEN]);

        let mut decoder = RecordDecoder::new(bytes.as_slice());
        assert_eq!(decode_all::<Pair>(&mut decoder).unwrap(), vec![pair(1), pair(2)]);
    }

    #[test]
    fn test_truncated_tail_is_an_error() {
        let mut bytes = encode_all(&[pair(1), pair(2)]);
        let partial = encode_all(&[pair(3)]);
        bytes.extend_from_slice(&partial[..20]);

        let mut delivered = Vec::new();
        let mut decoder = RecordDecoder::new(bytes.as_slice());
        let result = decoder.decode(|record: Pair| delivered.push(record));

        assert!(matches!(result, Err(CodecError::Truncated { len: 20, .. })));
        assert_eq!(delivered, vec![pair(1), pair(2)]);
    }

    #[test]
    fn test_malformed_middle_record_aborts() {
        let mut bytes = encode_all(&[pair(1)]);
        bytes.extend_from_slice(&[0xFF; 30]);
        bytes.extend_from_slice(&SEPARATOR);
        bytes.extend_from_slice(&encode_all(&[pair(2)]));

        let mut delivered = Vec::new();
        let mut decoder = RecordDecoder::new(bytes.as_slice());
        let result = decoder.decode(|record: Pair| delivered.push(record));

        assert!(matches!(result, Err(CodecError::Decode { .. })));
        assert_eq!(delivered, vec![pair(1)]);
    }

    #[test]
    fn test_trailing_bytes_in_token() {
        let mut bytes = encode_all(&[pair(1)]);
        let mut frame = encode_all(&[pair(2)]);
        frame.truncate(frame.len() - SEPARATOR_LEN);
        frame.extend_from_slice(b"junk");
        frame.extend_from_slice(&SEPARATOR);
        bytes.extend_from_slice(&frame);

        let mut decoder = RecordDecoder::new(bytes.as_slice());
        let result = decode_all::<Pair>(&mut decoder);
        assert!(matches!(
            result,
            Err(CodecError::TrailingBytes { trailing: 4, .. })
        ));
    }
}
