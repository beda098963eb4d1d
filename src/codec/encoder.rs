//! Record Encoder
//!
//! Appends separator-terminated records to any [`std::io::Write`]. The encoder
//! never seeks or rewrites: every call adds one frame after the bytes already
//! written, so it is safe to keep it open on an append-mode file.

use crate::codec::{wire_config, CodecResult, SEPARATOR};
use serde::Serialize;
use std::io::Write;

/// Serializes one record and terminates it with the separator.
///
/// The background persister uses this to build a frame it can hand to an
/// async writer in a single `write_all`.
pub fn encode_frame<T: Serialize>(record: &T) -> CodecResult<Vec<u8>> {
    let mut frame = bincode::serde::encode_to_vec(record, wire_config())?;
    frame.extend_from_slice(&SEPARATOR);
    Ok(frame)
}

/// Writes a stream of records to an underlying writer.
#[derive(Debug)]
pub struct RecordEncoder<W: Write> {
    writer: W,
    /// Records written so far
    records: u64,
    /// Bytes written so far, separators included
    bytes_written: u64,
}

impl<W: Write> RecordEncoder<W> {
    /// Creates an encoder that appends to `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            records: 0,
            bytes_written: 0,
        }
    }

    /// Appends one record to the stream.
    ///
    /// # Returns
    ///
    /// The number of bytes written for this record, separator included.
    pub fn encode<T: Serialize>(&mut self, record: &T) -> CodecResult<usize> {
        let frame = encode_frame(record)?;
        self.writer.write_all(&frame)?;
        self.records += 1;
        self.bytes_written += frame.len() as u64;
        Ok(frame.len())
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> CodecResult<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Number of records written by this encoder.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Number of bytes written by this encoder.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Returns a mutable reference to the underlying writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Consumes the encoder, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
