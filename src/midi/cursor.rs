//! Bounds-checked sequential reads over an immutable MIDI byte buffer.
//!
//! The cursor carries its own end bound so a track can never be read past its
//! chunk, even when the underlying buffer continues with the next track.

use std::sync::Arc;
use thiserror::Error;

/// Errors raised while reading bytes at runtime.
///
/// Kept `Copy` so the sequencer can hold on to the last failure from the
/// audio path without allocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReadError {
    /// A read would have crossed the track end or the buffer end.
    #[error("unexpected end of data at offset {offset}")]
    UnexpectedEnd { offset: usize },
}

/// Sequential big-endian reader with an explicit end bound.
#[derive(Debug, Clone)]
pub struct ByteCursor {
    data: Arc<[u8]>,
    pos: usize,
    end: usize,
}

impl ByteCursor {
    /// Creates a cursor spanning the whole buffer.
    pub fn new(data: Arc<[u8]>) -> Self {
        let end = data.len();
        Self { data, pos: 0, end }
    }

    /// Moves the cursor to `pos` and limits reads to `end`.
    ///
    /// The end bound is clamped to the buffer length.
    pub fn seek(&mut self, pos: usize, end: usize) {
        self.end = end.min(self.data.len());
        self.pos = pos;
    }

    /// Current read offset into the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Offset one past the last readable byte.
    pub fn end(&self) -> usize {
        self.end
    }

    /// Bytes left before the end bound.
    pub fn remaining(&self) -> usize {
        self.end.saturating_sub(self.pos)
    }

    pub fn read_u8(&mut self) -> Result<u8, ReadError> {
        if self.pos >= self.end {
            return Err(ReadError::UnexpectedEnd { offset: self.pos });
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_u16(&mut self) -> Result<u16, ReadError> {
        let hi = self.read_u8()? as u16;
        let lo = self.read_u8()? as u16;
        Ok(hi << 8 | lo)
    }

    pub fn read_u32(&mut self) -> Result<u32, ReadError> {
        let mut value = 0u32;
        for _ in 0..4 {
            value = value << 8 | self.read_u8()? as u32;
        }
        Ok(value)
    }

    /// Reads a MIDI variable-length quantity.
    ///
    /// Seven bits per byte, most significant group first, with the high bit
    /// set on every byte except the last. Overlong encodings wrap rather than
    /// fail; the bounds check still terminates them at the end of the track.
    pub fn read_variable_length(&mut self) -> Result<u32, ReadError> {
        let mut byte = self.read_u8()?;
        let mut value = (byte & 0x7f) as u32;

        while byte & 0x80 != 0 {
            byte = self.read_u8()?;
            value = value << 7 | (byte & 0x7f) as u32;
        }

        Ok(value)
    }

    /// Advances past `len` bytes without reading them.
    pub fn skip(&mut self, len: usize) -> Result<(), ReadError> {
        if len > self.remaining() {
            return Err(ReadError::UnexpectedEnd { offset: self.end });
        }
        self.pos += len;
        Ok(())
    }
}
