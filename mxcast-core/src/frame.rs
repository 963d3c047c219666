//! Frame identifiers and chunking.
//!
//! A frame is one serialized [`PixelBuffer`] tagged with a [`FrameId`].
//! It never exists on its own: [`FrameEncoder::encode`] turns it
//! straight into an ordered list of [`Chunk`]s, each small enough for
//! one transport message and carrying enough metadata to be reassembled
//! independently of arrival order.

use std::fmt;

use bytes::Bytes;

use crate::error::MxError;
use crate::pixel::PixelBuffer;

// ── Constants ────────────────────────────────────────────────────

/// Largest payload a single chunk may carry (16-bit header fields).
pub const MAX_CHUNK_SIZE: usize = u16::MAX as usize;
/// Largest number of chunks a frame may be split into.
pub const MAX_TOTAL_CHUNKS: usize = u16::MAX as usize;

// ── FrameId ──────────────────────────────────────────────────────

/// Per-session frame identifier. Wraps at 65536.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FrameId(pub u16);

impl FrameId {
    /// The identifier that follows this one, wrapping to 0.
    pub const fn next(self) -> Self {
        FrameId(self.0.wrapping_add(1))
    }

    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for FrameId {
    fn from(v: u16) -> Self {
        FrameId(v)
    }
}

// ── Chunk ────────────────────────────────────────────────────────

/// One bounded fragment of a frame.
///
/// `payload` is a zero-copy slice of the frame's serialized bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub frame_id: FrameId,
    /// 0-based position within the frame.
    pub index: u16,
    /// Number of chunks in the frame (≥ 1).
    pub total: u16,
    pub payload: Bytes,
}

impl Chunk {
    pub fn is_last(&self) -> bool {
        self.index + 1 == self.total
    }
}

// ── FrameEncoder ─────────────────────────────────────────────────

/// Splits serialized frames into chunks of at most `chunk_size` bytes.
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    chunk_size: usize,
}

impl FrameEncoder {
    /// Create an encoder. `chunk_size` must be in `1..=65535`.
    pub fn new(chunk_size: usize) -> Result<Self, MxError> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(MxError::InvalidConfig(format!(
                "chunk size {chunk_size} outside 1..={MAX_CHUNK_SIZE}"
            )));
        }
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// `ceil(byte_len / chunk_size)`, with an empty frame still taking
    /// one (empty) chunk.
    pub fn chunk_count(&self, byte_len: usize) -> usize {
        byte_len.div_ceil(self.chunk_size).max(1)
    }

    /// Chunk a converted pixel buffer.
    pub fn encode(&self, buffer: &PixelBuffer, frame_id: FrameId) -> Result<Vec<Chunk>, MxError> {
        self.encode_bytes(Bytes::copy_from_slice(buffer.as_bytes()), frame_id)
    }

    /// Chunk an arbitrary serialized frame.
    ///
    /// Chunks are returned in ascending index order. Fails with
    /// [`MxError::FrameTooLarge`] before producing anything if the
    /// chunk count does not fit the 16-bit header.
    pub fn encode_bytes(&self, data: Bytes, frame_id: FrameId) -> Result<Vec<Chunk>, MxError> {
        let total = self.chunk_count(data.len());
        if total > MAX_TOTAL_CHUNKS {
            return Err(MxError::FrameTooLarge {
                chunks: total,
                max: MAX_TOTAL_CHUNKS,
            });
        }

        let mut chunks = Vec::with_capacity(total);
        for index in 0..total {
            let start = (index * self.chunk_size).min(data.len());
            let end = (start + self.chunk_size).min(data.len());
            chunks.push(Chunk {
                frame_id,
                index: index as u16,
                total: total as u16,
                payload: data.slice(start..end),
            });
        }

        tracing::debug!(
            frame_id = frame_id.get(),
            bytes = data.len(),
            chunks = total,
            "frame chunked"
        );
        Ok(chunks)
    }
}

// ── Tests ────────────────────────────────────────────────────────
