//! Chunk framing on the wire.
//!
//! Two framings carry the same fields. Every message is self-describing,
//! so a receiver can place it without seeing any other message.
//!
//! **Binary** (channel `matrix/frame`, 8 byte header + payload, big-endian):
//! ```text
//! magic:          [u8; 2]  "MX"
//! frame_id:       u16      wraps at 65536
//! chunk_index:    u16      0-based
//! total_chunks:   u16      >= 1
//! payload:        [u8]     <= chunk size
//! ```
//!
//! **JSON** (channel `/img/chunk`), one object per message:
//! ```text
//! { "id": "frame_<session>_<hex id>", "type": "image/rgb565",
//!   "w": 128, "h": 128, "idx": 0, "total": 14, "b64": "<payload>" }
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{MxError, WireError};
use crate::frame::{Chunk, FrameId};
use crate::pixel::{CANVAS_HEIGHT, CANVAS_WIDTH};

// ── Constants ────────────────────────────────────────────────────

/// Marker at the start of every binary chunk.
pub const MAGIC: [u8; 2] = *b"MX";
/// Channel carrying binary chunks.
pub const BINARY_CHANNEL: &str = "matrix/frame";
/// Channel carrying JSON chunks.
pub const JSON_CHANNEL: &str = "/img/chunk";
/// Content type advertised in JSON envelopes.
pub const CONTENT_TYPE: &str = "image/rgb565";

// ── ChunkHeader ──────────────────────────────────────────────────

/// Fixed binary header prepended to each chunk payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub frame_id: u16,
    pub chunk_index: u16,
    pub total_chunks: u16,
}

impl ChunkHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = 8;

    /// Serialize to bytes (big-endian).
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&MAGIC);
        buf[2..4].copy_from_slice(&self.frame_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.chunk_index.to_be_bytes());
        buf[6..8].copy_from_slice(&self.total_chunks.to_be_bytes());
        buf
    }

    /// Deserialize from the start of `data`.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < Self::SIZE {
            return Err(WireError::TooShort {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        if data[0..2] != MAGIC {
            return Err(WireError::InvalidMagic);
        }
        let header = Self {
            frame_id: u16::from_be_bytes([data[2], data[3]]),
            chunk_index: u16::from_be_bytes([data[4], data[5]]),
            total_chunks: u16::from_be_bytes([data[6], data[7]]),
        };
        check_range(header.chunk_index, header.total_chunks)?;
        Ok(header)
    }
}

impl From<&Chunk> for ChunkHeader {
    fn from(chunk: &Chunk) -> Self {
        Self {
            frame_id: chunk.frame_id.get(),
            chunk_index: chunk.index,
            total_chunks: chunk.total,
        }
    }
}

// ── ChunkEnvelope ────────────────────────────────────────────────

/// JSON message body for the text framing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub w: u32,
    pub h: u32,
    pub idx: u16,
    pub total: u16,
    pub b64: String,
}

// ── WireFormat ───────────────────────────────────────────────────

/// Which framing a sender emits / a receiver expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// 8-byte header + raw payload.
    #[default]
    Binary,
    /// JSON envelope with base64 payload.
    Json,
}

impl WireFormat {
    /// Pub/sub channel this framing travels on.
    pub const fn channel(self) -> &'static str {
        match self {
            WireFormat::Binary => BINARY_CHANNEL,
            WireFormat::Json => JSON_CHANNEL,
        }
    }

    /// Raw payload bytes per chunk that keep a message comfortably
    /// under an 8 KiB device buffer.
    pub const fn default_chunk_size(self) -> usize {
        match self {
            WireFormat::Binary => 1024,
            WireFormat::Json => 2400,
        }
    }

    /// Parse one received message.
    pub fn parse(self, msg: &[u8]) -> Result<WireChunk, WireError> {
        match self {
            WireFormat::Binary => {
                let header = ChunkHeader::decode(msg)?;
                Ok(WireChunk {
                    key: FrameKey::Id(header.frame_id),
                    index: header.chunk_index,
                    total: header.total_chunks,
                    payload: Bytes::copy_from_slice(&msg[ChunkHeader::SIZE..]),
                })
            }
            WireFormat::Json => {
                let env: ChunkEnvelope = serde_json::from_slice(msg)?;
                if env.content_type != CONTENT_TYPE {
                    return Err(WireError::UnsupportedType(env.content_type));
                }
                if env.w != CANVAS_WIDTH || env.h != CANVAS_HEIGHT {
                    return Err(WireError::UnsupportedType(format!(
                        "{} {}x{}",
                        env.content_type, env.w, env.h
                    )));
                }
                check_range(env.idx, env.total)?;
                let payload = BASE64.decode(env.b64.as_bytes())?;
                Ok(WireChunk {
                    key: FrameKey::Label(env.id),
                    index: env.idx,
                    total: env.total,
                    payload: Bytes::from(payload),
                })
            }
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Binary => write!(f, "binary"),
            WireFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for WireFormat {
    type Err = MxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" | "bin" => Ok(WireFormat::Binary),
            "json" => Ok(WireFormat::Json),
            other => Err(MxError::InvalidConfig(format!("unknown wire format: {other}"))),
        }
    }
}

fn check_range(index: u16, total: u16) -> Result<(), WireError> {
    if index >= total {
        return Err(WireError::IndexOutOfRange { index, total });
    }
    Ok(())
}

// ── WireChunk ────────────────────────────────────────────────────

/// How a receiver groups chunks into frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameKey {
    /// Binary framing: the 16-bit frame id.
    Id(u16),
    /// JSON framing: the envelope's `id` string.
    Label(String),
}

impl fmt::Display for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKey::Id(id) => write!(f, "{id}"),
            FrameKey::Label(label) => f.write_str(label),
        }
    }
}

/// A chunk as seen by the receiver, independent of framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireChunk {
    pub key: FrameKey,
    pub index: u16,
    pub total: u16,
    pub payload: Bytes,
}

// ── ChunkSerializer ──────────────────────────────────────────────

/// Turns chunks into transport messages for one framing.
///
/// The JSON framing labels frames with a session stamp so ids stay
/// unique across sender restarts.
#[derive(Debug, Clone)]
pub struct ChunkSerializer {
    format: WireFormat,
    session: u64,
}

impl ChunkSerializer {
    /// Serializer stamped with the current time in milliseconds.
    pub fn new(format: WireFormat) -> Self {
        let session = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self::with_session(format, session)
    }

    pub fn with_session(format: WireFormat, session: u64) -> Self {
        Self { format, session }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// The JSON `id` used for `frame_id`.
    pub fn frame_label(&self, frame_id: FrameId) -> String {
        format!("frame_{}_{:x}", self.session, frame_id.get())
    }

    /// Serialize one chunk into a complete message.
    pub fn serialize(&self, chunk: &Chunk) -> Result<Bytes, MxError> {
        match self.format {
            WireFormat::Binary => {
                let mut buf = BytesMut::with_capacity(ChunkHeader::SIZE + chunk.payload.len());
                buf.put_slice(&ChunkHeader::from(chunk).encode());
                buf.put_slice(&chunk.payload);
                Ok(buf.freeze())
            }
            WireFormat::Json => {
                let env = ChunkEnvelope {
                    id: self.frame_label(chunk.frame_id),
                    content_type: CONTENT_TYPE.to_string(),
                    w: CANVAS_WIDTH,
                    h: CANVAS_HEIGHT,
                    idx: chunk.index,
                    total: chunk.total,
                    b64: BASE64.encode(&chunk.payload),
                };
                let json = serde_json::to_vec(&env).map_err(WireError::from)?;
                Ok(Bytes::from(json))
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
