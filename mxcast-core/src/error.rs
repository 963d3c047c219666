//! Domain-specific error types for the mxcast frame protocol.
//!
//! All fallible operations return `Result<T, MxError>`.
//! Nothing in the pipeline panics on bad input: every failure is typed
//! and leaves the sender ready for the next frame.

use thiserror::Error;

/// The canonical error type for the mxcast pipeline.
#[derive(Debug, Error)]
pub enum MxError {
    // ── Input Errors ─────────────────────────────────────────────
    /// The source image has a zero dimension, a truncated pixel
    /// buffer, or could not be decoded.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// A configuration value is out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    // ── Encoding Errors ──────────────────────────────────────────
    /// The frame would need more chunks than a 16-bit header can index.
    #[error("frame too large: {chunks} chunks (max {max})")]
    FrameTooLarge { chunks: usize, max: usize },

    // ── Send Errors ──────────────────────────────────────────────
    /// The link was down when the send was initiated; nothing was sent.
    #[error("not connected")]
    NotConnected,

    /// Another frame is still being transmitted.
    #[error("encoder busy: frame {in_flight} still in flight")]
    EncoderBusy { in_flight: u16 },

    /// The transport failed mid-frame. Already-sent chunks are not
    /// recalled; the frame is considered lost.
    #[error("transport error on frame {frame_id} after {sent}/{total} chunks: {source}")]
    Transport {
        frame_id: u16,
        sent: usize,
        total: usize,
        #[source]
        source: TransportError,
    },

    /// The link dropped or the send was cancelled mid-frame.
    #[error("frame {frame_id} interrupted after {sent}/{total} chunks")]
    Interrupted {
        frame_id: u16,
        sent: usize,
        total: usize,
    },

    // ── Wire Errors ──────────────────────────────────────────────
    /// A received message could not be parsed.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    // ── I/O ──────────────────────────────────────────────────────
    /// Filesystem or socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ── TransportError ────────────────────────────────────────────────

/// Failure reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket layer reported an error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has no live connection.
    #[error("link closed")]
    Closed,

    /// The message exceeds the transport's size ceiling.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

// ── WireError ─────────────────────────────────────────────────────

/// A message on the wire did not match either chunk framing.
#[derive(Debug, Error)]
pub enum WireError {
    /// Binary message did not start with `MX`.
    #[error("invalid magic bytes: expected MX")]
    InvalidMagic,

    /// Binary message shorter than the fixed header.
    #[error("message too short: {actual} bytes (need {expected})")]
    TooShort { expected: usize, actual: usize },

    /// Header fields violate `0 <= index < total`.
    #[error("chunk index {index} out of range for total {total}")]
    IndexOutOfRange { index: u16, total: u16 },

    /// JSON envelope could not be parsed.
    #[error("invalid json envelope: {0}")]
    Json(#[from] serde_json::Error),

    /// The `b64` field was not valid base64.
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The envelope names a content type other than RGB565.
    #[error("unsupported content type: {0}")]
    UnsupportedType(String),
}

impl From<image::ImageError> for MxError {
    fn from(e: image::ImageError) -> Self {
        MxError::InvalidImage(e.to_string())
    }
}
