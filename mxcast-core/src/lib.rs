//! # mxcast-core
//!
//! Core library for pushing still images to a small 128×128 RGB565
//! display over a best-effort publish/subscribe link.
//!
//! ```text
//! Image ──► PixelConverter ──► PixelBuffer ──► FrameEncoder ──► Chunks
//!                                                                  │
//!     FrameAssembler ◄── WireFormat::parse ◄── Transport ◄── ChunkSerializer
//! ```
//!
//! This crate contains:
//! - **Pixel**: `Image`, cover-fit `PixelConverter`, RGB565 `PixelBuffer`
//! - **Frame**: `FrameId`, `Chunk`, `FrameEncoder`
//! - **Wire**: binary `ChunkHeader`, JSON `ChunkEnvelope`, `WireFormat`
//! - **Transport**: `Transport` trait, `LinkState`, TCP and in-memory transports
//! - **Sender**: `FrameSender`, one frame in flight, cooperative chunk stepping
//! - **Assembler / Receiver**: receiver-side reassembly with timeouts
//! - **Error**: `MxError`, a typed, `thiserror`-based error hierarchy

pub mod assembler;
pub mod error;
pub mod frame;
pub mod pixel;
pub mod receiver;
pub mod sender;
pub mod transport;
pub mod wire;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use assembler::{AssemblerConfig, AssemblerStats, ChunkOutcome, CompletedFrame, FrameAssembler};
pub use error::{MxError, TransportError, WireError};
pub use frame::{Chunk, FrameEncoder, FrameId, MAX_CHUNK_SIZE};
pub use pixel::{
    ByteOrder, CANVAS_HEIGHT, CANVAS_WIDTH, CoverFit, FRAME_BYTES, Image, PixelBuffer,
    PixelConverter, convert,
};
pub use receiver::FrameReceiver;
pub use sender::{FrameSender, SendReport, SenderConfig, Transmission};
pub use transport::{LinkState, MemoryTransport, Publish, PublishCodec, TcpTransport, Transport};
pub use wire::{ChunkEnvelope, ChunkHeader, ChunkSerializer, FrameKey, WireChunk, WireFormat};
