//! Frame sender: convert → chunk → serialize → publish.
//!
//! [`FrameSender`] owns the only mutable state in the pipeline: the next
//! frame id and the in-flight marker. One frame is on the wire at a
//! time; a second submission while a frame is in flight is rejected
//! with [`MxError::EncoderBusy`] rather than queued.
//!
//! A send is a [`Transmission`] stepped one chunk at a time, yielding to
//! the runtime between steps. Before each step the sender checks the
//! link state and the cancellation token; if either says stop, the rest
//! of the frame is abandoned. Chunks already published stay published.

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MxError, TransportError};
use crate::frame::{Chunk, FrameEncoder, FrameId};
use crate::pixel::{ByteOrder, Image, PixelBuffer, PixelConverter};
use crate::transport::Transport;
use crate::wire::{ChunkSerializer, WireFormat};

// ── SenderConfig ─────────────────────────────────────────────────

/// Configuration for [`FrameSender`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Wire framing.
    pub format: WireFormat,
    /// Raw payload bytes per chunk (1..=65535).
    pub chunk_size: usize,
    /// RGB565 byte order expected by the display.
    pub byte_order: ByteOrder,
}

impl Default for SenderConfig {
    fn default() -> Self {
        let format = WireFormat::default();
        Self {
            format,
            chunk_size: format.default_chunk_size(),
            byte_order: ByteOrder::default(),
        }
    }
}

// ── SendReport ───────────────────────────────────────────────────

/// Outcome of a completed frame send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub frame_id: FrameId,
    pub chunks: usize,
    /// Bytes handed to the transport, headers included.
    pub wire_bytes: usize,
    pub elapsed: Duration,
}

// ── Transmission ─────────────────────────────────────────────────

/// A fully serialized frame and a cursor into it.
///
/// Everything that can fail before the first publish (chunking,
/// serialization) happens in [`prepare`](Self::prepare).
#[derive(Debug)]
pub struct Transmission {
    frame_id: FrameId,
    channel: &'static str,
    messages: Vec<Bytes>,
    cursor: usize,
}

impl Transmission {
    pub fn prepare(serializer: &ChunkSerializer, chunks: &[Chunk]) -> Result<Self, MxError> {
        let frame_id = chunks.first().map(|c| c.frame_id).unwrap_or_default();
        let messages = chunks
            .iter()
            .map(|c| serializer.serialize(c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            frame_id,
            channel: serializer.format().channel(),
            messages,
            cursor: 0,
        })
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn total(&self) -> usize {
        self.messages.len()
    }

    /// Chunks published so far.
    pub fn sent(&self) -> usize {
        self.cursor
    }

    pub fn is_done(&self) -> bool {
        self.cursor >= self.messages.len()
    }

    pub fn wire_bytes(&self) -> usize {
        self.messages.iter().map(Bytes::len).sum()
    }

    /// Publish the next chunk. Returns `true` while chunks remain.
    pub async fn step<T>(&mut self, transport: &T) -> Result<bool, TransportError>
    where
        T: Transport + ?Sized,
    {
        let Some(msg) = self.messages.get(self.cursor) else {
            return Ok(false);
        };
        transport.publish(self.channel, msg.clone()).await?;
        debug!(
            frame_id = self.frame_id.get(),
            chunk = self.cursor,
            total = self.messages.len(),
            "chunk published"
        );
        self.cursor += 1;
        Ok(!self.is_done())
    }
}

// ── FrameSender ──────────────────────────────────────────────────

const IDLE: u32 = u32::MAX;

/// Clears the in-flight marker when a send ends, however it ends.
struct InFlight<'a> {
    slot: &'a AtomicU32,
    frame_id: FrameId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.slot.store(IDLE, Ordering::SeqCst);
    }
}

/// Sequential frame driver over a [`Transport`].
pub struct FrameSender<T: Transport + ?Sized> {
    transport: Arc<T>,
    converter: PixelConverter,
    encoder: FrameEncoder,
    serializer: ChunkSerializer,
    next_id: AtomicU16,
    /// `IDLE`, or the id of the frame being transmitted.
    in_flight: AtomicU32,
}

impl<T: Transport + ?Sized> FrameSender<T> {
    /// Create a sender. Fails with [`MxError::InvalidConfig`] on a bad
    /// chunk size. Frame ids start at 1.
    pub fn new(transport: Arc<T>, config: SenderConfig) -> Result<Self, MxError> {
        Self::with_serializer(transport, config, ChunkSerializer::new(config.format))
    }

    /// Create a sender with an explicit serializer (fixed JSON session).
    pub fn with_serializer(
        transport: Arc<T>,
        config: SenderConfig,
        serializer: ChunkSerializer,
    ) -> Result<Self, MxError> {
        if serializer.format() != config.format {
            return Err(MxError::InvalidConfig(format!(
                "serializer emits {}, config asks for {}",
                serializer.format(),
                config.format
            )));
        }
        Ok(Self {
            transport,
            converter: PixelConverter::new(config.byte_order),
            encoder: FrameEncoder::new(config.chunk_size)?,
            serializer,
            next_id: AtomicU16::new(1),
            in_flight: AtomicU32::new(IDLE),
        })
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn format(&self) -> WireFormat {
        self.serializer.format()
    }

    /// The id the next accepted frame will carry.
    pub fn next_frame_id(&self) -> FrameId {
        FrameId(self.next_id.load(Ordering::SeqCst))
    }

    /// Whether a frame is currently being transmitted.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) != IDLE
    }

    /// Convert with this sender's byte order.
    pub fn convert(&self, image: &Image) -> Result<PixelBuffer, MxError> {
        self.converter.convert(image)
    }

    /// Convert and send an image as one frame.
    pub async fn send_image(&self, image: &Image) -> Result<SendReport, MxError> {
        let buffer = self.convert(image)?;
        self.send(&buffer).await
    }

    /// Send a converted buffer as one frame.
    pub async fn send(&self, buffer: &PixelBuffer) -> Result<SendReport, MxError> {
        self.send_cancellable(buffer, &CancellationToken::new()).await
    }

    /// Send a converted buffer, abandoning the rest of the frame once
    /// `cancel` fires.
    pub async fn send_cancellable(
        &self,
        buffer: &PixelBuffer,
        cancel: &CancellationToken,
    ) -> Result<SendReport, MxError> {
        let guard = self.claim()?;
        let frame_id = guard.frame_id;

        if !self.transport.is_connected() {
            warn!(frame_id = frame_id.get(), "send rejected: not connected");
            return Err(MxError::NotConnected);
        }

        let chunks = self.encoder.encode(buffer, frame_id)?;
        let mut tx = Transmission::prepare(&self.serializer, &chunks)?;

        // The id is spent only once the frame is about to hit the wire.
        self.next_id.store(frame_id.next().get(), Ordering::SeqCst);

        let started = Instant::now();
        self.transmit(&mut tx, cancel).await?;

        let report = SendReport {
            frame_id,
            chunks: tx.total(),
            wire_bytes: tx.wire_bytes(),
            elapsed: started.elapsed(),
        };
        info!(
            frame_id = frame_id.get(),
            chunks = report.chunks,
            bytes = report.wire_bytes,
            format = %self.serializer.format(),
            "frame sent in {:?}",
            report.elapsed
        );
        Ok(report)
    }

    // ── Internal ─────────────────────────────────────────────────

    fn claim(&self) -> Result<InFlight<'_>, MxError> {
        let frame_id = self.next_frame_id();
        match self.in_flight.compare_exchange(
            IDLE,
            frame_id.get() as u32,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => Ok(InFlight {
                slot: &self.in_flight,
                frame_id,
            }),
            Err(current) => Err(MxError::EncoderBusy {
                in_flight: current as u16,
            }),
        }
    }

    async fn transmit(
        &self,
        tx: &mut Transmission,
        cancel: &CancellationToken,
    ) -> Result<(), MxError> {
        let mut link = self.transport.link_state();
        loop {
            let connected = link.borrow_and_update().is_connected();
            if !connected || cancel.is_cancelled() {
                warn!(
                    frame_id = tx.frame_id().get(),
                    sent = tx.sent(),
                    total = tx.total(),
                    cancelled = cancel.is_cancelled(),
                    "frame abandoned"
                );
                return Err(MxError::Interrupted {
                    frame_id: tx.frame_id().get(),
                    sent: tx.sent(),
                    total: tx.total(),
                });
            }

            match tx.step(&*self.transport).await {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(source) => {
                    warn!(
                        frame_id = tx.frame_id().get(),
                        sent = tx.sent(),
                        "transport failed mid-frame: {source}"
                    );
                    return Err(MxError::Transport {
                        frame_id: tx.frame_id().get(),
                        sent: tx.sent(),
                        total: tx.total(),
                        source,
                    });
                }
            }

            tokio::task::yield_now().await;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::FRAME_BYTES;
    use crate::transport::{LinkState, MemoryTransport};
    use crate::wire::ChunkHeader;
    use async_trait::async_trait;
    use tokio::sync::{Notify, Semaphore, watch};

    fn image() -> Image {
        let mut data = Vec::new();
        for i in 0..(90u32 * 60) {
            data.extend_from_slice(&[(i % 256) as u8, (i / 256) as u8, 0x80, 0xFF]);
        }
        Image::from_rgba(90, 60, data).unwrap()
    }

    fn sender(transport: Arc<MemoryTransport>) -> FrameSender<MemoryTransport> {
        FrameSender::new(transport, SenderConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn sends_all_chunks_in_order() {
        let transport = Arc::new(MemoryTransport::new());
        let s = sender(transport.clone());
        let report = s.send_image(&image()).await.unwrap();

        assert_eq!(report.frame_id, FrameId(1));
        assert_eq!(report.chunks, 32);
        assert_eq!(report.wire_bytes, FRAME_BYTES + 32 * ChunkHeader::SIZE);

        let msgs = transport.messages();
        assert_eq!(msgs.len(), 32);
        for (i, m) in msgs.iter().enumerate() {
            assert_eq!(m.channel, "matrix/frame");
            let h = ChunkHeader::decode(&m.payload).unwrap();
            assert_eq!((h.frame_id, h.chunk_index as usize, h.total_chunks), (1, i, 32));
        }
        assert!(!s.is_busy());
        assert_eq!(s.next_frame_id(), FrameId(2));
    }

    #[tokio::test]
    async fn not_connected_sends_nothing() {
        let transport = Arc::new(MemoryTransport::disconnected());
        let s = sender(transport.clone());
        let err = s.send_image(&image()).await.unwrap_err();

        assert!(matches!(err, MxError::NotConnected));
        assert_eq!(transport.message_count(), 0);
        assert_eq!(s.next_frame_id(), FrameId(1));
        assert!(!s.is_busy());
    }

    #[tokio::test]
    async fn link_drop_abandons_rest_of_frame() {
        let transport = Arc::new(MemoryTransport::new());
        transport.drop_link_after(3);
        let s = sender(transport.clone());

        let err = s.send_image(&image()).await.unwrap_err();
        assert!(matches!(
            err,
            MxError::Interrupted {
                frame_id: 1,
                sent: 3,
                total: 32
            }
        ));
        assert_eq!(transport.message_count(), 3);
        assert!(!s.is_busy());
    }

    #[tokio::test]
    async fn transport_failure_is_not_retried() {
        let transport = Arc::new(MemoryTransport::new());
        transport.fail_after(5);
        let s = sender(transport.clone());

        let err = s.send_image(&image()).await.unwrap_err();
        assert!(matches!(err, MxError::Transport { sent: 5, total: 32, .. }));
        assert_eq!(transport.message_count(), 5);

        // Resubmitting uses a fresh id.
        transport.fail_after(usize::MAX);
        let report = s.send_image(&image()).await.unwrap();
        assert_eq!(report.frame_id, FrameId(2));
    }

    #[tokio::test]
    async fn cancelled_send_stops() {
        let transport = Arc::new(MemoryTransport::new());
        let s = sender(transport.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let buf = s.convert(&image()).unwrap();
        let err = s.send_cancellable(&buf, &cancel).await.unwrap_err();
        assert!(matches!(err, MxError::Interrupted { sent: 0, .. }));
        assert_eq!(transport.message_count(), 0);
    }

    #[tokio::test]
    async fn invalid_chunk_size_rejected() {
        let config = SenderConfig {
            chunk_size: 0,
            ..SenderConfig::default()
        };
        assert!(matches!(
            FrameSender::new(Arc::new(MemoryTransport::new()), config),
            Err(MxError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn frame_ids_wrap() {
        let transport = Arc::new(MemoryTransport::new());
        let s = sender(transport);
        s.next_id.store(u16::MAX, Ordering::SeqCst);
        let buf = s.convert(&image()).unwrap();

        assert_eq!(s.send(&buf).await.unwrap().frame_id, FrameId(u16::MAX));
        assert_eq!(s.send(&buf).await.unwrap().frame_id, FrameId(0));
    }

    /// Blocks every publish until released.
    struct GatedTransport {
        state: watch::Sender<LinkState>,
        entered: Notify,
        gate: Semaphore,
    }

    #[async_trait]
    impl Transport for GatedTransport {
        fn link_state(&self) -> watch::Receiver<LinkState> {
            self.state.subscribe()
        }

        async fn publish(&self, _channel: &str, _payload: Bytes) -> Result<(), TransportError> {
            self.entered.notify_one();
            self.gate
                .acquire()
                .await
                .map_err(|_| TransportError::Closed)?
                .forget();
            Ok(())
        }
    }

    #[tokio::test]
    async fn second_frame_rejected_while_busy() {
        let transport = Arc::new(GatedTransport {
            state: watch::channel(LinkState::Connected).0,
            entered: Notify::new(),
            gate: Semaphore::new(0),
        });
        let s = Arc::new(FrameSender::new(transport.clone(), SenderConfig::default()).unwrap());
        let buf = s.convert(&image()).unwrap();

        let first = tokio::spawn({
            let s = Arc::clone(&s);
            let buf = buf.clone();
            async move { s.send(&buf).await }
        });
        transport.entered.notified().await;

        assert!(s.is_busy());
        let err = s.send(&buf).await.unwrap_err();
        assert!(matches!(err, MxError::EncoderBusy { in_flight: 1 }));

        transport.gate.add_permits(64);
        let report = first.await.unwrap().unwrap();
        assert_eq!(report.frame_id, FrameId(1));

        // Once the first frame is done the next one goes through.
        transport.gate.add_permits(64);
        assert_eq!(s.send(&buf).await.unwrap().frame_id, FrameId(2));
    }
}
