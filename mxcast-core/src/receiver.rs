//! Receiver endpoint: accepts publishers over TCP and reassembles frames.
//!
//! Each publisher connection is read with [`PublishCodec`]. Messages on
//! the channel of the configured [`WireFormat`] are parsed and fed to a
//! shared [`FrameAssembler`]; completed frames go out on an mpsc
//! channel. Partial frames are expired on a timer even when no traffic
//! arrives.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assembler::{AssemblerConfig, AssemblerStats, ChunkOutcome, CompletedFrame, FrameAssembler};
use crate::error::MxError;
use crate::transport::codec::{Publish, PublishCodec};
use crate::wire::WireFormat;

/// Capacity of the completed-frame channel.
const FRAME_QUEUE: usize = 16;

pub struct FrameReceiver {
    format: WireFormat,
    assembler: Mutex<FrameAssembler>,
    frames_tx: mpsc::Sender<CompletedFrame>,
    shutdown: CancellationToken,
    expire_interval: Duration,
}

impl FrameReceiver {
    /// Create a receiver and the channel its completed frames arrive on.
    pub fn new(
        format: WireFormat,
        config: AssemblerConfig,
    ) -> (Arc<Self>, mpsc::Receiver<CompletedFrame>) {
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE);
        let expire_interval = (config.frame_timeout / 2).max(Duration::from_millis(10));
        let receiver = Self {
            format,
            assembler: Mutex::new(FrameAssembler::new(config)),
            frames_tx,
            shutdown: CancellationToken::new(),
            expire_interval,
        };
        (Arc::new(receiver), frames_rx)
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Cancelling this token stops [`run`](Self::run) and every
    /// publisher connection.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn stats(&self) -> AssemblerStats {
        self.assembler.lock().await.stats()
    }

    /// Accept publishers until shut down.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<(), MxError> {
        info!(addr = %listener.local_addr()?, format = %self.format, "receiver listening");
        let mut expire = tokio::time::interval(self.expire_interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = expire.tick() => {
                    self.assembler.lock().await.expire(Instant::now());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("accept error: {e}");
                            continue;
                        }
                    };
                    info!("publisher connected from {peer}");
                    tokio::spawn(Arc::clone(&self).serve_publisher(stream, peer));
                }
            }
        }

        info!("receiver stopped");
        Ok(())
    }

    /// Handle one published message. Messages on other channels and
    /// malformed messages are dropped.
    pub async fn handle(&self, msg: Publish) -> Option<ChunkOutcome> {
        if msg.channel != self.format.channel() {
            debug!(channel = %msg.channel, "ignoring message on foreign channel");
            return None;
        }
        let chunk = match self.format.parse(&msg.payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("dropping malformed chunk: {e}");
                return None;
            }
        };

        let outcome = self.assembler.lock().await.push(chunk);
        if let ChunkOutcome::Complete(frame) = &outcome {
            if self.frames_tx.send(frame.clone()).await.is_err() {
                debug!("frame consumer gone; dropping frame {}", frame.key);
            }
        }
        Some(outcome)
    }

    async fn serve_publisher(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let mut reader = FramedRead::new(stream, PublishCodec::default());
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = reader.next() => next,
            };
            match next {
                Some(Ok(msg)) => {
                    self.handle(msg).await;
                }
                Some(Err(e)) => {
                    warn!("publisher {peer} stream error: {e}");
                    break;
                }
                None => break,
            }
        }
        info!("publisher {peer} disconnected");
    }
}
