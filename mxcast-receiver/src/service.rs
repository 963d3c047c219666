//! Receiver service: listener lifecycle and frame output.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use mxcast_core::{CompletedFrame, FrameKey, FrameReceiver, MxError, PixelBuffer};

use crate::config::ReceiverConfig;

/// File every completed frame is also written to.
pub const LATEST_FILE: &str = "latest.png";

// ── ReceiverService ──────────────────────────────────────────────

/// Accepts publishers, reassembles frames and writes them as PNGs.
///
/// Stopping is one-way: a stop requested before `run`/`serve` starts
/// makes them return without serving.
pub struct ReceiverService {
    config: ReceiverConfig,
    running: AtomicBool,
    shutdown: CancellationToken,
    frames_written: AtomicU64,
}

impl ReceiverService {
    pub fn new(config: ReceiverConfig) -> Self {
        Self {
            config,
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            frames_written: AtomicU64::new(0),
        }
    }

    /// Token for stopping the service from another task.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::SeqCst)
    }

    /// Bind the configured address and serve until stopped.
    pub async fn run(&self) -> Result<(), MxError> {
        if self.shutdown.is_cancelled() {
            info!("stop requested before start");
            return Ok(());
        }
        let listener = TcpListener::bind(&self.config.network.listen).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until stopped.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), MxError> {
        if self.shutdown.is_cancelled() {
            info!("stop requested before start");
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);
        let result = self.serve_frames(listener).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn serve_frames(&self, listener: TcpListener) -> Result<(), MxError> {
        std::fs::create_dir_all(&self.config.output.directory)?;

        let (receiver, mut frames) = FrameReceiver::new(
            self.config.assembly.format,
            self.config.to_assembler_config(),
        );
        let accept_shutdown = receiver.shutdown_token();
        let accept = tokio::spawn(Arc::clone(&receiver).run(listener));

        loop {
            let frame = tokio::select! {
                frame = frames.recv() => frame,
                _ = self.shutdown.cancelled() => break,
            };
            let Some(frame) = frame else { break };
            if let Err(e) = self.write_frame(&frame) {
                warn!("failed to write frame {}: {e}", frame.key);
            }
        }

        accept_shutdown.cancel();
        match accept.await {
            Ok(Err(e)) => error!("receiver failed: {e}"),
            Err(e) => error!("receiver task panicked: {e}"),
            Ok(Ok(())) => {}
        }

        let stats = receiver.stats().await;
        info!(
            completed = stats.completed,
            expired = stats.expired,
            discarded = stats.discarded,
            duplicates = stats.duplicates,
            "receiver service stopped"
        );
        Ok(())
    }

    /// Write one frame as PNG; returns the path of `latest.png`.
    pub fn write_frame(&self, frame: &CompletedFrame) -> Result<PathBuf, MxError> {
        let output = &self.config.output;
        let buffer = PixelBuffer::from_bytes(frame.data.to_vec(), output.byte_order)?;

        if output.keep_frames {
            buffer.save_preview(&output.directory.join(frame_file_name(&frame.key)))?;
        }
        let latest = output.directory.join(LATEST_FILE);
        buffer.save_preview(&latest)?;

        self.frames_written.fetch_add(1, Ordering::SeqCst);
        info!(frame = %frame.key, chunks = frame.chunks, "frame written");
        Ok(latest)
    }
}

/// File name for a frame. Labels come off the network, so anything
/// outside `[A-Za-z0-9_-]` is replaced.
pub fn frame_file_name(key: &FrameKey) -> String {
    match key {
        FrameKey::Id(id) => format!("frame_{id:05}.png"),
        FrameKey::Label(label) => {
            let safe: String = label
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect();
            format!("{safe}.png")
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
