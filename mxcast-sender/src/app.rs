//! Sender application: preview, navigation and sending.
//!
//! `CastApp` owns the playlist, the converted preview of the current
//! image and a [`FrameSender`]. Every user-visible event (preview
//! rendered, frame sent, failure) is reported through the status
//! callbacks registered with [`CastApp::on_status`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mxcast_core::{
    FrameSender, Image, LinkState, MemoryTransport, MxError, PixelBuffer, SendReport,
    TcpTransport, Transport,
};

use crate::config::AppConfig;
use crate::playlist::Playlist;

/// Receives one human-readable status line per event.
pub type StatusCallback = Box<dyn Fn(&str) + Send + Sync>;

// ── Transport setup ──────────────────────────────────────────────

/// Open the configured transport.
///
/// A failed initial connect is logged, not returned: the link can come
/// up later and sends fail with `NotConnected` until it does. With
/// `dry_run`, frames go to an in-memory transport instead.
pub async fn open_transport(config: &AppConfig, dry_run: bool) -> Arc<dyn Transport> {
    if dry_run {
        info!("dry run: frames are kept in memory");
        return Arc::new(MemoryTransport::new());
    }

    let tcp = Arc::new(
        TcpTransport::new(config.transport.address.clone())
            .with_connect_timeout(config.connect_timeout())
            .with_max_message_size(config.transport.max_message_size),
    );
    if let Err(e) = tcp.connect().await {
        warn!("connect to {} failed: {e}", tcp.addr());
    }
    if let Some(retry) = config.reconnect_interval() {
        spawn_reconnect(Arc::clone(&tcp), retry);
    }
    tcp
}

/// Re-open the connection every `retry` while the link is down.
pub fn spawn_reconnect(tcp: Arc<TcpTransport>, retry: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut state = tcp.link_state();
        loop {
            if !state.borrow_and_update().is_connected() {
                tokio::time::sleep(retry).await;
                if let Err(e) = tcp.connect().await {
                    debug!("reconnect to {} failed: {e}", tcp.addr());
                }
                continue;
            }
            if state.changed().await.is_err() {
                break;
            }
        }
    })
}

/// Call `notify` on every link-state change.
pub fn spawn_link_monitor<F>(transport: &Arc<dyn Transport>, notify: F) -> JoinHandle<()>
where
    F: Fn(&LinkState) + Send + 'static,
{
    let mut state = transport.link_state();
    tokio::spawn(async move {
        notify(&*state.borrow_and_update());
        while state.changed().await.is_ok() {
            notify(&*state.borrow_and_update());
        }
    })
}

// ── CastApp ──────────────────────────────────────────────────────

pub struct CastApp {
    sender: FrameSender<dyn Transport>,
    playlist: Playlist,
    preview: Option<PixelBuffer>,
    on_status: Vec<StatusCallback>,
}

impl CastApp {
    pub fn new(sender: FrameSender<dyn Transport>, playlist: Playlist) -> Self {
        Self {
            sender,
            playlist,
            preview: None,
            on_status: Vec::new(),
        }
    }

    /// Register a status callback.
    pub fn on_status<F>(&mut self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_status.push(Box::new(callback));
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn sender(&self) -> &FrameSender<dyn Transport> {
        &self.sender
    }

    /// The converted current image, if one has been rendered.
    pub fn preview(&self) -> Option<&PixelBuffer> {
        self.preview.as_ref()
    }

    /// Decode and convert the current image.
    ///
    /// On failure the previous preview is cleared so a later send
    /// cannot transmit a stale image.
    pub fn load_current(&mut self) -> Result<&PixelBuffer, MxError> {
        let Some(path) = self.playlist.current().map(Path::to_path_buf) else {
            return Err(MxError::InvalidImage("no images loaded".into()));
        };
        let label = self.playlist.label().unwrap_or_default();

        match Image::open(&path).and_then(|img| self.sender.convert(&img)) {
            Ok(buffer) => {
                self.status(&format!("Preview: {label}"));
                Ok(self.preview.insert(buffer))
            }
            Err(e) => {
                self.preview = None;
                self.status(&format!("Failed to load {}: {e}", path.display()));
                Err(e)
            }
        }
    }

    /// Move to the next image (wrapping) and render it.
    pub fn next(&mut self) -> Result<&PixelBuffer, MxError> {
        self.playlist.next();
        self.load_current()
    }

    /// Move to the previous image (wrapping) and render it.
    pub fn prev(&mut self) -> Result<&PixelBuffer, MxError> {
        self.playlist.prev();
        self.load_current()
    }

    /// Send the current preview as one frame, rendering it first if needed.
    pub async fn send_current(&mut self) -> Result<SendReport, MxError> {
        if self.preview.is_none() {
            self.load_current()?;
        }
        let Some(buffer) = self.preview.as_ref() else {
            return Err(MxError::InvalidImage("nothing to send".into()));
        };
        let label = self.playlist.label().unwrap_or_default();

        match self.sender.send(buffer).await {
            Ok(report) => {
                self.status(&format!(
                    "Sent: {label} (frameId={}, {} chunks)",
                    report.frame_id, report.chunks
                ));
                Ok(report)
            }
            Err(MxError::NotConnected) => {
                self.status("Not connected yet");
                Err(MxError::NotConnected)
            }
            Err(e) => {
                self.status(&format!("Send failed: {e}"));
                Err(e)
            }
        }
    }

    /// Send every image once, in order. Returns how many failed.
    pub async fn send_all(&mut self) -> usize {
        let mut failed = 0;
        for i in 0..self.playlist.len() {
            if i > 0 {
                self.playlist.next();
            }
            self.preview = None;
            if self.send_current().await.is_err() {
                failed += 1;
            }
        }
        failed
    }

    /// Write the current preview as a PNG.
    pub fn save_preview(&self, path: &Path) -> Result<(), MxError> {
        let Some(buffer) = self.preview.as_ref() else {
            return Err(MxError::InvalidImage("no preview rendered".into()));
        };
        buffer.save_preview(path)?;
        self.status(&format!("Preview written to {}", path.display()));
        Ok(())
    }

    /// Line-driven control loop.
    ///
    /// ```text
    /// n | next        next image
    /// p | prev        previous image
    /// s | send        send the current image
    /// w <file.png>    save the current preview
    /// q | quit        stop (also on end of input)
    /// ```
    pub async fn run_interactive<R>(&mut self, input: R) -> Result<(), MxError>
    where
        R: AsyncBufRead + Unpin,
    {
        if !self.playlist.is_empty() {
            let _ = self.load_current();
        }

        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let mut words = line.split_whitespace();
            let Some(cmd) = words.next() else { continue };
            // Failures are already reported through the status callbacks.
            match cmd {
                "n" | "next" => {
                    let _ = self.next();
                }
                "p" | "prev" => {
                    let _ = self.prev();
                }
                "s" | "send" => {
                    let _ = self.send_current().await;
                }
                "w" | "write" => match words.next() {
                    Some(path) => {
                        if let Err(e) = self.save_preview(Path::new(path)) {
                            self.status(&format!("Save failed: {e}"));
                        }
                    }
                    None => self.status("usage: w <file.png>"),
                },
                "q" | "quit" => break,
                other => self.status(&format!("unknown command: {other}")),
            }
        }
        Ok(())
    }

    fn status(&self, msg: &str) {
        info!("{msg}");
        for callback in &self.on_status {
            callback(msg);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
