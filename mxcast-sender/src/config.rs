//! Configuration for the sender.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use mxcast_core::transport::codec::MAX_MESSAGE_SIZE;
use mxcast_core::{ByteOrder, MAX_CHUNK_SIZE, SenderConfig, WireFormat};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where frames are published.
    pub transport: TransportConfig,
    /// Frame encoding.
    pub frame: FrameConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// `host:port` of the broker or device.
    pub address: String,
    /// Connect deadline in milliseconds.
    pub connect_timeout_ms: u64,
    /// Delay between reconnect attempts in milliseconds; 0 disables.
    pub reconnect_ms: u64,
    /// Largest message the link accepts, in bytes.
    pub max_message_size: usize,
}

/// Frame encoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// `binary` or `json`.
    pub format: WireFormat,
    /// Raw payload bytes per chunk; 0 picks the format's default.
    pub chunk_size: usize,
    /// `big-endian` or `little-endian`; must match the display.
    pub byte_order: ByteOrder,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7341".into(),
            connect_timeout_ms: 5000,
            reconnect_ms: 2000,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            format: WireFormat::Binary,
            chunk_size: 0,
            byte_order: ByteOrder::BigEndian,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.transport.connect_timeout_ms.max(1))
    }

    /// `None` when automatic reconnects are off.
    pub fn reconnect_interval(&self) -> Option<Duration> {
        match self.transport.reconnect_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Convert frame settings into a core `SenderConfig`.
    pub fn to_sender_config(&self) -> SenderConfig {
        let format = self.frame.format;
        let chunk_size = match self.frame.chunk_size {
            0 => format.default_chunk_size(),
            n => n.min(MAX_CHUNK_SIZE),
        };
        SenderConfig {
            format,
            chunk_size,
            byte_order: self.frame.byte_order,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
