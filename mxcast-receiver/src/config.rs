//! Configuration for the receiver.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use mxcast_core::{AssemblerConfig, ByteOrder, FRAME_BYTES, WireFormat};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub network: NetworkConfig,
    pub assembly: AssemblyConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address publishers connect to.
    pub listen: String,
}

/// Frame reassembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    /// Wire format to accept: `binary` or `json`.
    pub format: WireFormat,
    /// Drop a partial frame this long after its first chunk arrived.
    pub frame_timeout_ms: u64,
    /// Partial frames kept at once; the oldest is evicted beyond this.
    pub max_pending_frames: usize,
}

/// Where completed frames are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for frame PNGs; created if missing.
    pub directory: PathBuf,
    /// Also write every frame to its own file, not just `latest.png`.
    pub keep_frames: bool,
    /// Byte order the sender packs pixels with.
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

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7341".into(),
        }
    }
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            format: WireFormat::Binary,
            frame_timeout_ms: 3000,
            max_pending_frames: 4,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("frames"),
            keep_frames: true,
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

impl ReceiverConfig {
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

    /// Convert assembly settings into a core `AssemblerConfig`.
    pub fn to_assembler_config(&self) -> AssemblerConfig {
        AssemblerConfig {
            frame_timeout: Duration::from_millis(self.assembly.frame_timeout_ms.max(10)),
            max_pending: self.assembly.max_pending_frames.clamp(1, 64),
            expected_len: Some(FRAME_BYTES),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
