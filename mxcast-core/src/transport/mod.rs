//! Publish/subscribe transport seam.
//!
//! The sender only needs three things from a transport: whether the
//! link is up, a way to publish one opaque message on a named channel,
//! and a stream of link-state changes. Delivery is best-effort: at most
//! once, possibly reordered, size-limited.
//!
//! | Module   | Purpose                                              |
//! |----------|------------------------------------------------------|
//! | `codec`  | Length-prefixed `(channel, payload)` framing for TCP |
//! | `tcp`    | [`TcpTransport`]: publishes over a TCP stream        |
//! | `memory` | [`MemoryTransport`]: in-process, for tests/dry runs  |

pub mod codec;
pub mod memory;
pub mod tcp;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use crate::error::TransportError;

pub use codec::{Publish, PublishCodec};
pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

// ── LinkState ────────────────────────────────────────────────────

/// Connection state as reported by a transport.
///
/// ```text
///  Disconnected ──► Connecting ──► Connected
///       ▲                │             │
///       │                ▼             ▼
///       └───────── Error(reason) ◄── Reconnecting
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No connection has been attempted, or it was closed cleanly.
    #[default]
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Ready to publish.
    Connected,
    /// A previously live link is being re-established.
    Reconnecting,
    /// The link failed.
    Error(String),
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

// ── Transport ────────────────────────────────────────────────────

/// A message channel the sender publishes chunks on.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribe to link-state changes. The receiver always holds the
    /// current state.
    fn link_state(&self) -> watch::Receiver<LinkState>;

    /// Whether a publish right now is expected to reach the wire.
    fn is_connected(&self) -> bool {
        self.link_state().borrow().is_connected()
    }

    /// Publish one message on `channel`.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), TransportError>;
}
