//! TCP publisher.
//!
//! Publishes are framed with [`PublishCodec`] on a single stream to a
//! broker or device. The read half is only watched for EOF / errors so
//! that a peer hang-up shows up as a link-state change.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::transport::codec::{Publish, PublishCodec};
use crate::transport::{LinkState, Transport};

/// Default connect deadline.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A live connection: the framed write half plus the task watching
/// the read half.
struct Link {
    writer: FramedWrite<OwnedWriteHalf, PublishCodec>,
    watcher: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// Transport publishing over one TCP connection.
///
/// Starts [`LinkState::Disconnected`]; call [`connect`](Self::connect)
/// to bring the link up. Once a connection has succeeded, later
/// attempts report [`LinkState::Reconnecting`] while they run.
pub struct TcpTransport {
    addr: String,
    connect_timeout: Duration,
    codec: PublishCodec,
    link: Mutex<Option<Link>>,
    ever_connected: AtomicBool,
    state_tx: watch::Sender<LinkState>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        Self {
            addr: addr.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            codec: PublishCodec::default(),
            link: Mutex::new(None),
            ever_connected: AtomicBool::new(false),
            state_tx,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Cap the size of a single published payload.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.codec = PublishCodec::new(max);
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// State published while a connect attempt runs.
    fn attempt_state(&self) -> LinkState {
        if self.ever_connected.load(Ordering::SeqCst) {
            LinkState::Reconnecting
        } else {
            LinkState::Connecting
        }
    }

    /// Open (or re-open) the connection.
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.state_tx.send_replace(self.attempt_state());

        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.state_tx.send_replace(LinkState::Error(e.to_string()));
                return Err(e.into());
            }
            Err(_) => {
                let e = std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", self.addr),
                );
                self.state_tx.send_replace(LinkState::Error(e.to_string()));
                return Err(e.into());
            }
        };
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let mut link = self.link.lock().await;
        // Replacing the old link aborts its watcher before the new one starts.
        *link = None;
        self.ever_connected.store(true, Ordering::SeqCst);
        self.state_tx.send_replace(LinkState::Connected);
        *link = Some(Link {
            writer: FramedWrite::new(write_half, self.codec),
            watcher: tokio::spawn(watch_peer(read_half, self.state_tx.clone())),
        });
        info!(addr = %self.addr, "transport connected");
        Ok(())
    }

    /// Close the connection.
    pub async fn disconnect(&self) {
        if let Some(mut link) = self.link.lock().await.take() {
            let _ = link.writer.close().await;
        }
        self.state_tx.send_replace(LinkState::Disconnected);
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn link_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), TransportError> {
        let mut guard = self.link.lock().await;
        let writer = &mut guard.as_mut().ok_or(TransportError::Closed)?.writer;

        let msg = Publish {
            channel: channel.to_string(),
            payload,
        };
        if let Err(e) = writer.send(msg).await {
            warn!(addr = %self.addr, "publish failed: {e}");
            if !matches!(e, TransportError::MessageTooLarge { .. }) {
                *guard = None;
                self.state_tx.send_replace(LinkState::Error(e.to_string()));
            }
            return Err(e);
        }
        Ok(())
    }
}

/// Report peer hang-up on the link-state channel.
async fn watch_peer(mut read_half: OwnedReadHalf, state_tx: watch::Sender<LinkState>) {
    let mut buf = [0u8; 256];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                debug!("peer closed the connection");
                state_tx.send_if_modified(|state| {
                    if state.is_connected() {
                        *state = LinkState::Error("peer closed connection".into());
                        true
                    } else {
                        false
                    }
                });
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                state_tx.send_if_modified(|state| {
                    if state.is_connected() {
                        *state = LinkState::Error(e.to_string());
                        true
                    } else {
                        false
                    }
                });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::net::TcpListener;
    use tokio_util::codec::FramedRead;

    #[tokio::test]
    async fn starts_disconnected() {
        let transport = TcpTransport::new("127.0.0.1:1");
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.publish("c", Bytes::new()).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn connect_failure_reports_error_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = TcpTransport::new(addr.to_string());
        assert!(transport.connect().await.is_err());
        assert!(matches!(*transport.link_state().borrow(), LinkState::Error(_)));
    }

    #[tokio::test]
    async fn retry_before_first_connect_is_not_a_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = TcpTransport::new(addr.to_string());
        assert_eq!(transport.attempt_state(), LinkState::Connecting);
        assert!(transport.connect().await.is_err());
        assert_eq!(transport.attempt_state(), LinkState::Connecting);

        let listener = TcpListener::bind(addr).await.unwrap();
        let (connected, accepted) = tokio::join!(transport.connect(), listener.accept());
        connected.unwrap();
        drop(accepted.unwrap());
        assert_eq!(transport.attempt_state(), LinkState::Reconnecting);
    }

    #[tokio::test]
    async fn publishes_reach_the_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let transport = TcpTransport::new(addr.to_string());
        let (connected, accepted) = tokio::join!(transport.connect(), listener.accept());
        connected.unwrap();
        let (stream, _) = accepted.unwrap();
        assert!(transport.is_connected());

        transport
            .publish("matrix/frame", Bytes::from_static(b"abc"))
            .await
            .unwrap();

        let mut reader = FramedRead::new(stream, PublishCodec::default());
        let msg = reader.next().await.unwrap().unwrap();
        assert_eq!(msg.channel, "matrix/frame");
        assert_eq!(&msg.payload[..], b"abc");
    }

    #[tokio::test]
    async fn peer_hangup_changes_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let transport = TcpTransport::new(addr.to_string());
        let (connected, accepted) = tokio::join!(transport.connect(), listener.accept());
        connected.unwrap();
        let mut link = transport.link_state();

        drop(accepted.unwrap());
        tokio::time::timeout(Duration::from_secs(5), link.wait_for(|s| !s.is_connected()))
            .await
            .expect("timeout")
            .unwrap();
        assert!(!transport.is_connected());
    }
}
