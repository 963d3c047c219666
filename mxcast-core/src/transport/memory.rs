//! In-process transport.
//!
//! Records every publish and optionally forwards it to a channel, which
//! makes it usable both as a test double and as a loopback into a
//! [`FrameReceiver`](crate::receiver::FrameReceiver). Failures and link
//! drops can be scheduled after a given number of publishes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::error::TransportError;
use crate::transport::codec::Publish;
use crate::transport::{LinkState, Transport};

pub struct MemoryTransport {
    state_tx: watch::Sender<LinkState>,
    messages: Mutex<Vec<Publish>>,
    sink: Option<mpsc::UnboundedSender<Publish>>,
    fail_after: AtomicUsize,
    drop_link_after: AtomicUsize,
}

impl MemoryTransport {
    /// A connected transport.
    pub fn new() -> Self {
        Self::with_state(LinkState::Connected)
    }

    /// A transport whose link is down.
    pub fn disconnected() -> Self {
        Self::with_state(LinkState::Disconnected)
    }

    fn with_state(state: LinkState) -> Self {
        let (state_tx, _) = watch::channel(state);
        Self {
            state_tx,
            messages: Mutex::new(Vec::new()),
            sink: None,
            fail_after: AtomicUsize::new(usize::MAX),
            drop_link_after: AtomicUsize::new(usize::MAX),
        }
    }

    /// Forward every successful publish to the returned receiver.
    pub fn with_sink(mut self) -> (Self, mpsc::UnboundedReceiver<Publish>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sink = Some(tx);
        (self, rx)
    }

    /// Change the reported link state.
    pub fn set_link(&self, state: LinkState) {
        self.state_tx.send_replace(state);
    }

    /// Fail every publish once `n` messages have been accepted.
    pub fn fail_after(&self, n: usize) {
        self.fail_after.store(n, Ordering::SeqCst);
    }

    /// Drop the link right after the `n`-th accepted message.
    pub fn drop_link_after(&self, n: usize) {
        self.drop_link_after.store(n, Ordering::SeqCst);
    }

    /// Everything published so far, in order.
    pub fn messages(&self) -> Vec<Publish> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn message_count(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn link_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), TransportError> {
        if !self.state_tx.borrow().is_connected() {
            return Err(TransportError::Closed);
        }

        let msg = Publish {
            channel: channel.to_string(),
            payload,
        };
        let accepted = {
            let mut messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
            if messages.len() >= self.fail_after.load(Ordering::SeqCst) {
                return Err(TransportError::Io(std::io::Error::other("injected failure")));
            }
            messages.push(msg.clone());
            messages.len()
        };

        if accepted >= self.drop_link_after.load(Ordering::SeqCst) {
            self.state_tx
                .send_replace(LinkState::Error("link dropped".into()));
        }
        if let Some(sink) = &self.sink {
            let _ = sink.send(msg);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_in_order() {
        let t = MemoryTransport::new();
        t.publish("a", Bytes::from_static(b"1")).await.unwrap();
        t.publish("b", Bytes::from_static(b"2")).await.unwrap();
        let msgs = t.messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].channel, "a");
        assert_eq!(&msgs[1].payload[..], b"2");
    }

    #[tokio::test]
    async fn disconnected_rejects() {
        let t = MemoryTransport::disconnected();
        assert!(!t.is_connected());
        assert!(matches!(
            t.publish("a", Bytes::new()).await,
            Err(TransportError::Closed)
        ));
        assert_eq!(t.message_count(), 0);
    }

    #[test]
    fn scheduled_failure_and_drop() {
        use tokio_test::{assert_err, assert_ok, block_on};

        let t = MemoryTransport::new();
        t.fail_after(1);
        assert_ok!(block_on(t.publish("a", Bytes::new())));
        assert_err!(block_on(t.publish("a", Bytes::new())));

        let t = MemoryTransport::new();
        t.drop_link_after(2);
        assert_ok!(block_on(t.publish("a", Bytes::new())));
        assert!(t.is_connected());
        assert_ok!(block_on(t.publish("a", Bytes::new())));
        assert!(!t.is_connected());
    }

    #[tokio::test]
    async fn sink_forwards() {
        let (t, mut rx) = MemoryTransport::new().with_sink();
        t.publish("x", Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().channel, "x");
    }
}
