//! In-process transceiver.
//!
//! Every envelope sent through a [`MemoryTransceiver`] is encoded to JSON text
//! and decoded again on the receiving side, so payloads behave exactly as
//! they would over a socket.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::errors::TransportError;
use crate::transceiver::{
    CloseListener, ListenOptions, ListenerSet, MessageListener, Subscription, Transceiver,
};

struct Shared {
    listeners: ListenerSet,
    peer: Mutex<Weak<Shared>>,
    sent: Mutex<Vec<Envelope>>,
}

impl Shared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            listeners: ListenerSet::new(),
            peer: Mutex::new(Weak::new()),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn receive_text(&self, text: &str) {
        match Envelope::decode(text) {
            Ok(envelope) => self.listeners.emit(&envelope),
            Err(err) => warn!(error = %err, "dropping undecodable message"),
        }
    }

    fn close(&self) {
        if self.listeners.mark_closed() {
            debug!("memory transceiver closed");
            let peer = self.peer.lock().upgrade();
            if let Some(peer) = peer {
                peer.close();
            }
        }
    }
}

/// In-memory [`Transceiver`], either one end of a connected pair or detached.
#[derive(Clone)]
pub struct MemoryTransceiver {
    shared: Arc<Shared>,
}

impl MemoryTransceiver {
    /// Two connected ends: what one sends, the other receives.
    ///
    /// Closing either end closes both.
    pub fn pair() -> (Self, Self) {
        let a = Shared::new();
        let b = Shared::new();
        *a.peer.lock() = Arc::downgrade(&b);
        *b.peer.lock() = Arc::downgrade(&a);
        (Self { shared: a }, Self { shared: b })
    }

    /// An end with no peer. Sends are recorded and otherwise discarded;
    /// inbound traffic is injected with [`deliver`](Self::deliver).
    pub fn detached() -> Self {
        Self {
            shared: Shared::new(),
        }
    }

    /// Inject an inbound envelope as if the peer had sent it.
    pub fn deliver(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let text = envelope
            .encode()
            .map_err(|err| TransportError::Encode(err.to_string()))?;
        self.deliver_text(&text);
        Ok(())
    }

    /// Inject raw inbound text. Undecodable text is logged and dropped.
    pub fn deliver_text(&self, text: &str) {
        self.shared.receive_text(text);
    }

    /// Every envelope sent from this end, oldest first.
    pub fn sent(&self) -> Vec<Envelope> {
        self.shared.sent.lock().clone()
    }

    /// Number of registered message listeners.
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.messages.len()
    }
}

#[async_trait]
impl Transceiver for MemoryTransceiver {
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if self.shared.listeners.is_closed() {
            return Err(TransportError::Closed);
        }
        let text = envelope
            .encode()
            .map_err(|err| TransportError::Encode(err.to_string()))?;
        self.shared.sent.lock().push(envelope);

        let peer = self.shared.peer.lock().upgrade();
        if let Some(peer) = peer {
            peer.receive_text(&text);
        }
        Ok(())
    }

    fn on_message(&self, listener: MessageListener, options: ListenOptions) -> Subscription {
        self.shared.listeners.messages.add(listener, options)
    }

    fn on_close(&self, listener: CloseListener, options: ListenOptions) -> Subscription {
        self.shared.listeners.on_close(listener, options)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shared.close();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.shared.listeners.is_closed()
    }
}

impl std::fmt::Debug for MemoryTransceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransceiver")
            .field("closed", &self.is_closed())
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use assert_matches::assert_matches;
    use serde_json::{Value, json};

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<Envelope>>>, MessageListener) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: MessageListener = Arc::new(move |env: &Envelope| {
            sink.lock().push(env.clone());
        });
        (seen, listener)
    }

    #[tokio::test]
    async fn pair_delivers_to_peer() {
        let (a, b) = MemoryTransceiver::pair();
        let (seen, listener) = recorder();
        let _sub = b.on_message(listener, ListenOptions::default());

        let env = Envelope::notification("system/log", json!({"line": "hi"}));
        a.send(env.clone()).await.unwrap();

        assert_eq!(*seen.lock(), vec![env.clone()]);
        assert_eq!(a.sent(), vec![env]);
        assert!(b.sent().is_empty());
    }

    #[tokio::test]
    async fn close_propagates_to_peer() {
        let (a, b) = MemoryTransceiver::pair();
        let closed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&closed);
        let _sub = b.on_close(
            Arc::new(move || flag.store(true, Ordering::SeqCst)),
            ListenOptions::once(),
        );
        a.close().await.unwrap();
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let t = MemoryTransceiver::detached();
        t.close().await.unwrap();
        let err = t
            .send(Envelope::notification("m", Value::Null))
            .await
            .unwrap_err();
        assert_matches!(err, TransportError::Closed);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (a, _b) = MemoryTransceiver::pair();
        a.close().await.unwrap();
        a.close().await.unwrap();
        assert!(a.is_closed());
    }

    #[test]
    fn undecodable_text_is_dropped() {
        let t = MemoryTransceiver::detached();
        let (seen, listener) = recorder();
        let _sub = t.on_message(listener, ListenOptions::default());
        t.deliver_text("{\"type\":\"request\"}");
        t.deliver_text("garbage");
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn deliver_reaches_listeners() {
        let t = MemoryTransceiver::detached();
        let (seen, listener) = recorder();
        let _sub = t.on_message(listener, ListenOptions::default());
        t.deliver(&Envelope::response("x-1", json!(42))).unwrap();
        assert_eq!(*seen.lock(), vec![Envelope::response("x-1", json!(42))]);
    }

    #[test]
    fn close_clears_message_listeners() {
        let t = MemoryTransceiver::detached();
        let (_seen, listener) = recorder();
        let _sub = t.on_message(listener, ListenOptions::default());
        assert_eq!(t.listener_count(), 1);
        t.shared.close();
        assert_eq!(t.listener_count(), 0);
    }
}
