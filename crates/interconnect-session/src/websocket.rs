//! WebSocket transceiver over `tokio-tungstenite`.
//!
//! One connection task owns the socket: it writes queued frames, acknowledging
//! each send once the frame is flushed, and decodes inbound text or binary
//! frames into envelopes for the listeners.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, connect_async};
use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::errors::TransportError;
use crate::transceiver::{
    CloseListener, ListenOptions, ListenerSet, MessageListener, Subscription, Transceiver,
};

/// Frames queued ahead of the writer before `send` waits.
const OUTBOUND_CAPACITY: usize = 64;

type Ack = oneshot::Sender<Result<(), TransportError>>;

enum Command {
    Frame { text: String, ack: Ack },
    Close { ack: Ack },
}

/// [`Transceiver`] over a WebSocket connection.
#[derive(Clone)]
pub struct WebSocketTransceiver {
    commands: mpsc::Sender<Command>,
    listeners: Arc<ListenerSet>,
}

impl WebSocketTransceiver {
    /// Connect to `url` (`ws://` or `wss://`).
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        debug!(url, "websocket connected");
        Ok(Self::from_stream(ws))
    }

    /// Wrap an established stream, e.g. one accepted by a server.
    ///
    /// Must be called within a tokio runtime.
    pub fn from_stream<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (commands, command_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let listeners = Arc::new(ListenerSet::new());
        drop(tokio::spawn(connection_loop(
            ws,
            command_rx,
            Arc::clone(&listeners),
        )));
        Self {
            commands,
            listeners,
        }
    }

    async fn submit(&self, make: impl FnOnce(Ack) -> Command) -> Result<(), TransportError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(make(ack))
            .await
            .map_err(|_| TransportError::Closed)?;
        done.await.map_err(|_| TransportError::Closed)?
    }
}

#[async_trait]
impl Transceiver for WebSocketTransceiver {
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if self.listeners.is_closed() {
            return Err(TransportError::Closed);
        }
        let text = envelope
            .encode()
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        self.submit(|ack| Command::Frame { text, ack }).await
    }

    fn on_message(&self, listener: MessageListener, options: ListenOptions) -> Subscription {
        self.listeners.messages.add(listener, options)
    }

    fn on_close(&self, listener: CloseListener, options: ListenOptions) -> Subscription {
        self.listeners.on_close(listener, options)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.listeners.is_closed() {
            return Ok(());
        }
        let result = match self.submit(|ack| Command::Close { ack }).await {
            // the connection task already exited
            Ok(()) | Err(TransportError::Closed) => Ok(()),
            Err(e) => Err(e),
        };
        let _ = self.listeners.mark_closed();
        result
    }

    fn is_closed(&self) -> bool {
        self.listeners.is_closed()
    }
}

impl std::fmt::Debug for WebSocketTransceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransceiver")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Owns the socket until either side closes it.
async fn connection_loop<S>(
    ws: WebSocketStream<S>,
    mut commands: mpsc::Receiver<Command>,
    listeners: Arc<ListenerSet>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    Command::Frame { text, ack } => {
                        let result = ws_tx
                            .send(Message::text(text))
                            .await
                            .map_err(|e| TransportError::WebSocket(e.to_string()));
                        let failed = result.is_err();
                        let _ = ack.send(result);
                        if failed {
                            break;
                        }
                    }
                    Command::Close { ack } => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        let _ = ack.send(Ok(()));
                        break;
                    }
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => receive(&listeners, &text),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => receive(&listeners, text),
                        Err(_) => warn!("dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "peer closed websocket");
                        break;
                    }
                    // ping/pong are answered by tungstenite
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read failed");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    commands.close();
    while let Ok(cmd) = commands.try_recv() {
        let ack = match cmd {
            Command::Frame { ack, .. } => ack,
            Command::Close { ack } => ack,
        };
        let _ = ack.send(Err(TransportError::Closed));
    }
    if listeners.mark_closed() {
        debug!("websocket transceiver closed");
    }
}

fn receive(listeners: &ListenerSet, text: &str) {
    match Envelope::decode(text) {
        Ok(envelope) => listeners.emit(&envelope),
        Err(e) => warn!(error = %e, "dropping undecodable frame"),
    }
}
