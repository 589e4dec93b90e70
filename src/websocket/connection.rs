use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{DecodeError, ProtocolError, TransportError};
use crate::protocol::{self, Envelope};
use crate::session::{Handshake, SessionTable};
use crate::Result;

/// How long [`ConnectionManager::close`] waits for the peer to finish the close handshake.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Why a connection ended without the owner asking for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LossReason {
    PeerClosed,
    Transport(String),
    Decode(DecodeError),
}

impl fmt::Display for LossReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LossReason::PeerClosed => f.write_str("peer closed the connection"),
            LossReason::Transport(e) => write!(f, "transport failure: {}", e),
            LossReason::Decode(e) => write!(f, "undecodable frame: {}", e),
        }
    }
}

/// Everything the reader side hands to the owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A decoded envelope other than `SessionStart`, which the manager answers itself.
    Envelope(Envelope),
    /// A legacy plain-text frame.
    Text(String),
    ConnectionLost(LossReason),
}

#[derive(Debug)]
struct Shared {
    state: ConnectionState,
    sessions: SessionTable,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    closed_by_owner: bool,
}

impl Shared {
    /// Move to Closing and queue a close frame for the writer.
    fn begin_close(&mut self) {
        if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
            return;
        }
        self.state = ConnectionState::Closing;
        if let Some(tx) = self.outbound.take() {
            let _ = tx.send(Message::Close(None));
        }
    }

    /// Move to Closed and close every session. Returns the previous state
    /// and how many sessions were closed.
    fn finish(&mut self) -> (ConnectionState, usize) {
        let previous = self.state;
        self.state = ConnectionState::Closed;
        self.outbound = None;
        (previous, self.sessions.close_all().len())
    }
}

/// Owns one WebSocket connection from connect to close.
///
/// State and the session table sit behind one mutex that is only held for a
/// transition or a table update, never across socket I/O. Inbound traffic is
/// delivered through the receiver returned by [`connect`](Self::connect) or
/// [`accept`](Self::accept).
pub struct ConnectionManager {
    id: Uuid,
    handshake: Arc<Handshake>,
    shared: Arc<Mutex<Shared>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(handshake: Arc<Handshake>) -> Self {
        Self {
            id: Uuid::new_v4(),
            handshake,
            shared: Arc::new(Mutex::new(Shared {
                state: ConnectionState::Connecting,
                sessions: SessionTable::new(),
                outbound: None,
                closed_by_owner: false,
            })),
            reader: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.lock().await.state
    }

    pub async fn session_count(&self) -> usize {
        self.shared.lock().await.sessions.len()
    }

    /// Dial `target` as a client.
    pub async fn connect(&self, target: &Url) -> Result<mpsc::UnboundedReceiver<ConnectionEvent>> {
        self.ensure_connecting().await?;

        match tokio_tungstenite::connect_async(target.as_str()).await {
            Ok((ws_stream, _)) => {
                info!("Connection {} opened to {}", self.id, target);
                Ok(self.attach(ws_stream).await)
            }
            Err(e) => {
                self.shared.lock().await.finish();
                Err(TransportError::Connect(format!("{}: {}", target, e)).into())
            }
        }
    }

    /// Complete the server side of the WebSocket handshake on an accepted socket.
    pub async fn accept(&self, raw_stream: TcpStream) -> Result<mpsc::UnboundedReceiver<ConnectionEvent>> {
        self.ensure_connecting().await?;

        match tokio_tungstenite::accept_async(raw_stream).await {
            Ok(ws_stream) => Ok(self.attach(ws_stream).await),
            Err(e) => {
                self.shared.lock().await.finish();
                Err(TransportError::Connect(format!("websocket handshake failed: {}", e)).into())
            }
        }
    }

    /// Encode and queue an envelope. Only valid while Open. Envelopes the
    /// peer could not decode are refused before anything is queued.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        protocol::check_limits(envelope).map_err(ProtocolError::Unencodable)?;
        self.send_message(Message::Binary(protocol::encode(envelope))).await
    }

    /// Queue a legacy plain-text frame. Only valid while Open.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send_message(Message::Text(text.to_string())).await
    }

    /// Start the close handshake and wait briefly for the peer to finish it.
    pub async fn close(&self) {
        {
            let mut shared = self.shared.lock().await;
            if shared.state == ConnectionState::Open {
                shared.closed_by_owner = true;
                shared.begin_close();
            }
        }

        let reader = self.reader.lock().await.take();
        if let Some(mut reader) = reader {
            if tokio::time::timeout(CLOSE_GRACE, &mut reader).await.is_err() {
                debug!("Connection {} peer did not finish closing, dropping it", self.id);
                reader.abort();
            }
        }

        let (previous, closed) = self.shared.lock().await.finish();
        if previous != ConnectionState::Closed {
            info!("Connection {} closed ({} sessions ended)", self.id, closed);
        }
    }

    async fn ensure_connecting(&self) -> Result<()> {
        match self.shared.lock().await.state {
            ConnectionState::Connecting => Ok(()),
            _ => Err(ProtocolError::AlreadyConnected.into()),
        }
    }

    async fn send_message(&self, message: Message) -> Result<()> {
        let shared = self.shared.lock().await;
        if shared.state != ConnectionState::Open {
            return Err(ProtocolError::NotConnected.into());
        }
        let tx = shared.outbound.as_ref().ok_or(ProtocolError::NotConnected)?;
        tx.send(message)
            .map_err(|e| TransportError::Send(e.to_string()))?;
        Ok(())
    }

    async fn attach<S>(&self, ws_stream: WebSocketStream<S>) -> mpsc::UnboundedReceiver<ConnectionEvent>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (ws_sink, ws_stream) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        {
            let mut shared = self.shared.lock().await;
            shared.outbound = Some(tx);
            shared.state = ConnectionState::Open;
        }

        tokio::spawn(write_loop(self.id, ws_sink, rx));
        let reader = tokio::spawn(read_loop(
            self.id,
            ws_stream,
            self.shared.clone(),
            self.handshake.clone(),
            events_tx,
        ));
        *self.reader.lock().await = Some(reader);

        events_rx
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

// Forward queued messages to the socket until a close frame goes out or
// every sender is gone.
async fn write_loop<S>(
    id: Uuid,
    mut ws_sink: SplitSink<WebSocketStream<S>, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let is_close = message.is_close();
        if let Err(e) = ws_sink.send(message).await {
            error!("Error sending on connection {}: {}", id, e);
            break;
        }
        if is_close {
            break;
        }
    }

    if let Err(e) = ws_sink.close().await {
        debug!("Error closing sink for connection {}: {}", id, e);
    }
}

async fn read_loop<S>(
    id: Uuid,
    mut ws_stream: SplitStream<WebSocketStream<S>>,
    shared: Arc<Mutex<Shared>>,
    handshake: Arc<Handshake>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reason = loop {
        let message = match ws_stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => break LossReason::Transport(e.to_string()),
            None => break LossReason::PeerClosed,
        };

        match message {
            Message::Binary(bytes) => match protocol::decode(&bytes) {
                Ok(Envelope::SessionStart(request)) => {
                    let mut guard = shared.lock().await;
                    let reply: Envelope = match handshake.handle_session_start(&mut guard.sessions, &request) {
                        Ok(accept) => {
                            info!("Connection {} accepted session {}", id, accept.session_id);
                            accept.into()
                        }
                        Err(reject) => {
                            warn!(
                                "Connection {} rejected session {:?}: {}",
                                id, reject.session_id, reject.detail
                            );
                            reject.into()
                        }
                    };
                    if let Some(tx) = guard.outbound.as_ref() {
                        let _ = tx.send(Message::Binary(protocol::encode(&reply)));
                    }
                }
                Ok(envelope) => {
                    debug!("Connection {} received {:?}", id, envelope.kind());
                    let _ = events.send(ConnectionEvent::Envelope(envelope));
                }
                Err(e) => {
                    error!("Connection {} sent an undecodable frame: {}", id, e);
                    shared.lock().await.begin_close();
                    break LossReason::Decode(e);
                }
            },
            Message::Text(text) => {
                debug!("Connection {} received text frame of {} bytes", id, text.len());
                let _ = events.send(ConnectionEvent::Text(text));
            }
            Message::Close(frame) => {
                debug!("Connection {} got close frame: {:?}", id, frame);
                break LossReason::PeerClosed;
            }
            // ping replies are handled by tungstenite
            _ => {}
        }
    };

    let (closed_by_owner, closed) = {
        let mut guard = shared.lock().await;
        let closed_by_owner = guard.closed_by_owner;
        let (_, closed) = guard.finish();
        (closed_by_owner, closed)
    };

    if closed_by_owner {
        info!("Connection {} closed ({} sessions ended)", id, closed);
    } else {
        info!("Connection {} lost: {} ({} sessions ended)", id, reason, closed);
        let _ = events.send(ConnectionEvent::ConnectionLost(reason));
    }
}
