use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::protocol::Envelope;
use crate::session::Handshake;
use crate::websocket::{ConnectionEvent, ConnectionManager, ConnectionPool};

/// Accepts probe connections and answers them.
///
/// Session starts are answered inside each [`ConnectionManager`]. Here the
/// server echoes `Data` envelopes and text frames and closes on `Close`.
pub struct WebSocketServer {
    pool: Arc<ConnectionPool>,
    handshake: Arc<Handshake>,
}

impl WebSocketServer {
    pub fn new(handshake: Handshake) -> Self {
        Self {
            pool: Arc::new(ConnectionPool::new()),
            handshake: Arc::new(handshake),
        }
    }

    /// Accept connections until `cancel` fires, then close the ones still open.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, cancel: CancellationToken) {
        match listener.local_addr() {
            Ok(addr) => info!("Accepting WebSocket connections at ws://{}", addr),
            Err(e) => warn!("Listener has no local address: {}", e),
        }

        let tracker = tokio_util::task::TaskTracker::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let server = self.clone();
                        let cancel = cancel.child_token();
                        tracker.spawn(async move {
                            server.handle_connection(stream, addr, cancel).await;
                        });
                    }
                    Err(e) => error!("Error accepting connection: {}", e),
                },
            }
        }

        tracker.close();
        tracker.wait().await;
        info!("Server stopped");
    }

    pub async fn handle_connection(
        self: Arc<Self>,
        raw_stream: TcpStream,
        addr: SocketAddr,
        cancel: CancellationToken,
    ) {
        info!("New WebSocket connection from: {}", addr);

        let connection = ConnectionManager::new(self.handshake.clone());
        let mut events = match connection.accept(raw_stream).await {
            Ok(events) => events,
            Err(e) => {
                error!("Error during WebSocket handshake with {}: {}", addr, e);
                return;
            }
        };

        let connection_id = connection.id();
        self.pool.add(connection_id, addr).await;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    connection.close().await;
                    break;
                }
                event = events.recv() => event,
            };

            match event {
                Some(ConnectionEvent::Envelope(Envelope::Data(data))) => {
                    if let Err(e) = connection.send(&Envelope::Data(data)).await {
                        error!("Failed to echo data on connection {}: {}", connection_id, e);
                    }
                }
                Some(ConnectionEvent::Envelope(Envelope::Close { reason })) => {
                    info!("Connection {} asked to close: {}", connection_id, reason);
                    connection.close().await;
                    break;
                }
                Some(ConnectionEvent::Envelope(other)) => {
                    warn!(
                        "Ignoring {:?} envelope from client on connection {}",
                        other.kind(),
                        connection_id
                    );
                }
                Some(ConnectionEvent::Text(text)) => {
                    info!("Text frame on connection {}: {}", connection_id, text);
                    if let Err(e) = connection.send_text(&text).await {
                        error!("Failed to echo text on connection {}: {}", connection_id, e);
                    }
                }
                Some(ConnectionEvent::ConnectionLost(_)) | None => break,
            }
        }

        self.pool.remove(&connection_id).await;
    }

    pub fn pool(&self) -> Arc<ConnectionPool> {
        self.pool.clone()
    }
}
