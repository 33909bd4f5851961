//! WebSocket transport adapter.
//!
//! Accepts client connections, assigns each an opaque connection id, and
//! bridges JSON event frames to the session manager. This layer carries no
//! routing, persistence or authentication concerns; those live outside the
//! daemon.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use protocol::messages::{ClientEvent, ServerEvent};

use crate::session::{ConnectionId, EventSender, SessionManager};

/// Outbound event buffer per connection. A full buffer backpressures the
/// pumps of that connection rather than dropping output.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// WebSocket front end for the session manager.
pub struct Server {
    manager: Arc<SessionManager>,
}

impl Server {
    /// Creates a server over the given session manager.
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Accepts client connections until the listener fails.
    pub async fn run(&self, listener: TcpListener) -> anyhow::Result<()> {
        info!(addr = %listener.local_addr()?, "listening for client connections");

        loop {
            let (stream, peer) = listener.accept().await?;
            let manager = Arc::clone(&self.manager);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, manager).await {
                    debug!(peer = %peer, error = %e, "connection ended with error");
                }
            });
        }
    }
}

/// Runs one client connection to completion.
///
/// Spawns an outbound writer draining the connection's event channel, then
/// dispatches inbound frames until the client goes away. Disconnect, for
/// any reason, closes every terminal the connection had open.
async fn handle_connection(
    stream: TcpStream,
    manager: Arc<SessionManager>,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let connection_id: ConnectionId = Uuid::new_v4().to_string();
    info!(conn_id = %connection_id, "client connected");

    let (mut sink, mut source) = ws.split();
    let (events_tx, mut events_rx) = mpsc::channel::<ServerEvent>(EVENT_CHANNEL_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event.to_json() {
                Ok(json) => {
                    if sink.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode server event"),
            }
        }
    });

    while let Some(frame) = source.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(conn_id = %connection_id, error = %e, "websocket read error");
                break;
            }
        };

        match frame {
            Message::Text(text) => match ClientEvent::from_json(&text) {
                Ok(event) => dispatch(&manager, &connection_id, &events_tx, event).await,
                Err(e) => {
                    warn!(
                        conn_id = %connection_id,
                        error = %e,
                        "ignoring malformed client event"
                    );
                }
            },
            Message::Close(_) => break,
            // Pings are answered by tungstenite; binary frames are not part
            // of the protocol.
            _ => {}
        }
    }

    info!(conn_id = %connection_id, "client disconnected");
    manager.close_all(&connection_id).await;

    drop(events_tx);
    let _ = writer.await;
    Ok(())
}

async fn dispatch(
    manager: &SessionManager,
    connection_id: &ConnectionId,
    events: &EventSender,
    event: ClientEvent,
) {
    match event {
        ClientEvent::OpenTerminal(req) => {
            manager.open(connection_id, events, req).await;
        }
        ClientEvent::TerminalInput(input) => {
            manager
                .write(connection_id, &input.term_id, &input.data)
                .await;
        }
        ClientEvent::TerminalResize(req) => {
            manager
                .resize(connection_id, &req.term_id, req.rows, req.cols)
                .await;
        }
        ClientEvent::CloseTerminal(req) => {
            manager.close(connection_id, &req.term_id).await;
        }
    }
}
