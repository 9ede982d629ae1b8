// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The room broker.
//!
//! One task per socket, one registry for all rooms. Frames fan out to a
//! room's subscribers in the order connection tasks acquire the registry, so
//! any single subscriber observes a consistent room order. Protocol
//! violations are answered with an error frame and the socket stays open;
//! only silence beyond the liveness window closes a connection.

use std::collections::HashMap;
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config;
use crate::protocol::{Envelope, Role};

type ConnId = u64;

/// Per-connection record. Lives on the connection's own task; the registry
/// only ever sees the send handle.
struct Connection {
    room: Option<String>,
    role: Option<Role>,
    connected_at: Instant,
    last_activity: Instant,
}

impl Connection {
    fn new() -> Connection {
        let now = Instant::now();
        Connection {
            room: None,
            role: None,
            connected_at: now,
            last_activity: now,
        }
    }
}

/// The mapping from room id to subscriber send handles. A connection appears
/// in at most one room; empty rooms are pruned so the map stays bounded by
/// the number of live connections.
#[derive(Default)]
struct RoomRegistry {
    rooms: HashMap<String, HashMap<ConnId, UnboundedSender<Message>>>,
}

impl RoomRegistry {
    fn subscribe(&mut self, room: &str, id: ConnId, tx: UnboundedSender<Message>) {
        self.rooms.entry(room.to_string()).or_default().insert(id, tx);
    }

    fn unsubscribe(&mut self, room: &str, id: ConnId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    /// Sends a frame to every member of a room, the sender included.
    fn publish(&self, room: &str, envelope: &Envelope) {
        if let Some(members) = self.rooms.get(room) {
            let text = envelope.to_json();
            for tx in members.values() {
                // A dead receiver is cleaned up by its own close path.
                let _ = tx.send(Message::Text(text.clone().into()));
            }
        }
    }

    #[cfg(test)]
    fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

struct BrokerState {
    config: config::Broker,
    registry: Mutex<RoomRegistry>,
    next_conn_id: AtomicU64,
}

/// The broker server: websocket fan-out at `/ws`, health probe at `/health`.
pub struct Broker {
    config: config::Broker,
}

impl Broker {
    /// Creates a broker with the given config.
    pub fn new(config: config::Broker) -> Broker {
        Broker { config }
    }

    /// Binds the listener and starts serving in the background. Returns the
    /// bound address (useful when the configured port is 0) and the serve
    /// task handle.
    pub async fn bind(&self) -> Result<(SocketAddr, JoinHandle<io::Result<()>>), Box<dyn Error>> {
        let state = Arc::new(BrokerState {
            config: self.config.clone(),
            registry: Mutex::new(RoomRegistry::default()),
            next_conn_id: AtomicU64::new(1),
        });

        let app = Router::new()
            .route("/ws", any(ws_handler))
            .route("/health", get(health))
            .with_state(state);

        let listener = TcpListener::bind(("0.0.0.0", self.config.port())).await?;
        let addr = listener.local_addr()?;
        info!(addr = %addr, "Room broker listening");

        let handle = tokio::spawn(async move { axum::serve(listener, app).await });
        Ok((addr, handle))
    }

    /// Serves until the process is stopped.
    pub async fn serve(&self) -> Result<(), Box<dyn Error>> {
        let (_, handle) = self.bind().await?;
        handle.await??;
        Ok(())
    }
}

/// GET /health.
async fn health() -> impl IntoResponse {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default();
    Json(serde_json::json!({ "status": "ok", "timestamp": timestamp }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BrokerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Runs one connection to completion.
async fn handle_socket(socket: WebSocket, state: Arc<BrokerState>) {
    let id = state.next_conn_id.fetch_add(1, Ordering::Relaxed);
    info!(conn = id, "Connection opened");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Everything addressed to this connection, fan-out included, funnels
    // through one writer so frame order is the send order.
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut connection = Connection::new();
    let timeout = state.config.heartbeat_timeout();

    loop {
        let frame = match tokio::time::timeout(timeout, stream.next()).await {
            // No frame inside the liveness window: the connection is stale.
            Err(_) => {
                info!(
                    conn = id,
                    idle_secs = connection.last_activity.elapsed().as_secs(),
                    "Connection exceeded liveness window, closing"
                );
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(conn = id, err = e.to_string(), "Socket error");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        connection.last_activity = Instant::now();
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            // Control frames count as activity but carry nothing.
            _ => continue,
        };

        match Envelope::parse(text.as_str()) {
            Some(envelope) => dispatch(&state, id, &mut connection, &tx, envelope),
            None => {
                debug!(conn = id, "Dropping malformed frame");
                send_to(&tx, &Envelope::error("Invalid message format"));
            }
        }
    }

    if let Some(room) = connection.room.take() {
        state.registry.lock().unsubscribe(&room, id);
    }
    writer.abort();
    info!(
        conn = id,
        connected_secs = connection.connected_at.elapsed().as_secs(),
        "Connection closed"
    );
}

/// Applies one valid frame against the room state.
fn dispatch(
    state: &Arc<BrokerState>,
    id: ConnId,
    connection: &mut Connection,
    tx: &UnboundedSender<Message>,
    envelope: Envelope,
) {
    match &envelope {
        Envelope::Join { room, role } => {
            let mut registry = state.registry.lock();
            // Switching rooms leaves the previous one first; a connection
            // belongs to at most one room.
            if let Some(previous) = connection.room.take() {
                registry.unsubscribe(&previous, id);
            }
            connection.room = Some(room.clone());
            connection.role = Some(*role);
            registry.subscribe(room, id, tx.clone());
            info!(conn = id, room, role = %role, "Joined room");

            // A joining controller needs the current state; ask the room so
            // any renderer present answers with sync-state.
            if *role == Role::Controller {
                registry.publish(room, &Envelope::RequestSync);
            }
        }
        Envelope::PadHit { .. } | Envelope::TempoChange { .. } => match &connection.room {
            Some(room) => state.registry.lock().publish(room, &envelope),
            None => send_to(tx, &Envelope::error("Not joined")),
        },
        Envelope::SyncState { .. } => match (&connection.room, connection.role) {
            (None, _) => send_to(tx, &Envelope::error("Not joined")),
            (Some(_), role) if role != Some(Role::Renderer) => {
                warn!(conn = id, "Rejected sync-state from a controller");
                send_to(tx, &Envelope::error("Only renderer can sync state"));
            }
            (Some(room), _) => state.registry.lock().publish(room, &envelope),
        },
        Envelope::Heartbeat => send_to(tx, &Envelope::Pong),
        // Activity is already updated for any inbound frame.
        Envelope::Pong => {}
        // Server-originated frame types coming from a client carry nothing
        // to act on.
        Envelope::RequestSync | Envelope::Error { .. } => {
            debug!(conn = id, "Ignoring server-only frame from client");
        }
    }
}

fn send_to(tx: &UnboundedSender<Message>, envelope: &Envelope) {
    let _ = tx.send(Message::Text(envelope.to_json().into()));
}
