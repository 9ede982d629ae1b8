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

//! The client side of the room protocol.
//!
//! Owns the socket lifecycle: reconnect with doubling backoff, a join frame
//! on every connect, heartbeats, and an outbound queue so frames issued
//! while disconnected reach the broker in order once it returns. The
//! transport never gives up on its own; only `close` ends it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config;
use crate::protocol::{Envelope, Role};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frames addressed to the broker go through this handle. Sending while
/// disconnected queues instead of dropping.
pub type Outbound = mpsc::UnboundedSender<Envelope>;

/// Handlers invoked for frames arriving from the room. The default for
/// every frame is to ignore it, so a node implements only what its role
/// cares about.
pub trait Handler: Send + Sync + 'static {
    fn on_pad_hit(&self, _pad: u8, _velocity: Option<u8>) {}
    fn on_sync_state(&self, _tempo: u32, _pad_mappings: HashMap<u8, String>) {}
    fn on_tempo_change(&self, _tempo: u32) {}
    /// Called when the room asks for state. `out` replies into the same
    /// socket the request arrived on.
    fn on_request_sync(&self, _out: &Outbound) {}
}

/// A connected (or reconnecting) node. Dropping the transport tears the
/// connection down; pending queued frames are discarded.
pub struct Transport {
    outbound: Outbound,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Transport {
    /// Starts the transport. The task connects, joins, and keeps the
    /// connection alive until `close`.
    pub fn start(
        url: &str,
        room: &str,
        role: Role,
        net: config::Net,
        handler: Arc<dyn Handler>,
    ) -> Transport {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run(
            url.to_string(),
            room.to_string(),
            role,
            net,
            handler,
            outbound_tx.clone(),
            outbound_rx,
            shutdown_rx,
        ));

        Transport {
            outbound: outbound_tx,
            shutdown: shutdown_tx,
            task,
        }
    }

    /// Sends a frame to the room, queueing it if the broker is unreachable.
    pub fn send(&self, envelope: Envelope) {
        if self.outbound.send(envelope).is_err() {
            warn!("Transport task is gone, dropping frame");
        }
    }

    /// Returns a handle that can send frames from elsewhere (handlers,
    /// signal paths).
    pub fn sender(&self) -> Outbound {
        self.outbound.clone()
    }

    /// Cancels the reconnect and heartbeat timers and closes the socket.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// The doubling backoff, capped.
fn next_delay(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

enum SessionEnd {
    Shutdown,
    Disconnected,
}

#[allow(clippy::too_many_arguments)]
async fn run(
    url: String,
    room: String,
    role: Role,
    net: config::Net,
    handler: Arc<dyn Handler>,
    outbound_tx: Outbound,
    mut outbound_rx: mpsc::UnboundedReceiver<Envelope>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Frames that were in flight when a connection died, replayed first on
    // the next connect. Frames issued while disconnected wait in the
    // outbound channel itself, behind these.
    let mut retry: VecDeque<Envelope> = VecDeque::new();
    let mut delay = net.reconnect_initial();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let socket = tokio::select! {
            _ = shutdown.changed() => break,
            result = connect_async(url.as_str()) => match result {
                Ok((socket, _)) => socket,
                Err(e) => {
                    debug!(
                        err = e.to_string(),
                        delay_ms = delay.as_millis() as u64,
                        "Connect failed, backing off"
                    );
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = next_delay(delay, net.reconnect_max());
                    continue;
                }
            },
        };

        // A successful connect resets the backoff.
        delay = net.reconnect_initial();
        info!(url, room, role = %role, "Connected to broker");

        match connected(
            socket,
            &room,
            role,
            &net,
            handler.as_ref(),
            &outbound_tx,
            &mut outbound_rx,
            &mut retry,
            &mut shutdown,
        )
        .await
        {
            SessionEnd::Shutdown => break,
            SessionEnd::Disconnected => {
                info!("Disconnected from broker, reconnecting");
            }
        }
    }

    debug!("Transport stopped");
}

/// Runs one live connection until it drops or the transport shuts down.
#[allow(clippy::too_many_arguments)]
async fn connected(
    mut socket: WsClient,
    room: &str,
    role: Role,
    net: &config::Net,
    handler: &dyn Handler,
    outbound_tx: &Outbound,
    outbound_rx: &mut mpsc::UnboundedReceiver<Envelope>,
    retry: &mut VecDeque<Envelope>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    // Join first; everything queued flushes behind it.
    let join = Envelope::Join {
        room: room.to_string(),
        role,
    };
    if send_frame(&mut socket, &join).await.is_err() {
        return SessionEnd::Disconnected;
    }

    while let Some(envelope) = retry.pop_front() {
        if send_frame(&mut socket, &envelope).await.is_err() {
            retry.push_front(envelope);
            return SessionEnd::Disconnected;
        }
    }

    // The first tick fires a full interval from now, not immediately.
    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + net.heartbeat_interval(),
        net.heartbeat_interval(),
    );

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = socket.close(None).await;
                return SessionEnd::Shutdown;
            }
            _ = heartbeat.tick() => {
                // Fire-and-forget; the broker's own timeout governs
                // liveness, so a lost heartbeat is not queued for retry.
                if send_frame(&mut socket, &Envelope::Heartbeat).await.is_err() {
                    return SessionEnd::Disconnected;
                }
            }
            envelope = outbound_rx.recv() => match envelope {
                Some(envelope) => {
                    if send_frame(&mut socket, &envelope).await.is_err() {
                        retry.push_back(envelope);
                        return SessionEnd::Disconnected;
                    }
                }
                // All senders dropped; nothing more will ever be sent.
                None => {
                    let _ = socket.close(None).await;
                    return SessionEnd::Shutdown;
                }
            },
            frame = socket.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => dispatch(handler, outbound_tx, text.as_str()),
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => {
                    return SessionEnd::Disconnected;
                }
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn send_frame(
    socket: &mut WsClient,
    envelope: &Envelope,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    socket.send(WsMessage::Text(envelope.to_json().into())).await
}

/// Routes one inbound frame to the handler.
fn dispatch(handler: &dyn Handler, outbound: &Outbound, text: &str) {
    match Envelope::parse(text) {
        Some(Envelope::PadHit { pad, velocity }) => handler.on_pad_hit(pad, velocity),
        Some(Envelope::SyncState {
            tempo,
            pad_mappings,
        }) => handler.on_sync_state(tempo, pad_mappings),
        Some(Envelope::TempoChange { tempo }) => handler.on_tempo_change(tempo),
        Some(Envelope::RequestSync) => handler.on_request_sync(outbound),
        Some(Envelope::Pong) => {}
        Some(Envelope::Error { message }) => warn!(message, "Broker reported an error"),
        Some(other) => debug!(frame = ?other, "Ignoring unexpected frame from broker"),
        None => debug!("Ignoring malformed frame from broker"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use tokio::net::TcpListener;

    use super::*;
    use crate::broker::Broker;
    use crate::testutil::eventually_async;

    /// Records everything the transport dispatches.
    #[derive(Default)]
    struct RecordingHandler {
        pad_hits: Mutex<Vec<u8>>,
        sync_states: Mutex<Vec<u32>>,
        tempo_changes: Mutex<Vec<u32>>,
        request_syncs: AtomicUsize,
    }

    impl Handler for RecordingHandler {
        fn on_pad_hit(&self, pad: u8, _velocity: Option<u8>) {
            self.pad_hits.lock().expect("lock").push(pad);
        }

        fn on_sync_state(&self, tempo: u32, _pad_mappings: HashMap<u8, String>) {
            self.sync_states.lock().expect("lock").push(tempo);
        }

        fn on_tempo_change(&self, tempo: u32) {
            self.tempo_changes.lock().expect("lock").push(tempo);
        }

        fn on_request_sync(&self, _out: &Outbound) {
            self.request_syncs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_net() -> config::Net {
        // Aggressive timers so the tests run in milliseconds.
        config::Net::new(Some(100), Some(50), Some(200))
    }

    async fn start_broker() -> std::net::SocketAddr {
        let broker = Broker::new(config::Broker::new(Some(0), None));
        let (addr, _handle) = broker.bind().await.expect("broker binds");
        addr
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_join_triggers_request_sync_fan_out() {
        let addr = start_broker().await;
        let handler = Arc::new(RecordingHandler::default());

        // A controller join makes the broker publish request-sync to the
        // room, which comes right back to us.
        let transport = Transport::start(
            &format!("ws://{}/ws", addr),
            "jam",
            Role::Controller,
            fast_net(),
            handler.clone(),
        );

        eventually_async(
            || async { handler.request_syncs.load(Ordering::SeqCst) > 0 },
            "Never saw the join's request-sync",
        )
        .await;

        transport.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_frames_fan_out_between_transports() {
        let addr = start_broker().await;
        let url = format!("ws://{}/ws", addr);

        let renderer_handler = Arc::new(RecordingHandler::default());
        let renderer = Transport::start(
            &url,
            "jam",
            Role::Renderer,
            fast_net(),
            renderer_handler.clone(),
        );

        let controller_handler = Arc::new(RecordingHandler::default());
        let controller = Transport::start(
            &url,
            "jam",
            Role::Controller,
            fast_net(),
            controller_handler.clone(),
        );

        // Wait until both have joined (the controller join fans out
        // request-sync to everyone in the room).
        eventually_async(
            || async { renderer_handler.request_syncs.load(Ordering::SeqCst) > 0 },
            "Renderer never saw the controller join",
        )
        .await;

        controller.send(Envelope::PadHit {
            pad: 7,
            velocity: Some(90),
        });
        controller.send(Envelope::TempoChange { tempo: 150 });

        eventually_async(
            || async { renderer_handler.pad_hits.lock().expect("lock").as_slice() == [7] },
            "Renderer never saw the pad hit",
        )
        .await;
        eventually_async(
            || async {
                renderer_handler.tempo_changes.lock().expect("lock").as_slice() == [150]
            },
            "Renderer never saw the tempo change",
        )
        .await;
        // The sender receives its own frames back as confirmation.
        eventually_async(
            || async { controller_handler.pad_hits.lock().expect("lock").as_slice() == [7] },
            "Controller never saw its own pad hit",
        )
        .await;

        renderer.close().await;
        controller.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_queued_frames_flush_in_order_after_reconnect() {
        // Reserve a port, then leave it dark so the transport has to queue.
        let port = {
            let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
            listener.local_addr().expect("local addr").port()
        };
        let url = format!("ws://127.0.0.1:{}/ws", port);

        let sender_handler = Arc::new(RecordingHandler::default());
        // A wide backoff keeps the sender away from the broker long enough
        // for the observer below to be in the room before the flush.
        let sender = Transport::start(
            &url,
            "jam",
            Role::Controller,
            config::Net::new(Some(5_000), Some(1_000), Some(1_000)),
            sender_handler.clone(),
        );

        // Issued while the broker is down; all of these must queue.
        for pad in [3, 4, 5] {
            sender.send(Envelope::PadHit {
                pad,
                velocity: None,
            });
        }
        // Let the first connect attempt fail so the sender sits in backoff.
        tokio::time::sleep(Duration::from_millis(150)).await;

        // The broker comes back on the same port and a raw observer joins
        // the room, confirmed by a heartbeat round-trip.
        let broker = Broker::new(config::Broker::new(Some(port), None));
        let (_, _handle) = broker.bind().await.expect("broker rebinds");
        let (mut observer, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .expect("observer connects");
        observer
            .send(WsMessage::Text(
                Envelope::Join {
                    room: "jam".to_string(),
                    role: Role::Renderer,
                }
                .to_json()
                .into(),
            ))
            .await
            .expect("observer joins");
        observer
            .send(WsMessage::Text(Envelope::Heartbeat.to_json().into()))
            .await
            .expect("observer heartbeat");

        // The suffix arrives complete and in send order, after the sender's
        // automatic reconnect and join.
        let mut pads = Vec::new();
        while pads.len() < 3 {
            let frame = tokio::time::timeout(Duration::from_secs(5), observer.next())
                .await
                .expect("timed out waiting for queued pad hits")
                .expect("observer stream ended")
                .expect("observer socket error");
            if let WsMessage::Text(text) = frame {
                if let Some(Envelope::PadHit { pad, .. }) = Envelope::parse(text.as_str()) {
                    pads.push(pad);
                }
            }
        }
        assert_eq!(pads, [3, 4, 5]);

        sender.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_while_disconnected_completes() {
        let handler = Arc::new(RecordingHandler::default());
        let transport = Transport::start(
            "ws://127.0.0.1:9/ws",
            "jam",
            Role::Controller,
            fast_net(),
            handler,
        );

        // Nothing is listening on the discard port; close must still win
        // against the reconnect loop.
        tokio::time::sleep(Duration::from_millis(100)).await;
        tokio::time::timeout(Duration::from_secs(2), transport.close())
            .await
            .expect("close finished");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let max = Duration::from_secs(30);
        let mut delay = Duration::from_secs(1);

        delay = next_delay(delay, max);
        assert_eq!(delay, Duration::from_secs(2));
        delay = next_delay(delay, max);
        assert_eq!(delay, Duration::from_secs(4));
        for _ in 0..10 {
            delay = next_delay(delay, max);
        }
        assert_eq!(delay, max);
    }
}
