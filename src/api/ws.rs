use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::tracking::{LocationStore, RoomEvent, RoomRegistry, StoredLocation, TripEnded};

#[derive(Clone)]
pub struct WsState {
    pub store: LocationStore,
    pub rooms: RoomRegistry,
}

/// Who is joining a room. Recorded for logging; authorization is the
/// session subsystem's concern and happens before the socket reaches us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    Student,
    Admin,
    Driver,
}

/// Client subscription message
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
enum ClientMessage {
    /// Join the room for a bus; switches rooms when already joined
    Join {
        bus_number: String,
        role: ClientRole,
    },
}

/// Server message sent to clients
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
enum ServerMessage {
    /// Initial connection acknowledgment
    Connected { message: String },
    /// Current or relayed location for the joined bus
    BusLocationUpdate { location: StoredLocation },
    /// The trip for the joined bus has concluded
    TripEnded { trip: TripEnded },
    /// Error message
    Error { message: String },
}

/// WebSocket endpoint for live bus tracking
pub async fn ws_track(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();

    // All outbound frames funnel through one channel; the room loop that
    // produces them never touches the socket directly.
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(32);
    let pump = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let (join_tx, join_rx) = mpsc::channel::<String>(16);
    let room_task = tokio::spawn(room_loop(state, join_rx, out_tx));

    // Handle incoming messages from the client
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Join { bus_number, role }) => {
                    tracing::debug!(%bus_number, ?role, "Join requested");
                    if join_tx.send(bus_number).await.is_err() {
                        break;
                    }
                }
                Err(_) => {
                    tracing::debug!("Ignoring unparseable client message");
                }
            },
            Ok(Message::Ping(_)) => {
                // Axum handles pong automatically
            }
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    // Closing the join channel ends the room loop, which unsubscribes and
    // prunes its room on the way out.
    drop(join_tx);
    let _ = room_task.await;
    let _ = pump.await;
}

/// Core of the socket handler: reacts to join requests and relays events
/// from the joined room, writing outbound frames to `out`. Runs until the
/// join channel closes or the outbound side goes away, then drops its
/// subscription and prunes the room it was in.
async fn room_loop(state: WsState, mut join_rx: mpsc::Receiver<String>, out: mpsc::Sender<Message>) {
    let mut room_rx: Option<broadcast::Receiver<RoomEvent>> = None;
    let mut joined: Option<String> = None;

    let connected = ServerMessage::Connected {
        message: "Connected to bus tracking. Send a join message with a bus_number.".to_string(),
    };
    if !send_message(&out, &connected).await {
        return;
    }

    loop {
        tokio::select! {
            // Handle room joins (and switches)
            maybe_join = join_rx.recv() => {
                let Some(bus_number) = maybe_join else { break };
                if bus_number.trim().is_empty() {
                    let msg = ServerMessage::Error {
                        message: "bus_number is required to join".to_string(),
                    };
                    if !send_message(&out, &msg).await {
                        break;
                    }
                    continue;
                }
                // Reassigning drops the previous subscription, so the old
                // room can be pruned if this socket was its last member.
                room_rx = Some(state.rooms.join(&bus_number).await);
                if let Some(prev) = joined.replace(bus_number.clone()) {
                    if prev != bus_number {
                        state.rooms.prune(&prev).await;
                    }
                }
                tracing::debug!(%bus_number, "Socket joined room");

                // Snapshot the current location so a late joiner sees
                // the most recent state without waiting for the next
                // live report.
                if let Some(record) = state.store.current(&bus_number).await {
                    let msg = ServerMessage::BusLocationUpdate { location: record };
                    if !send_message(&out, &msg).await {
                        break;
                    }
                }
            }
            // Relay room events
            result = recv_event(&mut room_rx) => {
                match result {
                    Ok(event) => {
                        let msg = match event {
                            RoomEvent::Location(location) => {
                                ServerMessage::BusLocationUpdate { location }
                            }
                            RoomEvent::TripEnded(trip) => ServerMessage::TripEnded { trip },
                        };
                        if !send_message(&out, &msg).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        room_rx = None;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Socket lagged behind room events");
                    }
                }
            }
        }
    }

    drop(room_rx);
    if let Some(bus_number) = joined {
        state.rooms.prune(&bus_number).await;
    }
}

/// Serialize and enqueue one outbound frame. Returns false once the
/// outbound side is gone.
async fn send_message(out: &mpsc::Sender<Message>, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => out.send(Message::Text(json.into())).await.is_ok(),
        Err(_) => true,
    }
}

/// Await the next room event, or park forever when no room is joined yet.
async fn recv_event(
    rx: &mut Option<broadcast::Receiver<RoomEvent>>,
) -> Result<RoomEvent, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
