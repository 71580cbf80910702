//! Per-bus broadcast rooms.
//!
//! A room is a `tokio::sync::broadcast` channel keyed by bus number.
//! Rooms exist only while sockets are subscribed: they are created on
//! first join and pruned once the last receiver is gone. There is no
//! replay — a subscriber that joins late or reconnects re-fetches current
//! state through the read endpoint instead.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::types::{StoredLocation, TripEnded};

/// Event relayed to all members of a bus room.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    Location(StoredLocation),
    TripEnded(TripEnded),
}

#[derive(Clone)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<String, broadcast::Sender<RoomEvent>>>>,
    capacity: usize,
}

impl RoomRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Subscribe to the room for a bus, creating it if necessary.
    pub async fn join(&self, bus_number: &str) -> broadcast::Receiver<RoomEvent> {
        let mut rooms = self.rooms.write().await;
        match rooms.get(bus_number) {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(self.capacity);
                debug!(bus_number, "Created room");
                rooms.insert(bus_number.to_string(), tx);
                rx
            }
        }
    }

    /// Relay an event to all members of a bus room. Returns the number of
    /// receivers the event was delivered to; zero when the room does not
    /// exist or nobody is listening.
    pub async fn publish(&self, bus_number: &str, event: RoomEvent) -> usize {
        let rooms = self.rooms.read().await;
        match rooms.get(bus_number) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop the room for a bus if it no longer has any receivers.
    /// Called by socket handlers after a member disconnects.
    pub async fn prune(&self, bus_number: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(tx) = rooms.get(bus_number) {
            if tx.receiver_count() == 0 {
                rooms.remove(bus_number);
                debug!(bus_number, "Pruned empty room");
            }
        }
    }

    pub async fn open_rooms(&self) -> usize {
        self.rooms.read().await.len()
    }
}
