//! Subscriber-side tracking state machine.
//!
//! One `BusWatcher` per tracked bus. It starts from an initial fetch of
//! the stored location and is then driven by relayed room events; the
//! most recently arrived event always wins. UI rendering is out of scope:
//! the watcher holds the marker data and the connection-health state a
//! display would bind to.

use tokio::sync::broadcast;
use tracing::debug;

use crate::api::driver::BusLocationResponse;
use crate::client::{ClientError, IngestClient};
use crate::tracking::{RoomEvent, StoredLocation};

/// Connection/display state for one tracked bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    /// Initial fetch and room join are under way
    Connecting,
    /// Room joined, initial fetch not yet resolved
    Connected,
    /// Transport failure; waiting for a manual retry
    Error,
    /// A live location is being displayed
    Active,
    /// No location has ever been reported for this bus
    Inactive,
    /// Only a last-known location from an ended trip is available
    Outdated,
    /// The trip concluded; terminal for this viewing session
    TripEnded,
}

/// What the initial `GET bus-location` produced.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Live(StoredLocation),
    LastKnown(StoredLocation),
    None,
}

impl From<BusLocationResponse> for FetchOutcome {
    fn from(response: BusLocationResponse) -> Self {
        if let Some(location) = response.location {
            FetchOutcome::Live(location)
        } else if let Some(last_known) = response.last_known_location {
            FetchOutcome::LastKnown(last_known)
        } else {
            FetchOutcome::None
        }
    }
}

pub struct BusWatcher {
    bus_number: String,
    state: TrackingState,
    marker: Option<StoredLocation>,
}

impl BusWatcher {
    pub fn new(bus_number: &str) -> Self {
        Self {
            bus_number: bus_number.to_string(),
            state: TrackingState::Connecting,
            marker: None,
        }
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    /// The location the display marker currently points at.
    pub fn marker(&self) -> Option<&StoredLocation> {
        self.marker.as_ref()
    }

    pub fn bus_number(&self) -> &str {
        &self.bus_number
    }

    /// The room join succeeded before the initial fetch resolved.
    pub fn on_joined(&mut self) {
        if self.state == TrackingState::Connecting {
            self.state = TrackingState::Connected;
        }
    }

    /// Resolve the initial fetch. Ignored when a live event already
    /// superseded it or the session is over.
    pub fn on_initial_fetch(&mut self, outcome: FetchOutcome) {
        if !matches!(
            self.state,
            TrackingState::Connecting | TrackingState::Connected
        ) {
            return;
        }
        match outcome {
            FetchOutcome::Live(location) => {
                self.marker = Some(location);
                self.state = TrackingState::Active;
            }
            FetchOutcome::LastKnown(location) => {
                self.marker = Some(location);
                self.state = TrackingState::Outdated;
            }
            FetchOutcome::None => {
                self.state = TrackingState::Inactive;
            }
        }
    }

    /// Apply a relayed room event. Any live location supersedes whatever
    /// was displayed before; a trip-ended signal is terminal.
    pub fn on_event(&mut self, event: &RoomEvent) {
        if self.state == TrackingState::TripEnded {
            return;
        }
        match event {
            RoomEvent::Location(location) => {
                self.marker = Some(location.clone());
                self.state = TrackingState::Active;
            }
            RoomEvent::TripEnded(trip) => {
                debug!(bus_number = %trip.bus_number, "Trip ended, viewing session over");
                self.state = TrackingState::TripEnded;
            }
        }
    }

    /// The transport dropped. The last marker is kept so the display can
    /// keep showing it greyed out.
    pub fn on_transport_error(&mut self) {
        if self.state != TrackingState::TripEnded {
            self.state = TrackingState::Error;
        }
    }

    /// Manual retry: back to connecting so the fetch and join run again.
    pub fn retry(&mut self) {
        if self.state == TrackingState::Error {
            self.state = TrackingState::Connecting;
        }
    }
}

/// Run the initial fetch for a watcher against the read endpoint.
pub async fn initial_fetch(
    client: &IngestClient,
    watcher: &mut BusWatcher,
) -> Result<(), ClientError> {
    match client.fetch_location(watcher.bus_number()).await {
        Ok(response) => {
            watcher.on_initial_fetch(response.into());
            Ok(())
        }
        Err(err) => {
            watcher.on_transport_error();
            Err(err)
        }
    }
}

/// Drive a watcher from a room subscription until the trip ends or the
/// room closes. Lagged receivers skip ahead; missed events are not
/// redelivered.
pub async fn drive(watcher: &mut BusWatcher, rx: &mut broadcast::Receiver<RoomEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                watcher.on_event(&event);
                if watcher.state() == TrackingState::TripEnded {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => {
                watcher.on_transport_error();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::{LocationSample, RoomRegistry, SourceKind, TripEnded};

    fn stored(lat: f64, active: bool) -> StoredLocation {
        StoredLocation {
            sample: LocationSample {
                bus_number: "B1".to_string(),
                driver_id: "D1".to_string(),
                lat,
                lng: 76.05,
                accuracy: None,
                speed: None,
                heading: None,
                recorded_at: "2026-03-01T08:00:00Z".to_string(),
                source_kind: SourceKind::Device,
            },
            trip_id: "t".to_string(),
            seq: 1,
            active,
        }
    }

    fn trip_ended() -> RoomEvent {
        RoomEvent::TripEnded(TripEnded {
            bus_number: "B1".to_string(),
            driver_id: "D1".to_string(),
            trip_id: "t".to_string(),
            ended_at: "2026-03-01T09:00:00Z".to_string(),
        })
    }

    #[test]
    fn test_initial_fetch_outcomes() {
        let mut watcher = BusWatcher::new("B1");
        assert_eq!(watcher.state(), TrackingState::Connecting);
        watcher.on_initial_fetch(FetchOutcome::Live(stored(22.97, true)));
        assert_eq!(watcher.state(), TrackingState::Active);
        assert_eq!(watcher.marker().unwrap().sample.lat, 22.97);

        let mut watcher = BusWatcher::new("B1");
        watcher.on_initial_fetch(FetchOutcome::LastKnown(stored(22.90, false)));
        assert_eq!(watcher.state(), TrackingState::Outdated);

        let mut watcher = BusWatcher::new("B1");
        watcher.on_initial_fetch(FetchOutcome::None);
        assert_eq!(watcher.state(), TrackingState::Inactive);
        assert!(watcher.marker().is_none());
    }

    #[test]
    fn test_live_event_supersedes_any_prior_state() {
        for outcome in [
            FetchOutcome::None,
            FetchOutcome::LastKnown(stored(22.90, false)),
        ] {
            let mut watcher = BusWatcher::new("B1");
            watcher.on_initial_fetch(outcome);
            watcher.on_event(&RoomEvent::Location(stored(22.98, true)));
            assert_eq!(watcher.state(), TrackingState::Active);
            assert_eq!(watcher.marker().unwrap().sample.lat, 22.98);
        }
    }

    #[test]
    fn test_most_recently_arrived_event_wins() {
        let mut watcher = BusWatcher::new("B1");
        watcher.on_event(&RoomEvent::Location(stored(22.97, true)));
        watcher.on_event(&RoomEvent::Location(stored(22.99, true)));
        assert_eq!(watcher.marker().unwrap().sample.lat, 22.99);
    }

    #[test]
    fn test_trip_ended_is_terminal() {
        let mut watcher = BusWatcher::new("B1");
        watcher.on_event(&RoomEvent::Location(stored(22.97, true)));
        watcher.on_event(&trip_ended());
        assert_eq!(watcher.state(), TrackingState::TripEnded);

        // Nothing moves the session out of trip_ended.
        watcher.on_event(&RoomEvent::Location(stored(23.00, true)));
        assert_eq!(watcher.state(), TrackingState::TripEnded);
        watcher.on_transport_error();
        assert_eq!(watcher.state(), TrackingState::TripEnded);

        // The marker still shows where the bus last was.
        assert_eq!(watcher.marker().unwrap().sample.lat, 22.97);
    }

    #[test]
    fn test_error_and_manual_retry() {
        let mut watcher = BusWatcher::new("B1");
        watcher.on_initial_fetch(FetchOutcome::Live(stored(22.97, true)));
        watcher.on_transport_error();
        assert_eq!(watcher.state(), TrackingState::Error);
        // Marker survives the outage.
        assert!(watcher.marker().is_some());

        watcher.retry();
        assert_eq!(watcher.state(), TrackingState::Connecting);
        watcher.on_joined();
        assert_eq!(watcher.state(), TrackingState::Connected);
        watcher.on_initial_fetch(FetchOutcome::Live(stored(22.99, true)));
        assert_eq!(watcher.state(), TrackingState::Active);
    }

    #[test]
    fn test_stale_fetch_result_does_not_downgrade_live_display() {
        let mut watcher = BusWatcher::new("B1");
        // A live event arrives before the initial fetch resolves.
        watcher.on_event(&RoomEvent::Location(stored(22.98, true)));
        watcher.on_initial_fetch(FetchOutcome::None);
        assert_eq!(watcher.state(), TrackingState::Active);
        assert_eq!(watcher.marker().unwrap().sample.lat, 22.98);
    }

    #[tokio::test]
    async fn test_drive_reaches_trip_ended_from_room() {
        let rooms = RoomRegistry::new(16);
        let mut rx = rooms.join("B1").await;
        let mut watcher = BusWatcher::new("B1");
        watcher.on_initial_fetch(FetchOutcome::None);

        let publisher = {
            let rooms = rooms.clone();
            tokio::spawn(async move {
                rooms
                    .publish("B1", RoomEvent::Location(stored(22.97, true)))
                    .await;
                rooms.publish("B1", trip_ended()).await;
            })
        };

        drive(&mut watcher, &mut rx).await;
        publisher.await.unwrap();
        assert_eq!(watcher.state(), TrackingState::TripEnded);
        assert_eq!(watcher.marker().unwrap().sample.lat, 22.97);
    }
}
