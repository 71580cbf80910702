//! Live tracking core: the current-location store and the per-bus
//! broadcast rooms.

mod rooms;
mod store;
mod types;

pub use rooms::{RoomEvent, RoomRegistry};
pub use store::{EndTripOutcome, LocationStore, StoreError, StoreStats};
pub use types::{LocationSample, SourceKind, StoredLocation, TripEnded, TripStatus};
