mod location;

pub use location::*;

use axum::{
    routing::{get, post},
    Router,
};

use crate::tracking::{LocationStore, RoomRegistry};

#[derive(Clone)]
pub struct DriverState {
    pub store: LocationStore,
    pub rooms: RoomRegistry,
}

pub fn router(store: LocationStore, rooms: RoomRegistry) -> Router {
    let state = DriverState { store, rooms };
    Router::new()
        .route("/update-location", post(update_location))
        .route("/bus-location/{bus_number}", get(get_bus_location))
        .route("/end-trip", post(end_trip))
        .with_state(state)
}
