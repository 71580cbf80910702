pub mod driver;
pub mod error;
pub mod health;
pub mod ws;

pub use error::{internal_error, ErrorResponse};

use axum::{routing::get, Router};

use crate::tracking::{LocationStore, RoomRegistry};

pub fn router(store: LocationStore, rooms: RoomRegistry) -> Router {
    let ws_state = ws::WsState {
        store: store.clone(),
        rooms: rooms.clone(),
    };

    Router::new()
        .nest("/driver", driver::router(store.clone(), rooms.clone()))
        .nest("/health", health::router(store, rooms))
        .route("/ws/track", get(ws::ws_track).with_state(ws_state))
}
