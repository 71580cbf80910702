use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::tracking::{LocationStore, RoomRegistry};

#[derive(Clone)]
pub struct HealthState {
    pub store: LocationStore,
    pub rooms: RoomRegistry,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Whether the service is running
    pub healthy: bool,
    /// Number of buses with a stored location (active or last-known)
    pub tracked_buses: usize,
    /// Number of buses currently on an active trip
    pub active_trips: usize,
    /// Number of open tracking rooms
    pub open_rooms: usize,
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service health status", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<HealthState>) -> Json<HealthResponse> {
    let stats = state.store.stats().await;
    Json(HealthResponse {
        healthy: true,
        tracked_buses: stats.tracked_buses,
        active_trips: stats.active_trips,
        open_rooms: state.rooms.open_rooms().await,
    })
}

pub fn router(store: LocationStore, rooms: RoomRegistry) -> Router {
    let state = HealthState { store, rooms };
    Router::new()
        .route("/", get(health_check))
        .with_state(state)
}
