use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::DriverState;
use crate::api::error::{store_error, ErrorResponse};
use crate::tracking::{LocationSample, RoomEvent, SourceKind, StoredLocation, TripStatus};

/// Position payload inside an update request. `recorded_at` and
/// `source_kind` default to the arrival time and `device` when the client
/// omits them.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LocationPayload {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    /// When the reading was taken (RFC 3339)
    pub recorded_at: Option<String>,
    pub source_kind: Option<SourceKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateLocationRequest {
    pub driver_id: String,
    pub bus_number: String,
    pub location: LocationPayload,
    pub trip_status: TripStatus,
    /// Trip generation from a previous acknowledgement. Required once a
    /// trip is under way; reports tagged with an old generation are
    /// rejected.
    pub trip_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateLocationResponse {
    pub success: bool,
    pub message: Option<String>,
    /// Current trip generation; clients echo this on subsequent reports
    pub trip_id: Option<String>,
    pub location: Option<StoredLocation>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BusLocationResponse {
    pub success: bool,
    /// Present when the bus is on an active trip
    pub location: Option<StoredLocation>,
    /// Present when a trip has ended but a last position is still known
    pub last_known_location: Option<StoredLocation>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EndTripRequest {
    pub driver_id: String,
    pub bus_number: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EndTripResponse {
    pub success: bool,
    pub message: Option<String>,
}

/// Accept a position report from a driver client and relay it to the
/// bus room
#[utoipa::path(
    post,
    path = "/api/driver/update-location",
    request_body = UpdateLocationRequest,
    responses(
        (status = 200, description = "Report stored and relayed", body = UpdateLocationResponse),
        (status = 400, description = "Missing identifiers or out-of-range coordinates", body = ErrorResponse),
        (status = 409, description = "Stale trip generation or out-of-order sample", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "driver"
)]
pub async fn update_location(
    State(state): State<DriverState>,
    Json(request): Json<UpdateLocationRequest>,
) -> Result<Json<UpdateLocationResponse>, (StatusCode, Json<ErrorResponse>)> {
    validate_identifiers(&request.bus_number, &request.driver_id)?;

    let sample = LocationSample {
        bus_number: request.bus_number,
        driver_id: request.driver_id,
        lat: request.location.lat,
        lng: request.location.lng,
        accuracy: request.location.accuracy,
        speed: request.location.speed,
        heading: request.location.heading,
        recorded_at: request
            .location
            .recorded_at
            .unwrap_or_else(|| Utc::now().to_rfc3339()),
        source_kind: request.location.source_kind.unwrap_or(SourceKind::Device),
    };

    let stored = state
        .store
        .apply(sample, request.trip_status, request.trip_id)
        .await
        .map_err(store_error)?;

    // Broadcast is the server's responsibility: persisted state and
    // relayed state cannot diverge.
    let receivers = state
        .rooms
        .publish(
            &stored.sample.bus_number,
            RoomEvent::Location(stored.clone()),
        )
        .await;
    tracing::debug!(
        bus_number = %stored.sample.bus_number,
        seq = stored.seq,
        source_kind = stored.sample.source_kind.as_str(),
        receivers,
        "Stored location update"
    );

    Ok(Json(UpdateLocationResponse {
        success: true,
        message: None,
        trip_id: Some(stored.trip_id.clone()),
        location: Some(stored),
    }))
}

/// Current location of a bus, for the subscriber's initial paint
#[utoipa::path(
    get,
    path = "/api/driver/bus-location/{bus_number}",
    params(
        ("bus_number" = String, Path, description = "Bus identifier, e.g. B1")
    ),
    responses(
        (status = 200, description = "Current, last-known, or no location for the bus", body = BusLocationResponse)
    ),
    tag = "driver"
)]
pub async fn get_bus_location(
    State(state): State<DriverState>,
    Path(bus_number): Path<String>,
) -> Json<BusLocationResponse> {
    match state.store.current(&bus_number).await {
        Some(record) if record.active => Json(BusLocationResponse {
            success: true,
            location: Some(record),
            last_known_location: None,
            message: None,
        }),
        Some(record) => Json(BusLocationResponse {
            success: false,
            location: None,
            last_known_location: Some(record),
            message: Some(format!("Bus {} is not on an active trip", bus_number)),
        }),
        None => Json(BusLocationResponse {
            success: false,
            location: None,
            last_known_location: None,
            message: Some(format!(
                "No location has been reported for bus {}",
                bus_number
            )),
        }),
    }
}

/// End the active trip for a bus and notify room members
#[utoipa::path(
    post,
    path = "/api/driver/end-trip",
    request_body = EndTripRequest,
    responses(
        (status = 200, description = "Trip ended (idempotent)", body = EndTripResponse),
        (status = 400, description = "Missing identifiers", body = ErrorResponse),
        (status = 404, description = "Unknown bus", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "driver"
)]
pub async fn end_trip(
    State(state): State<DriverState>,
    Json(request): Json<EndTripRequest>,
) -> Result<Json<EndTripResponse>, (StatusCode, Json<ErrorResponse>)> {
    validate_identifiers(&request.bus_number, &request.driver_id)?;

    let outcome = state
        .store
        .end_trip(&request.bus_number, &request.driver_id)
        .await
        .map_err(store_error)?;

    if !outcome.already_ended {
        state
            .rooms
            .publish(&request.bus_number, RoomEvent::TripEnded(outcome.trip))
            .await;
        tracing::info!(bus_number = %request.bus_number, "Trip ended and room notified");
    }

    Ok(Json(EndTripResponse {
        success: true,
        message: outcome
            .already_ended
            .then(|| "Trip was already ended".to_string()),
    }))
}

fn validate_identifiers(
    bus_number: &str,
    driver_id: &str,
) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    if bus_number.trim().is_empty() || driver_id.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "bus_number and driver_id are required".to_string(),
            }),
        ));
    }
    Ok(())
}
