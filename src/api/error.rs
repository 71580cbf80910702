use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::tracking::StoreError;

/// Error payload returned by all endpoints on failure.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

pub fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, Json<ErrorResponse>) {
    tracing::error!(error = %err, "Internal server error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: format!("Internal error: {}", err),
        }),
    )
}

/// Map a store rejection to a response: validation problems are the
/// caller's fault, stale generations and samples are conflicts.
pub fn store_error(err: StoreError) -> (StatusCode, Json<ErrorResponse>) {
    if matches!(err, StoreError::Database(_)) {
        return internal_error(err);
    }
    let status = match err {
        StoreError::LatitudeRange(_)
        | StoreError::LongitudeRange(_)
        | StoreError::InvalidTimestamp(_) => StatusCode::BAD_REQUEST,
        StoreError::TripNotActive(_)
        | StoreError::StaleGeneration { .. }
        | StoreError::StaleSample(_) => StatusCode::CONFLICT,
        StoreError::UnknownBus(_) => StatusCode::NOT_FOUND,
        StoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}
