//! Type definitions for the tracking module.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Where a position reading came from.
///
/// Kept explicit on every sample so consumers (and tests) can tell real
/// GPS data apart from the synthetic fallback generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Device,
    Synthetic,
    Manual,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Device => "device",
            SourceKind::Synthetic => "synthetic",
            SourceKind::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "device" => Some(SourceKind::Device),
            "synthetic" => Some(SourceKind::Synthetic),
            "manual" => Some(SourceKind::Manual),
            _ => None,
        }
    }
}

/// Trip lifecycle state as reported by the driver client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TripStatus {
    Idle,
    Active,
    Ended,
}

/// A single position reading with metadata. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LocationSample {
    pub bus_number: String,
    pub driver_id: String,
    /// Latitude in degrees, [-90, 90]
    pub lat: f64,
    /// Longitude in degrees, [-180, 180]
    pub lng: f64,
    /// Reported accuracy in meters, if the source provides one
    pub accuracy: Option<f64>,
    /// Speed in m/s
    pub speed: Option<f64>,
    /// Heading in degrees from north
    pub heading: Option<f64>,
    /// When the reading was taken (RFC 3339)
    pub recorded_at: String,
    pub source_kind: SourceKind,
}

/// The current stored record for a bus: the latest accepted sample plus
/// the bookkeeping that lets stale writes be detected and rejected.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredLocation {
    pub sample: LocationSample,
    /// Server-assigned trip generation. Writes tagged with any other
    /// generation are rejected.
    pub trip_id: String,
    /// Monotonic per-bus write counter, incremented on every accepted write
    pub seq: i64,
    /// Whether the trip this sample belongs to is still active
    pub active: bool,
}

/// Broadcast payload sent to room members when a trip concludes.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TripEnded {
    pub bus_number: String,
    pub driver_id: String,
    pub trip_id: String,
    /// When the trip was ended (RFC 3339)
    pub ended_at: String,
}
