//! HTTP client for the ingest and read endpoints, shared by the
//! driver-side tracker and the subscriber-side watcher.

use crate::api::driver::{
    BusLocationResponse, EndTripRequest, EndTripResponse, LocationPayload, UpdateLocationRequest,
    UpdateLocationResponse,
};
use crate::api::ErrorResponse;
use crate::tracking::{LocationSample, TripStatus};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("request rejected ({status}): {message}")]
    Rejected {
        status: reqwest::StatusCode,
        message: String,
    },
}

#[derive(Clone)]
pub struct IngestClient {
    http: reqwest::Client,
    base_url: String,
}

impl IngestClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Post one position report. The returned acknowledgement carries the
    /// trip generation to echo on subsequent reports.
    pub async fn post_location(
        &self,
        sample: &LocationSample,
        trip_id: Option<&str>,
    ) -> Result<UpdateLocationResponse, ClientError> {
        let request = UpdateLocationRequest {
            driver_id: sample.driver_id.clone(),
            bus_number: sample.bus_number.clone(),
            location: LocationPayload {
                lat: sample.lat,
                lng: sample.lng,
                accuracy: sample.accuracy,
                speed: sample.speed,
                heading: sample.heading,
                recorded_at: Some(sample.recorded_at.clone()),
                source_kind: Some(sample.source_kind),
            },
            trip_status: TripStatus::Active,
            trip_id: trip_id.map(str::to_string),
        };

        let response = self
            .http
            .post(format!("{}/api/driver/update-location", self.base_url))
            .json(&request)
            .send()
            .await?;
        Self::parse(response).await
    }

    pub async fn end_trip(
        &self,
        bus_number: &str,
        driver_id: &str,
    ) -> Result<EndTripResponse, ClientError> {
        let response = self
            .http
            .post(format!("{}/api/driver/end-trip", self.base_url))
            .json(&EndTripRequest {
                driver_id: driver_id.to_string(),
                bus_number: bus_number.to_string(),
            })
            .send()
            .await?;
        Self::parse(response).await
    }

    /// Current location of a bus, used by subscribers for the initial
    /// paint before the first live event arrives.
    pub async fn fetch_location(&self, bus_number: &str) -> Result<BusLocationResponse, ClientError> {
        let response = self
            .http
            .get(format!(
                "{}/api/driver/bus-location/{}",
                self.base_url, bus_number
            ))
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let message = match response.json::<ErrorResponse>().await {
                Ok(body) => body.error,
                Err(_) => format!("HTTP {}", status),
            };
            Err(ClientError::Rejected { status, message })
        }
    }
}
