//! Keyed store for the single "current location" record per bus.
//!
//! The in-memory map is authoritative at runtime; every accepted write is
//! mirrored to SQLite so last-known locations survive a restart. Writes
//! carry a server-assigned monotonic sequence number and a trip generation
//! so stale or straggling reports are rejected instead of silently
//! overwriting newer state.

use chrono::{DateTime, FixedOffset, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::types::{LocationSample, StoredLocation, TripEnded, TripStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("latitude {0} out of range [-90, 90]")]
    LatitudeRange(f64),
    #[error("longitude {0} out of range [-180, 180]")]
    LongitudeRange(f64),
    #[error("invalid recorded_at timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("no active trip for bus {0}")]
    TripNotActive(String),
    #[error("trip generation {got} is not the current generation for bus {bus_number}")]
    StaleGeneration { bus_number: String, got: String },
    #[error("sample for bus {0} is older than the stored sample")]
    StaleSample(String),
    #[error("no location has ever been reported for bus {0}")]
    UnknownBus(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of an end-trip request. `already_ended` lets callers skip the
/// room broadcast when the call was an idempotent repeat.
#[derive(Debug, Clone)]
pub struct EndTripOutcome {
    pub trip: TripEnded,
    pub already_ended: bool,
}

/// Counts reported by the health endpoint.
#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    pub tracked_buses: usize,
    pub active_trips: usize,
}

#[derive(Debug, sqlx::FromRow)]
struct BusLocationRow {
    bus_number: String,
    driver_id: String,
    trip_id: String,
    seq: i64,
    active: i64,
    lat: f64,
    lng: f64,
    accuracy: Option<f64>,
    speed: Option<f64>,
    heading: Option<f64>,
    source_kind: String,
    recorded_at: String,
}

#[derive(Clone)]
pub struct LocationStore {
    pool: SqlitePool,
    buses: Arc<RwLock<HashMap<String, StoredLocation>>>,
}

impl LocationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            buses: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Load last-known locations from the database into memory.
    /// Trips that were active at shutdown are demoted to last-known; the
    /// driver client starts a fresh trip generation on its next report.
    pub async fn hydrate(&self) -> Result<(), StoreError> {
        let rows: Vec<BusLocationRow> = sqlx::query_as(
            "SELECT bus_number, driver_id, trip_id, seq, active, lat, lng, \
             accuracy, speed, heading, source_kind, recorded_at FROM bus_locations",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut buses = self.buses.write().await;
        for row in rows {
            let Some(source_kind) = super::types::SourceKind::parse(&row.source_kind) else {
                debug!(bus_number = %row.bus_number, source_kind = %row.source_kind, "Skipping row with unknown source kind");
                continue;
            };
            buses.insert(
                row.bus_number.clone(),
                StoredLocation {
                    sample: LocationSample {
                        bus_number: row.bus_number,
                        driver_id: row.driver_id,
                        lat: row.lat,
                        lng: row.lng,
                        accuracy: row.accuracy,
                        speed: row.speed,
                        heading: row.heading,
                        recorded_at: row.recorded_at,
                        source_kind,
                    },
                    trip_id: row.trip_id,
                    seq: row.seq,
                    active: false,
                },
            );
        }
        info!(buses = buses.len(), "Hydrated location store");
        Ok(())
    }

    /// Accept a position report and make it the current location for its
    /// bus. Starts a new trip generation when no trip is active and the
    /// report carries no generation tag; rejects reports tagged with a
    /// generation other than the current one, and reports older than the
    /// stored sample.
    pub async fn apply(
        &self,
        sample: LocationSample,
        trip_status: TripStatus,
        trip_id: Option<String>,
    ) -> Result<StoredLocation, StoreError> {
        if !(-90.0..=90.0).contains(&sample.lat) {
            return Err(StoreError::LatitudeRange(sample.lat));
        }
        if !(-180.0..=180.0).contains(&sample.lng) {
            return Err(StoreError::LongitudeRange(sample.lng));
        }
        let recorded_at = parse_timestamp(&sample.recorded_at)?;

        let mut buses = self.buses.write().await;
        let (stored, started) = match buses.get(&sample.bus_number) {
            Some(record) if record.active => {
                if let Some(ref id) = trip_id {
                    if *id != record.trip_id {
                        return Err(StoreError::StaleGeneration {
                            bus_number: sample.bus_number,
                            got: id.clone(),
                        });
                    }
                }
                if trip_status != TripStatus::Active {
                    return Err(StoreError::TripNotActive(sample.bus_number));
                }
                let stored_at = parse_timestamp(&record.sample.recorded_at)?;
                if recorded_at < stored_at {
                    return Err(StoreError::StaleSample(sample.bus_number));
                }
                let mut updated = record.clone();
                updated.seq += 1;
                updated.sample = sample;
                (updated, false)
            }
            _ => {
                // No active trip for this bus. A tagged report is a
                // straggler from an ended generation; an untagged active
                // report starts a fresh trip.
                if let Some(id) = trip_id {
                    return Err(StoreError::StaleGeneration {
                        bus_number: sample.bus_number,
                        got: id,
                    });
                }
                if trip_status != TripStatus::Active {
                    return Err(StoreError::TripNotActive(sample.bus_number));
                }
                let record = StoredLocation {
                    trip_id: Uuid::new_v4().to_string(),
                    seq: 1,
                    active: true,
                    sample,
                };
                (record, true)
            }
        };

        // Persist before touching the map: a failed write must never
        // become the location the read endpoint serves.
        self.persist(&stored).await?;
        if started {
            info!(
                bus_number = %stored.sample.bus_number,
                driver_id = %stored.sample.driver_id,
                trip_id = %stored.trip_id,
                "Started trip"
            );
        }
        buses.insert(stored.sample.bus_number.clone(), stored.clone());
        Ok(stored)
    }

    /// Mark the trip for a bus as ended. Idempotent: ending an
    /// already-ended trip reports `already_ended` instead of failing.
    pub async fn end_trip(
        &self,
        bus_number: &str,
        driver_id: &str,
    ) -> Result<EndTripOutcome, StoreError> {
        let mut buses = self.buses.write().await;
        let record = buses
            .get(bus_number)
            .ok_or_else(|| StoreError::UnknownBus(bus_number.to_string()))?;

        let already_ended = !record.active;
        let mut stored = record.clone();
        stored.active = false;

        if !already_ended {
            // Same ordering as `apply`: the map only changes once the row
            // is durably ended.
            self.persist(&stored).await?;
            info!(bus_number, driver_id, trip_id = %stored.trip_id, "Ended trip");
            buses.insert(bus_number.to_string(), stored.clone());
        }

        Ok(EndTripOutcome {
            trip: TripEnded {
                bus_number: bus_number.to_string(),
                driver_id: driver_id.to_string(),
                trip_id: stored.trip_id,
                ended_at: Utc::now().to_rfc3339(),
            },
            already_ended,
        })
    }

    /// The current stored record for a bus, if any.
    pub async fn current(&self, bus_number: &str) -> Option<StoredLocation> {
        self.buses.read().await.get(bus_number).cloned()
    }

    pub async fn stats(&self) -> StoreStats {
        let buses = self.buses.read().await;
        StoreStats {
            tracked_buses: buses.len(),
            active_trips: buses.values().filter(|r| r.active).count(),
        }
    }

    async fn persist(&self, record: &StoredLocation) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO bus_locations
                (bus_number, driver_id, trip_id, seq, active, lat, lng,
                 accuracy, speed, heading, source_kind, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bus_number) DO UPDATE SET
                driver_id = excluded.driver_id,
                trip_id = excluded.trip_id,
                seq = excluded.seq,
                active = excluded.active,
                lat = excluded.lat,
                lng = excluded.lng,
                accuracy = excluded.accuracy,
                speed = excluded.speed,
                heading = excluded.heading,
                source_kind = excluded.source_kind,
                recorded_at = excluded.recorded_at
            "#,
        )
        .bind(&record.sample.bus_number)
        .bind(&record.sample.driver_id)
        .bind(&record.trip_id)
        .bind(record.seq)
        .bind(i64::from(record.active))
        .bind(record.sample.lat)
        .bind(record.sample.lng)
        .bind(record.sample.accuracy)
        .bind(record.sample.speed)
        .bind(record.sample.heading)
        .bind(record.sample.source_kind.as_str())
        .bind(&record.sample.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<FixedOffset>, StoreError> {
    DateTime::parse_from_rfc3339(s).map_err(|_| StoreError::InvalidTimestamp(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::types::SourceKind;

    async fn test_store() -> LocationStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        LocationStore::new(pool)
    }

    fn sample(bus: &str, lat: f64, lng: f64, recorded_at: &str) -> LocationSample {
        LocationSample {
            bus_number: bus.to_string(),
            driver_id: "D1".to_string(),
            lat,
            lng,
            accuracy: Some(12.0),
            speed: None,
            heading: None,
            recorded_at: recorded_at.to_string(),
            source_kind: SourceKind::Device,
        }
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let store = test_store().await;
        store
            .apply(
                sample("B1", 22.97, 76.05, "2026-03-01T08:00:00Z"),
                TripStatus::Active,
                None,
            )
            .await
            .unwrap();
        store
            .apply(
                sample("B1", 22.98, 76.06, "2026-03-01T08:00:02Z"),
                TripStatus::Active,
                None,
            )
            .await
            .unwrap();

        let current = store.current("B1").await.unwrap();
        assert_eq!(current.sample.lat, 22.98);
        assert_eq!(current.sample.lng, 76.06);
        assert_eq!(current.seq, 2);
        assert!(current.active);
    }

    #[tokio::test]
    async fn test_seq_increments_per_accepted_write() {
        let store = test_store().await;
        for i in 0..5 {
            let ts = format!("2026-03-01T08:00:{:02}Z", i * 2);
            store
                .apply(sample("B1", 22.97, 76.05, &ts), TripStatus::Active, None)
                .await
                .unwrap();
        }
        assert_eq!(store.current("B1").await.unwrap().seq, 5);
    }

    #[tokio::test]
    async fn test_unknown_bus_has_no_record() {
        let store = test_store().await;
        assert!(store.current("B2").await.is_none());
    }

    #[tokio::test]
    async fn test_coordinate_range_rejected() {
        let store = test_store().await;
        let err = store
            .apply(
                sample("B1", 95.0, 76.05, "2026-03-01T08:00:00Z"),
                TripStatus::Active,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LatitudeRange(_)));

        let err = store
            .apply(
                sample("B1", 22.97, 190.0, "2026-03-01T08:00:00Z"),
                TripStatus::Active,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LongitudeRange(_)));
    }

    #[tokio::test]
    async fn test_out_of_order_sample_rejected() {
        let store = test_store().await;
        store
            .apply(
                sample("B1", 22.97, 76.05, "2026-03-01T08:00:10Z"),
                TripStatus::Active,
                None,
            )
            .await
            .unwrap();
        let err = store
            .apply(
                sample("B1", 22.90, 76.00, "2026-03-01T08:00:05Z"),
                TripStatus::Active,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StaleSample(_)));

        // Stored state is untouched
        let current = store.current("B1").await.unwrap();
        assert_eq!(current.sample.lat, 22.97);
        assert_eq!(current.seq, 1);
    }

    #[tokio::test]
    async fn test_straggler_after_end_trip_rejected() {
        let store = test_store().await;
        let stored = store
            .apply(
                sample("B1", 22.97, 76.05, "2026-03-01T08:00:00Z"),
                TripStatus::Active,
                None,
            )
            .await
            .unwrap();
        let trip_id = stored.trip_id;

        let outcome = store.end_trip("B1", "D1").await.unwrap();
        assert!(!outcome.already_ended);

        // A late report tagged with the ended generation must not
        // resurrect the location.
        let err = store
            .apply(
                sample("B1", 23.10, 76.20, "2026-03-01T08:05:00Z"),
                TripStatus::Active,
                Some(trip_id),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StaleGeneration { .. }));

        let current = store.current("B1").await.unwrap();
        assert_eq!(current.sample.lat, 22.97);
        assert!(!current.active);
    }

    #[tokio::test]
    async fn test_wrong_generation_during_active_trip_rejected() {
        let store = test_store().await;
        store
            .apply(
                sample("B1", 22.97, 76.05, "2026-03-01T08:00:00Z"),
                TripStatus::Active,
                None,
            )
            .await
            .unwrap();
        let err = store
            .apply(
                sample("B1", 22.98, 76.06, "2026-03-01T08:00:02Z"),
                TripStatus::Active,
                Some("not-the-current-generation".to_string()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StaleGeneration { .. }));
    }

    #[tokio::test]
    async fn test_new_trip_gets_fresh_generation() {
        let store = test_store().await;
        let first = store
            .apply(
                sample("B1", 22.97, 76.05, "2026-03-01T08:00:00Z"),
                TripStatus::Active,
                None,
            )
            .await
            .unwrap();
        store.end_trip("B1", "D1").await.unwrap();

        let second = store
            .apply(
                sample("B1", 22.99, 76.07, "2026-03-01T09:00:00Z"),
                TripStatus::Active,
                None,
            )
            .await
            .unwrap();
        assert_ne!(first.trip_id, second.trip_id);
        assert_eq!(second.seq, 1);
        assert!(second.active);
    }

    #[tokio::test]
    async fn test_end_trip_idempotent() {
        let store = test_store().await;
        store
            .apply(
                sample("B1", 22.97, 76.05, "2026-03-01T08:00:00Z"),
                TripStatus::Active,
                None,
            )
            .await
            .unwrap();

        let first = store.end_trip("B1", "D1").await.unwrap();
        let second = store.end_trip("B1", "D1").await.unwrap();
        assert!(!first.already_ended);
        assert!(second.already_ended);
        assert_eq!(first.trip.trip_id, second.trip.trip_id);
    }

    #[tokio::test]
    async fn test_end_trip_unknown_bus() {
        let store = test_store().await;
        let err = store.end_trip("B9", "D1").await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownBus(_)));
    }

    #[tokio::test]
    async fn test_invalid_timestamp_rejected() {
        let store = test_store().await;
        let err = store
            .apply(
                sample("B1", 22.97, 76.05, "yesterday"),
                TripStatus::Active,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTimestamp(_)));
    }

    #[tokio::test]
    async fn test_failed_write_does_not_become_current() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let store = LocationStore::new(pool.clone());
        pool.close().await;

        let err = store
            .apply(
                sample("B1", 22.97, 76.05, "2026-03-01T08:00:00Z"),
                TripStatus::Active,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));

        // The rejected write must not be served as the current location.
        assert!(store.current("B1").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_location() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let store = LocationStore::new(pool.clone());
        store
            .apply(
                sample("B1", 22.97, 76.05, "2026-03-01T08:00:00Z"),
                TripStatus::Active,
                None,
            )
            .await
            .unwrap();

        pool.close().await;
        let err = store
            .apply(
                sample("B1", 22.98, 76.06, "2026-03-01T08:00:02Z"),
                TripStatus::Active,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));

        let current = store.current("B1").await.unwrap();
        assert_eq!(current.sample.lat, 22.97);
        assert_eq!(current.seq, 1);
    }

    #[tokio::test]
    async fn test_failed_end_trip_leaves_trip_active() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let store = LocationStore::new(pool.clone());
        store
            .apply(
                sample("B1", 22.97, 76.05, "2026-03-01T08:00:00Z"),
                TripStatus::Active,
                None,
            )
            .await
            .unwrap();

        pool.close().await;
        let err = store.end_trip("B1", "D1").await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
        assert!(store.current("B1").await.unwrap().active);
    }

    #[tokio::test]
    async fn test_hydrate_restores_last_known_as_inactive() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let store = LocationStore::new(pool.clone());
        store
            .apply(
                sample("B1", 22.97, 76.05, "2026-03-01T08:00:00Z"),
                TripStatus::Active,
                None,
            )
            .await
            .unwrap();

        // A fresh store over the same pool sees the row as last-known only.
        let restarted = LocationStore::new(pool);
        restarted.hydrate().await.unwrap();
        let current = restarted.current("B1").await.unwrap();
        assert_eq!(current.sample.lat, 22.97);
        assert!(!current.active);
    }

    #[tokio::test]
    async fn test_stats_counts() {
        let store = test_store().await;
        store
            .apply(
                sample("B1", 22.97, 76.05, "2026-03-01T08:00:00Z"),
                TripStatus::Active,
                None,
            )
            .await
            .unwrap();
        store
            .apply(
                sample("B2", 22.90, 76.00, "2026-03-01T08:00:00Z"),
                TripStatus::Active,
                None,
            )
            .await
            .unwrap();
        store.end_trip("B2", "D1").await.unwrap();

        let stats = store.stats().await;
        assert_eq!(stats.tracked_buses, 2);
        assert_eq!(stats.active_trips, 1);
    }
}
