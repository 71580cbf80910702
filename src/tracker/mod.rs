//! Driver-side position source: a sampling loop that produces
//! LocationSamples from a device fix channel, falling back to the
//! synthetic generator when no usable fix can be acquired, and a
//! forwarder that posts accepted samples to the ingest endpoint.

mod synthetic;

pub use synthetic::SyntheticWalk;

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::IngestClient;
use crate::config::TrackingConfig;
use crate::tracking::{LocationSample, SourceKind};

/// A raw position reading from the device layer, before it becomes a
/// LocationSample.
#[derive(Debug, Clone)]
pub struct Fix {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

impl Fix {
    fn into_sample(self, bus_number: &str, driver_id: &str, source_kind: SourceKind) -> LocationSample {
        LocationSample {
            bus_number: bus_number.to_string(),
            driver_id: driver_id.to_string(),
            lat: self.lat,
            lng: self.lng,
            accuracy: self.accuracy,
            speed: self.speed,
            heading: self.heading,
            recorded_at: self.recorded_at.to_rfc3339(),
            source_kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    Device,
    Synthetic,
}

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Time between samples
    pub interval: Duration,
    /// Device fixes with worse reported accuracy are dropped
    pub accuracy_ceiling_m: f64,
    /// How long to wait for a device fix before giving up on the device
    pub device_timeout: Duration,
    /// Device fixes older than this are discarded as stale
    pub max_staleness: Duration,
    /// Where the synthetic walk starts
    pub reference_point: (f64, f64),
    /// Maximum per-axis synthetic step, in degrees
    pub jitter_degrees: f64,
    /// Seed for the synthetic walk; None seeds from entropy
    pub synthetic_seed: Option<u64>,
}

impl SamplerConfig {
    pub fn from_config(cfg: &TrackingConfig) -> Self {
        Self {
            interval: Duration::from_secs(cfg.sample_interval_secs),
            accuracy_ceiling_m: cfg.accuracy_ceiling_m,
            device_timeout: Duration::from_secs(cfg.device_timeout_secs),
            max_staleness: Duration::from_secs(cfg.max_staleness_secs),
            reference_point: (cfg.reference_point.lat, cfg.reference_point.lng),
            jitter_degrees: cfg.jitter_degrees,
            synthetic_seed: None,
        }
    }
}

/// The sampling loop for one trip. Samples are pushed into `out`; the
/// forwarder on the other end posts them to the server.
pub struct Sampler {
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Sampler {
    /// Start sampling. In device mode `device_rx` supplies raw fixes from
    /// the platform's positioning layer; when it is absent, times out, or
    /// closes, the sampler falls back to the synthetic generator for the
    /// rest of the trip rather than failing.
    pub fn start(
        config: SamplerConfig,
        mode: SamplingMode,
        bus_number: String,
        driver_id: String,
        mut device_rx: Option<mpsc::Receiver<Fix>>,
        out: mpsc::Sender<LocationSample>,
    ) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut walk = SyntheticWalk::new(
                config.reference_point.0,
                config.reference_point.1,
                config.jitter_degrees,
                config.synthetic_seed,
            );

            let mut mode = match (mode, device_rx.is_some()) {
                (SamplingMode::Device, true) => SamplingMode::Device,
                (SamplingMode::Device, false) => {
                    warn!(bus_number = %bus_number, "No device fix source available, sampling synthetically");
                    SamplingMode::Synthetic
                }
                (SamplingMode::Synthetic, _) => SamplingMode::Synthetic,
            };
            info!(bus_number = %bus_number, ?mode, "Sampling started");

            let mut interval = tokio::time::interval(config.interval);
            // Fix acquisition can outlast the interval (the device timeout
            // is several ticks long); skip the ticks that pile up behind it
            // instead of emitting a burst once acquisition returns.
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => {}
                }

                let acquired = match mode {
                    SamplingMode::Device => match device_rx.as_mut() {
                        Some(rx) => {
                            acquire_device_fix(rx, config.device_timeout, config.max_staleness)
                                .await
                                .map(|fix| (fix, SourceKind::Device))
                        }
                        None => None,
                    },
                    SamplingMode::Synthetic => Some((walk.step(), SourceKind::Synthetic)),
                };
                let (fix, source_kind) = match acquired {
                    Some(pair) => pair,
                    None => {
                        warn!(
                            bus_number = %bus_number,
                            "Fix acquisition failed, falling back to synthetic sampling"
                        );
                        mode = SamplingMode::Synthetic;
                        (walk.step(), SourceKind::Synthetic)
                    }
                };

                // Wildly inaccurate device fixes would jump the marker
                // around; drop them. Everything else is forwarded so the
                // display stays live even when precision is poor.
                if source_kind == SourceKind::Device {
                    if let Some(accuracy) = fix.accuracy {
                        if accuracy > config.accuracy_ceiling_m {
                            debug!(bus_number = %bus_number, accuracy, "Dropping low-accuracy fix");
                            continue;
                        }
                    }
                }

                let sample = fix.into_sample(&bus_number, &driver_id, source_kind);
                if out.send(sample).await.is_err() {
                    break;
                }
            }
            info!(bus_number = %bus_number, "Sampling stopped");
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Stop the sampling loop. Idempotent: calling it again is a no-op.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.stop_tx.send(true);
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

/// Wait for a fresh device fix, discarding stale ones, until the
/// acquisition timeout expires. `None` means the device produced nothing
/// usable in time.
async fn acquire_device_fix(
    rx: &mut mpsc::Receiver<Fix>,
    timeout: Duration,
    max_staleness: Duration,
) -> Option<Fix> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(fix)) => {
                let age = (Utc::now() - fix.recorded_at).to_std().unwrap_or_default();
                if age <= max_staleness {
                    return Some(fix);
                }
                debug!(age_secs = age.as_secs(), "Discarding stale fix");
            }
            Ok(None) | Err(_) => return None,
        }
    }
}

/// Connection state of the ingest link, surfaced to whatever hosts the
/// tracker (status indicator on the driver's screen).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Idle,
    Active { trip_id: String },
    Error { message: String },
    Ended,
}

/// Consume samples and post them to the ingest endpoint. Remembers the
/// trip generation from the first acknowledgement and echoes it on every
/// later report. When the sample channel closes the trip is ended exactly
/// once.
pub async fn forward_samples(
    client: IngestClient,
    mut rx: mpsc::Receiver<LocationSample>,
    status_tx: watch::Sender<LinkStatus>,
) {
    let mut trip_id: Option<String> = None;
    let mut identity: Option<(String, String)> = None;

    while let Some(sample) = rx.recv().await {
        identity = Some((sample.bus_number.clone(), sample.driver_id.clone()));
        match client.post_location(&sample, trip_id.as_deref()).await {
            Ok(ack) => {
                if let Some(id) = ack.trip_id {
                    let _ = status_tx.send(LinkStatus::Active {
                        trip_id: id.clone(),
                    });
                    trip_id = Some(id);
                }
            }
            Err(err) => {
                warn!(error = %err, "Failed to post location");
                let _ = status_tx.send(LinkStatus::Error {
                    message: err.to_string(),
                });
            }
        }
    }

    if let Some((bus_number, driver_id)) = identity {
        match client.end_trip(&bus_number, &driver_id).await {
            Ok(_) => info!(bus_number = %bus_number, "Trip ended"),
            Err(err) => warn!(error = %err, "Failed to end trip"),
        }
    }
    let _ = status_tx.send(LinkStatus::Ended);
}
