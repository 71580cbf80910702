use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the HTTP server binds to (default: 0.0.0.0:3000)
    #[serde(default = "Config::default_bind_addr")]
    pub bind_addr: String,
    /// SQLite connection string (default: sqlite:bustrack.db?mode=rwc)
    #[serde(default = "Config::default_database_url")]
    pub database_url: String,
    /// Allowed CORS origins. Required unless cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    #[serde(default)]
    pub cors_permissive: bool,
    /// Live tracking configuration
    #[serde(default)]
    pub tracking: TrackingConfig,
}

/// Configuration for the live tracking path: room fan-out on the server
/// side and the driver-side sampling loop.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    /// Capacity of each per-bus broadcast room (default: 16).
    /// Subscribers that lag behind simply miss events; there is no replay.
    #[serde(default = "TrackingConfig::default_room_capacity")]
    pub room_capacity: usize,
    /// Interval in seconds between position samples (default: 2)
    #[serde(default = "TrackingConfig::default_sample_interval_secs")]
    pub sample_interval_secs: u64,
    /// Device fixes reporting worse accuracy than this are dropped (default: 500m)
    #[serde(default = "TrackingConfig::default_accuracy_ceiling_m")]
    pub accuracy_ceiling_m: f64,
    /// How long to wait for a device fix before falling back to the
    /// synthetic generator (default: 12s)
    #[serde(default = "TrackingConfig::default_device_timeout_secs")]
    pub device_timeout_secs: u64,
    /// Device fixes older than this are discarded as stale (default: 10s)
    #[serde(default = "TrackingConfig::default_max_staleness_secs")]
    pub max_staleness_secs: u64,
    /// Reference point the synthetic walk starts from
    #[serde(default)]
    pub reference_point: ReferencePoint,
    /// Maximum per-axis step of the synthetic walk, in degrees (default: 0.0008)
    #[serde(default = "TrackingConfig::default_jitter_degrees")]
    pub jitter_degrees: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            room_capacity: Self::default_room_capacity(),
            sample_interval_secs: Self::default_sample_interval_secs(),
            accuracy_ceiling_m: Self::default_accuracy_ceiling_m(),
            device_timeout_secs: Self::default_device_timeout_secs(),
            max_staleness_secs: Self::default_max_staleness_secs(),
            reference_point: ReferencePoint::default(),
            jitter_degrees: Self::default_jitter_degrees(),
        }
    }
}

impl TrackingConfig {
    fn default_room_capacity() -> usize {
        16
    }
    fn default_sample_interval_secs() -> u64 {
        2
    }
    fn default_accuracy_ceiling_m() -> f64 {
        500.0
    }
    fn default_device_timeout_secs() -> u64 {
        12
    }
    fn default_max_staleness_secs() -> u64 {
        10
    }
    fn default_jitter_degrees() -> f64 {
        0.0008
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReferencePoint {
    pub lat: f64,
    pub lng: f64,
}

impl Default for ReferencePoint {
    fn default() -> Self {
        // Depot coordinates used when no fix has ever been acquired
        Self {
            lat: 22.9676,
            lng: 76.0534,
        }
    }
}

impl Config {
    fn default_bind_addr() -> String {
        "0.0.0.0:3000".to_string()
    }

    fn default_database_url() -> String {
        "sqlite:bustrack.db?mode=rwc".to_string()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_sections() {
        let config: Config = serde_yaml::from_str("tracking: {}").unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.tracking.sample_interval_secs, 2);
        assert_eq!(config.tracking.accuracy_ceiling_m, 500.0);
        assert!(!config.cors_permissive);
        assert!(config.cors_origins.is_empty());
    }

    #[test]
    fn test_explicit_values_override_defaults() {
        let yaml = r#"
bind_addr: "127.0.0.1:8080"
cors_permissive: true
tracking:
  sample_interval_secs: 3
  accuracy_ceiling_m: 250
  reference_point:
    lat: 48.36
    lng: 10.89
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert!(config.cors_permissive);
        assert_eq!(config.tracking.sample_interval_secs, 3);
        assert_eq!(config.tracking.accuracy_ceiling_m, 250.0);
        assert_eq!(config.tracking.reference_point.lat, 48.36);
        // Untouched fields keep their defaults
        assert_eq!(config.tracking.device_timeout_secs, 12);
    }
}
