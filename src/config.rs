use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root directory containing lines.json, stations.json, shapes.json and
    /// one timetable JSON per line. Overridden by STATIC_DATA_DIR.
    #[serde(default = "Config::default_static_data_dir")]
    pub static_data_dir: String,
    /// Upstream GTFS-RT TripUpdate feed URL. Overridden by GTFS_RT_URL.
    #[serde(default)]
    pub gtfs_rt_url: String,
    /// API key sent as a query parameter on the feed request. Overridden by GTFS_RT_KEY.
    #[serde(default)]
    pub gtfs_rt_key: String,
    /// Fusion refresh cycle period, in seconds. Overridden by REFRESH_INTERVAL_SEC.
    #[serde(default = "Config::default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// IANA timezone name used for service-day calculation. Overridden by LOCAL_TZ.
    #[serde(default = "Config::default_local_tz")]
    pub local_tz: String,
    /// Allowed CORS origins. Required unless cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    #[serde(default)]
    pub cors_permissive: bool,
    /// HTTP listen address. Overridden by BIND_ADDR.
    #[serde(default = "Config::default_bind_addr")]
    pub bind_addr: String,
    /// Valid range for station coordinates; entries outside are rejected at load.
    #[serde(default = "Config::default_bounding_box")]
    pub station_bounding_box: BoundingBox,
    /// Consecutive feed fetch failures before the publisher is tagged degraded.
    #[serde(default = "Config::default_degraded_after_failures")]
    pub degraded_after_failures: u32,
    /// Dates, in addition to Saturdays and Sundays, treated as the
    /// `SaturdayHoliday` service calendar.
    #[serde(default)]
    pub holidays: Vec<chrono::NaiveDate>,
}

impl Config {
    fn default_static_data_dir() -> String {
        "./data".to_string()
    }
    fn default_refresh_interval_secs() -> u64 {
        30
    }
    fn default_local_tz() -> String {
        "Asia/Tokyo".to_string()
    }
    fn default_bind_addr() -> String {
        "0.0.0.0:3000".to_string()
    }
    pub(crate) fn default_bounding_box() -> BoundingBox {
        BoundingBox { min_lon: 122.0, max_lon: 154.0, min_lat: 20.0, max_lat: 46.0 }
    }
    fn default_degraded_after_failures() -> u32 {
        5
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config: Self = match std::fs::read_to_string(path.as_ref()) {
            Ok(content) => {
                serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?
            }
            Err(_) => serde_yaml::from_str("{}").expect("empty document always parses"),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("STATIC_DATA_DIR") {
            self.static_data_dir = v;
        }
        if let Ok(v) = std::env::var("GTFS_RT_URL") {
            self.gtfs_rt_url = v;
        }
        if let Ok(v) = std::env::var("GTFS_RT_KEY") {
            self.gtfs_rt_key = v;
        }
        if let Ok(v) = std::env::var("REFRESH_INTERVAL_SEC") {
            if let Ok(parsed) = v.parse() {
                self.refresh_interval_secs = parsed;
            }
        }
        if let Ok(v) = std::env::var("LOCAL_TZ") {
            self.local_tz = v;
        }
        if let Ok(v) = std::env::var("BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Ok(v) = std::env::var("CORS_ALLOW_ORIGIN") {
            self.cors_origins = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
    }

    /// Checked once at startup, after load and before any I/O. Returns the
    /// reason the configuration is unrunnable rather than panicking, so
    /// `main` can log it and exit with the documented fatal-config code.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.cors_permissive && self.cors_origins.is_empty() {
            return Err(ConfigError::Invalid(
                "Either set CORS_ALLOW_ORIGIN / cors_origins, or set cors_permissive: true for development".to_string(),
            ));
        }
        if self.gtfs_rt_url.is_empty() {
            return Err(ConfigError::Invalid(
                "GTFS_RT_URL must be set to the upstream TripUpdate feed endpoint".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timezone(&self) -> chrono_tz::Tz {
        self.local_tz.parse().unwrap_or(chrono_tz::Asia::Tokyo)
    }
}

/// Valid geographic range for station coordinates: default lon in [122, 154], lat in [20, 46].
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_contains_tokyo() {
        let bbox = Config::default_bounding_box();
        assert!(bbox.contains(139.7, 35.7));
    }

    #[test]
    fn bounding_box_rejects_out_of_range() {
        let bbox = Config::default_bounding_box();
        assert!(!bbox.contains(0.0, 0.0));
        assert!(!bbox.contains(139.7, 90.0));
    }
}
