//! # Surfacer configuration
//!
//! Every field is optional in the TOML file; missing fields take the
//! defaults below. A zero `resolution_sec` means one minute.
//!
//! ```toml
//! url = "/probestatus"
//! resolution_sec = 60
//! timeseries_size = 4320
//! max_targets_per_probe = 20
//! cache_time_sec = 2
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StatusError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_URL: &str = "/probestatus";
pub const DEFAULT_RESOLUTION: Duration = Duration::from_secs(60);
/// Three days of one-minute buckets.
pub const DEFAULT_TIMESERIES_SIZE: usize = 4_320;
pub const DEFAULT_MAX_TARGETS_PER_PROBE: usize = 20;
pub const DEFAULT_CACHE_TIME_SEC: u64 = 2;
/// Events buffered between producers and the actor before writes are dropped.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 10_000;
/// Dashboard queries queued before callers start waiting on earlier ones.
pub const DEFAULT_QUERY_QUEUE_SIZE: usize = 10;

// ---------------------------------------------------------------------------
// SurfacerConfig
// ---------------------------------------------------------------------------

/// Configuration for the probe status surfacer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SurfacerConfig {
    /// URL path the dashboard is served at.
    pub url: String,
    /// Tick duration in seconds. 0 falls back to one minute.
    pub resolution_sec: u64,
    /// Number of buckets kept per (probe, target) series.
    pub timeseries_size: usize,
    /// Cardinality cap: targets tracked per probe.
    pub max_targets_per_probe: usize,
    /// How long a rendered dashboard is reused, in seconds.
    pub cache_time_sec: u64,
    /// Capacity of the inbound event queue.
    pub event_buffer_size: usize,
    /// Capacity of the inbound query queue.
    pub query_queue_size: usize,
}

impl Default for SurfacerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            resolution_sec: DEFAULT_RESOLUTION.as_secs(),
            timeseries_size: DEFAULT_TIMESERIES_SIZE,
            max_targets_per_probe: DEFAULT_MAX_TARGETS_PER_PROBE,
            cache_time_sec: DEFAULT_CACHE_TIME_SEC,
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
            query_queue_size: DEFAULT_QUERY_QUEUE_SIZE,
        }
    }
}

impl SurfacerConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, StatusError> {
        let cfg: SurfacerConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StatusError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| StatusError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject values the store cannot work with.
    pub fn validate(&self) -> Result<(), StatusError> {
        if !self.url.starts_with('/') {
            return Err(StatusError::InvalidConfig {
                field: "url",
                reason: format!("'{}' must start with '/'", self.url),
            });
        }
        if self.timeseries_size == 0 {
            return Err(StatusError::InvalidConfig {
                field: "timeseries_size",
                reason: "must be > 0".into(),
            });
        }
        if self.event_buffer_size == 0 {
            return Err(StatusError::InvalidConfig {
                field: "event_buffer_size",
                reason: "must be > 0".into(),
            });
        }
        if self.query_queue_size == 0 {
            return Err(StatusError::InvalidConfig {
                field: "query_queue_size",
                reason: "must be > 0".into(),
            });
        }
        Ok(())
    }

    /// Effective tick duration.
    pub fn resolution(&self) -> Duration {
        if self.resolution_sec == 0 {
            DEFAULT_RESOLUTION
        } else {
            Duration::from_secs(self.resolution_sec)
        }
    }

    /// Wall-clock span covered by one full series: `resolution * timeseries_size`.
    pub fn total_span(&self) -> Duration {
        self.resolution()
            .saturating_mul(u32::try_from(self.timeseries_size).unwrap_or(u32::MAX))
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_time_sec)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_values() {
        let cfg = SurfacerConfig::default();
        assert_eq!(cfg.url, "/probestatus");
        assert_eq!(cfg.resolution(), Duration::from_secs(60));
        assert_eq!(cfg.timeseries_size, 4_320);
        assert_eq!(cfg.max_targets_per_probe, 20);
        assert_eq!(cfg.cache_max_age(), Duration::from_secs(2));
        assert_eq!(cfg.event_buffer_size, 10_000);
        assert_eq!(cfg.query_queue_size, 10);
    }

    #[test]
    fn test_default_total_span_is_three_days() {
        let cfg = SurfacerConfig::default();
        assert_eq!(cfg.total_span(), Duration::from_secs(3 * 24 * 3600));
    }

    #[test]
    fn test_zero_resolution_falls_back_to_one_minute() {
        let cfg = SurfacerConfig {
            resolution_sec: 0,
            ..Default::default()
        };
        assert_eq!(cfg.resolution(), Duration::from_secs(60));
    }

    #[test]
    fn test_empty_toml_gives_defaults() {
        let cfg = SurfacerConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, SurfacerConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides_only_given_fields() {
        let cfg = SurfacerConfig::from_toml_str(
            "url = \"/status\"\nresolution_sec = 10\nmax_targets_per_probe = 3\n",
        )
        .unwrap();
        assert_eq!(cfg.url, "/status");
        assert_eq!(cfg.resolution(), Duration::from_secs(10));
        assert_eq!(cfg.max_targets_per_probe, 3);
        assert_eq!(cfg.timeseries_size, DEFAULT_TIMESERIES_SIZE);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = SurfacerConfig::from_toml_str("bogus = 1").unwrap_err();
        assert!(matches!(err, StatusError::ConfigParse(_)));
    }

    #[test]
    fn test_zero_timeseries_size_is_invalid() {
        let err = SurfacerConfig::from_toml_str("timeseries_size = 0").unwrap_err();
        assert!(matches!(
            err,
            StatusError::InvalidConfig { field: "timeseries_size", .. }
        ));
    }

    #[test]
    fn test_zero_queue_sizes_are_invalid() {
        assert!(SurfacerConfig::from_toml_str("event_buffer_size = 0").is_err());
        assert!(SurfacerConfig::from_toml_str("query_queue_size = 0").is_err());
    }

    #[test]
    fn test_relative_url_is_invalid() {
        let err = SurfacerConfig::from_toml_str("url = \"status\"").unwrap_err();
        assert!(matches!(err, StatusError::InvalidConfig { field: "url", .. }));
    }

    #[test]
    fn test_zero_max_targets_is_allowed() {
        let cfg = SurfacerConfig::from_toml_str("max_targets_per_probe = 0").unwrap();
        assert_eq!(cfg.max_targets_per_probe, 0);
    }

    #[test]
    fn test_load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cache_time_sec = 30").unwrap();
        let cfg = SurfacerConfig::load(file.path()).unwrap();
        assert_eq!(cfg.cache_max_age(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_missing_file_is_config_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SurfacerConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, StatusError::ConfigRead { .. }));
    }
}
