//! Runtime settings for the engine host.
//!
//! Read from an optional JSON file; any field left out keeps its default.
//! Command-line flags are applied on top by the binary.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::{Cadence, EngineOptions};
use crate::error::EngineError;
use crate::segment::{SegmentOpacity, DEFAULT_FUTURE_OPACITY, DEFAULT_PAST_OPACITY};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub refresh_interval_ms: u64,
    pub grid_interval_ms: u64,
    pub tick_interval_ms: u64,
    pub past_opacity: f64,
    pub future_opacity: f64,
    pub track_half_span_min: i64,
    pub grid_channel: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            refresh_interval_ms: 15_000,
            grid_interval_ms: 60_000,
            tick_interval_ms: 500,
            past_opacity: DEFAULT_PAST_OPACITY,
            future_opacity: DEFAULT_FUTURE_OPACITY,
            track_half_span_min: 90,
            grid_channel: None,
            request_timeout_ms: 10_000,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&text)?;
        settings.validate()?;
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        for (name, ms) in [
            ("refresh_interval_ms", self.refresh_interval_ms),
            ("grid_interval_ms", self.grid_interval_ms),
            ("tick_interval_ms", self.tick_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ] {
            if ms == 0 {
                return Err(EngineError::Malformed(format!("{} must be positive", name)));
            }
        }
        for (name, v) in [("past_opacity", self.past_opacity), ("future_opacity", self.future_opacity)] {
            if !(0.0..=1.0).contains(&v) {
                return Err(EngineError::Malformed(format!("{} {} outside [0, 1]", name, v)));
            }
        }
        if self.track_half_span_min <= 0 {
            return Err(EngineError::Malformed("track_half_span_min must be positive".to_string()));
        }
        Ok(())
    }

    pub fn cadence(&self) -> Cadence {
        Cadence {
            refresh: Duration::from_millis(self.refresh_interval_ms),
            grid: Duration::from_millis(self.grid_interval_ms),
            tick: Duration::from_millis(self.tick_interval_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            track_half_span: chrono::Duration::minutes(self.track_half_span_min),
            opacity: SegmentOpacity {
                past: self.past_opacity,
                future: self.future_opacity,
            },
            grid_channel: self.grid_channel.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_engine_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.cadence(), Cadence::default());
        let options = settings.engine_options();
        assert_eq!(options.track_half_span, EngineOptions::default().track_half_span);
        assert_eq!(options.opacity, SegmentOpacity::default());
        assert!(options.grid_channel.is_none());
        assert_eq!(settings.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"base_url": "http://sat.local:9000", "tick_interval_ms": 250, "grid_channel": "Jp>10MeV"}}"#).unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.base_url, "http://sat.local:9000");
        assert_eq!(settings.cadence().tick, Duration::from_millis(250));
        assert_eq!(settings.cadence().refresh, Duration::from_secs(15));
        assert_eq!(settings.grid_channel.as_deref(), Some("Jp>10MeV"));
        assert_eq!(settings.past_opacity, 0.95);
    }

    #[test]
    fn full_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings {
            track_half_span_min: 45,
            ..Settings::default()
        };
        std::fs::write(&path, serde_json::to_string_pretty(&settings).unwrap()).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"past_opacity": 1.5}}"#).unwrap();
        assert!(matches!(Settings::load(file.path()), Err(EngineError::Malformed(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"refresh_interval_ms": 0}}"#).unwrap();
        assert!(Settings::load(file.path()).is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
