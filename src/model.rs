//! Wire data model for telemetry received from the backend.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// One propagated sample of the satellite track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    #[serde(with = "crate::time::iso")]
    pub t: DateTime<Utc>,
    pub lat: f64,
    /// Degrees, may be unnormalized.
    pub lon: f64,
    pub alt_km: f64,
    /// Passed through untouched.
    pub tle_epoch: String,
    pub orbit_quality: f64,
}

impl TrackPoint {
    /// Checks a full track batch: finite coordinates, latitude in range,
    /// non-negative altitude and strictly increasing timestamps.
    pub fn validate_sequence(track: &[TrackPoint]) -> Result<(), EngineError> {
        for (i, pt) in track.iter().enumerate() {
            if !pt.lat.is_finite() || !pt.lon.is_finite() || !pt.alt_km.is_finite() {
                return Err(EngineError::Malformed(format!("track point {} has non-finite coordinates", i)));
            }
            if !(-90.0..=90.0).contains(&pt.lat) {
                return Err(EngineError::Malformed(format!("track point {} latitude {} out of range", i, pt.lat)));
            }
            if pt.alt_km < 0.0 {
                return Err(EngineError::Malformed(format!("track point {} altitude {} is negative", i, pt.alt_km)));
            }
        }
        if let Some(i) = track.windows(2).position(|w| w[1].t <= w[0].t) {
            return Err(EngineError::Malformed(format!(
                "track timestamps not strictly increasing at index {}",
                i + 1
            )));
        }
        Ok(())
    }
}

/// Current (or as-of) orbit state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrbitState {
    #[serde(with = "crate::time::iso")]
    pub t: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub alt_km: f64,
    pub velocity_km_s: f64,
    pub tle_epoch: String,
    pub orbit_quality: f64,
}

/// One channel reading at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxSample {
    #[serde(with = "crate::time::iso")]
    pub t: DateTime<Utc>,
    pub channel: String,
    pub value: f64,
    pub percentile: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    #[serde(rename = "OBS_ON")]
    On,
    #[serde(rename = "OBS_OFF")]
    Off,
}

impl Mode {
    pub fn label(&self) -> &'static str {
        match self {
            Mode::On => "OBS_ON",
            Mode::Off => "OBS_OFF",
        }
    }
}

/// Precomputed observation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    #[serde(with = "crate::time::iso")]
    pub t_start: DateTime<Utc>,
    #[serde(with = "crate::time::iso")]
    pub t_end: DateTime<Utc>,
    pub mode: Mode,
    pub reason: String,
    #[serde(default)]
    pub margins: BTreeMap<String, f64>,
}

impl Window {
    /// Closed-interval containment.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        now >= self.t_start && now <= self.t_end
    }
}

/// Gridded flux snapshot, `values[altitude][row][col]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxGrid {
    #[serde(with = "crate::time::iso")]
    pub t: DateTime<Utc>,
    pub channel: String,
    pub percentile: String,
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    pub altitudes_km: Vec<f64>,
    pub values: Vec<Vec<Vec<f64>>>,
}

/// 8-bit RGBA color. Equality includes alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Same color with alpha set from an opacity in `[0, 1]`.
    pub fn with_opacity(self, opacity: f64) -> Self {
        let a = (opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
        Self { a, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::parse_instant;

    fn point(t: &str, lat: f64) -> TrackPoint {
        TrackPoint {
            t: parse_instant(t).unwrap(),
            lat,
            lon: 10.0,
            alt_km: 500.0,
            tle_epoch: "2025-01-05T00:00:00Z".to_string(),
            orbit_quality: 1.0,
        }
    }

    #[test]
    fn window_decodes_backend_mode_names() {
        let json = r#"[
            {"t_start": "2025-01-05T12:00:00Z", "t_end": "2025-01-05T12:03:00Z",
             "mode": "OBS_OFF", "reason": "Risk 4.50 > R_off 4.2",
             "margins": {"lead_time_sec": 180, "lag_time_sec": 180}},
            {"t_start": "2025-01-05T12:10:00+00:00", "t_end": "2025-01-05T12:13:00+00:00",
             "mode": "OBS_ON", "reason": "Risk 2.00 < R_on 3.0"}
        ]"#;
        let windows: Vec<Window> = serde_json::from_str(json).unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].mode, Mode::Off);
        assert_eq!(windows[1].mode, Mode::On);
        assert_eq!(windows[0].margins["lead_time_sec"], 180.0);
        assert!(windows[1].margins.is_empty());
    }

    #[test]
    fn one_bad_timestamp_rejects_whole_batch() {
        let json = r#"[
            {"t": "2025-01-05T12:00:00Z", "channel": "Je>1MeV", "value": 1.0, "percentile": "mean"},
            {"t": "not-a-time", "channel": "Je>1MeV", "value": 1.0, "percentile": "mean"}
        ]"#;
        assert!(serde_json::from_str::<Vec<FluxSample>>(json).is_err());
    }

    #[test]
    fn window_containment_is_closed() {
        let w = Window {
            t_start: parse_instant("2025-01-05T12:00:00Z").unwrap(),
            t_end: parse_instant("2025-01-05T12:01:00Z").unwrap(),
            mode: Mode::Off,
            reason: String::new(),
            margins: BTreeMap::new(),
        };
        assert!(w.contains(w.t_start));
        assert!(w.contains(w.t_end));
        assert!(!w.contains(parse_instant("2025-01-05T12:01:01Z").unwrap()));
    }

    #[test]
    fn track_validation() {
        let good = vec![point("2025-01-05T12:00:00Z", 0.0), point("2025-01-05T12:01:00Z", 1.0)];
        assert!(TrackPoint::validate_sequence(&good).is_ok());

        let unordered = vec![point("2025-01-05T12:01:00Z", 0.0), point("2025-01-05T12:01:00Z", 1.0)];
        assert!(TrackPoint::validate_sequence(&unordered).is_err());

        let bad_lat = vec![point("2025-01-05T12:00:00Z", 91.0)];
        assert!(TrackPoint::validate_sequence(&bad_lat).is_err());

        let nan = vec![point("2025-01-05T12:00:00Z", f64::NAN)];
        assert!(TrackPoint::validate_sequence(&nan).is_err());
    }

    #[test]
    fn opacity_sets_alpha() {
        let c = Rgba::opaque(249, 115, 22).with_opacity(0.6);
        assert_eq!(c.a, 153);
        assert_ne!(c, Rgba::opaque(249, 115, 22).with_opacity(0.95));
    }
}
