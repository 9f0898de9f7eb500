//! Smoothed current position between the two track samples around "now".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::{GeoVertex, METERS_PER_KM};
use crate::model::TrackPoint;
use crate::time::{millis_between, normalize_lon};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothPos {
    #[serde(with = "crate::time::iso")]
    pub t: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub alt_km: f64,
}

impl SmoothPos {
    pub fn vertex(&self) -> GeoVertex {
        GeoVertex::from_degrees(self.lon, self.lat, self.alt_km * METERS_PER_KM)
    }

    /// WGS84 Earth-fixed position in meters.
    pub fn ecef_m(&self) -> [f64; 3] {
        let v = self.vertex().to_cartesian();
        [v.x, v.y, v.z]
    }
}

pub fn lerp(a: f64, b: f64, frac: f64) -> f64 {
    a + (b - a) * frac
}

/// Longitude interpolation along the shorter arc, result in `(-180, 180]`.
pub fn lerp_lon(a: f64, b: f64, frac: f64) -> f64 {
    let mut delta = b - a;
    if delta.abs() > 180.0 {
        delta -= 360.0 * delta.signum();
    }
    normalize_lon(a + delta * frac)
}

/// Interpolates the position at `now`, or `None` when the track has fewer
/// than two points or `now` lies outside its time range.
pub fn interpolate_position(track: &[TrackPoint], now: DateTime<Utc>) -> Option<SmoothPos> {
    if track.len() < 2 {
        return None;
    }
    let (a, b) = track
        .windows(2)
        .map(|w| (&w[0], &w[1]))
        .find(|(a, b)| a.t <= now && now <= b.t)?;

    let span = millis_between(&a.t, &b.t);
    let span = if span == 0.0 { 1.0 } else { span };
    let frac = (millis_between(&a.t, &now) / span).clamp(0.0, 1.0);

    Some(SmoothPos {
        t: now,
        lat: lerp(a.lat, b.lat, frac),
        lon: lerp_lon(a.lon, b.lon, frac),
        alt_km: lerp(a.alt_km, b.alt_km, frac),
    })
}
