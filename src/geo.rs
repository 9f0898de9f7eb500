//! Geodetic vertices and their Earth-fixed Cartesian projection.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::model::TrackPoint;
use crate::time::normalize_lon;

pub const WGS84_SEMI_MAJOR_M: f64 = 6_378_137.0;
pub const WGS84_FLATTENING: f64 = 1.0 / 298.257_223_563;
pub const METERS_PER_KM: f64 = 1000.0;

/// Render-ready vertex: normalized longitude, latitude and height in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoVertex {
    pub lon_deg: f64,
    pub lat_deg: f64,
    pub height_m: f64,
}

impl GeoVertex {
    pub fn from_degrees(lon_deg: f64, lat_deg: f64, height_m: f64) -> Self {
        Self {
            lon_deg: normalize_lon(lon_deg),
            lat_deg,
            height_m,
        }
    }

    pub fn from_track_point(pt: &TrackPoint) -> Self {
        Self::from_degrees(pt.lon, pt.lat, pt.alt_km * METERS_PER_KM)
    }

    /// Earth-centered, Earth-fixed position on the WGS84 ellipsoid, in meters.
    pub fn to_cartesian(&self) -> Vector3<f64> {
        let e2 = WGS84_FLATTENING * (2.0 - WGS84_FLATTENING);
        let lat = self.lat_deg.to_radians();
        let lon = self.lon_deg.to_radians();
        let (sin_lat, cos_lat) = lat.sin_cos();
        let n = WGS84_SEMI_MAJOR_M / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        Vector3::new(
            (n + self.height_m) * cos_lat * lon.cos(),
            (n + self.height_m) * cos_lat * lon.sin(),
            (n * (1.0 - e2) + self.height_m) * sin_lat,
        )
    }
}
