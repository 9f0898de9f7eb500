//! Instant parsing and longitude helpers.
//!
//! All timestamps on the wire are ISO-8601 UTC strings. They are parsed once
//! at decode time into `DateTime<Utc>` and compared as absolute instants
//! from then on.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::error::EngineError;

pub const MILLIS_PER_SECOND: f64 = 1000.0;

/// Parses an ISO-8601 timestamp into a UTC instant.
///
/// Offsets are honored (`+08:00` is shifted to UTC). A timestamp without any
/// offset is taken to already be UTC, which is what the backend emits for
/// naive datetimes.
pub fn parse_instant(s: &str) -> Result<DateTime<Utc>, EngineError> {
    let trimmed = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|e| EngineError::Malformed(format!("timestamp {:?}: {}", s, e)))
}

pub fn to_iso(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Milliseconds from `a` to `b` as a float (negative when `b < a`).
pub fn millis_between(a: &DateTime<Utc>, b: &DateTime<Utc>) -> f64 {
    (*b - *a).num_milliseconds() as f64
}

/// Wraps a longitude in degrees into `(-180, 180]`.
///
/// The antimeridian always comes out as `+180` and a zero result is never
/// negative zero.
pub fn normalize_lon(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped <= -180.0 {
        180.0
    } else {
        wrapped + 0.0
    }
}

/// Serde adapter for ISO-8601 instants.
pub mod iso {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::to_iso(t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_instant(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_zulu_and_offsets_to_same_instant() {
        let a = parse_instant("2025-01-05T12:00:00Z").unwrap();
        let b = parse_instant("2025-01-05T20:00:00+08:00").unwrap();
        let c = parse_instant("2025-01-05T12:00:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a, Utc.with_ymd_and_hms(2025, 1, 5, 12, 0, 0).unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse_instant("yesterday"), Err(EngineError::Malformed(_))));
        assert!(parse_instant("").is_err());
    }

    #[test]
    fn iso_output_uses_z_suffix() {
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 0, 30, 0).unwrap();
        assert_eq!(to_iso(&t), "2026-03-01T00:30:00Z");
    }

    #[test]
    fn normalize_lon_range() {
        assert_eq!(normalize_lon(180.0), 180.0);
        assert_eq!(normalize_lon(-180.0), 180.0);
        assert_eq!(normalize_lon(540.0), 180.0);
        assert_eq!(normalize_lon(190.0), -170.0);
        assert_eq!(normalize_lon(-190.0), 170.0);
        assert_eq!(normalize_lon(45.5), 45.5);
        let zero = normalize_lon(-360.0);
        assert_eq!(zero, 0.0);
        assert!(zero.is_sign_positive());
    }
}
