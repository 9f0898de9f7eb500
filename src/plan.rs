//! Observation plan export (CSV) as produced by `GET /decision/plan/export`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::model::Mode;

/// One ON interval of the exported plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    pub mode: Mode,
    #[serde(with = "crate::time::iso")]
    pub on_utc: DateTime<Utc>,
    #[serde(with = "crate::time::iso")]
    pub off_utc: DateTime<Utc>,
    pub duration_sec: f64,
    pub reason: String,
    pub norad_id: Option<u32>,
    pub tle_epoch_utc: Option<String>,
    pub percentile: String,
    pub flux_model: String,
    pub track_step_sec: u32,
}

pub fn parse_plan(bytes: &[u8]) -> Result<Vec<PlanItem>, EngineError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(bytes);
    reader
        .deserialize()
        .enumerate()
        .map(|(i, row)| row.map_err(|e| EngineError::Malformed(format!("plan row {}: {}", i + 1, e))))
        .collect()
}

/// Total ON time in seconds.
pub fn total_on_seconds(items: &[PlanItem]) -> f64 {
    items
        .iter()
        .filter(|item| item.mode == Mode::On)
        .map(|item| item.duration_sec)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::parse_instant;

    const EXPORT: &str = "\
mode,on_utc,off_utc,duration_sec,reason,norad_id,tle_epoch_utc,percentile,flux_model,track_step_sec
OBS_ON,2025-01-05T00:00:00Z,2025-01-05T01:30:00Z,5400,risk below threshold,25544,2025-01-04T18:00:00Z,mean,ae9ap9,60
OBS_ON,2025-01-05T03:00:00Z,2025-01-05T03:20:00Z,1200,risk below threshold,,,p95,ae9ap9,60
";

    #[test]
    fn parses_export() {
        let items = parse_plan(EXPORT.as_bytes()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].mode, Mode::On);
        assert_eq!(items[0].on_utc, parse_instant("2025-01-05T00:00:00Z").unwrap());
        assert_eq!(items[0].norad_id, Some(25544));
        assert_eq!(items[0].tle_epoch_utc.as_deref(), Some("2025-01-04T18:00:00Z"));
        assert_eq!(items[1].norad_id, None);
        assert_eq!(items[1].tle_epoch_utc, None);
        assert_eq!(items[1].percentile, "p95");
        assert_eq!(total_on_seconds(&items), 6600.0);
    }

    #[test]
    fn header_only_is_empty_plan() {
        let header = EXPORT.lines().next().unwrap();
        assert!(parse_plan(header.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn bad_row_is_malformed() {
        let bad = EXPORT.replace("5400", "lots");
        let err = parse_plan(bad.as_bytes()).unwrap_err();
        assert!(matches!(err, EngineError::Malformed(msg) if msg.contains("row 1")));
    }
}
