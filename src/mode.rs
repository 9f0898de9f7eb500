//! Current observation mode from the precomputed window schedule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Mode, Window};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeState {
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Default for ModeState {
    fn default() -> Self {
        Self { mode: Mode::On, reason: None }
    }
}

impl ModeState {
    fn from_window(w: &Window) -> Self {
        Self {
            mode: w.mode,
            reason: Some(w.reason.clone()),
        }
    }
}

/// Resolves the mode at `now` from windows ordered by start.
///
/// The first window whose closed interval contains `now` wins. Between
/// windows the most recent window that already ended stays in force. Before
/// any window, or with no windows at all, the mode is ON with no reason.
pub fn resolve_mode(windows: &[Window], now: DateTime<Utc>) -> ModeState {
    let mut last_known: Option<&Window> = None;
    for w in windows {
        if w.contains(now) {
            return ModeState::from_window(w);
        }
        if now > w.t_end {
            last_known = Some(w);
        }
    }
    last_known.map(ModeState::from_window).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    fn at(sec: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap() + Duration::seconds(sec)
    }

    fn window(start: i64, end: i64, mode: Mode, reason: &str) -> Window {
        Window {
            t_start: at(start),
            t_end: at(end),
            mode,
            reason: reason.to_string(),
            margins: BTreeMap::new(),
        }
    }

    fn schedule() -> Vec<Window> {
        vec![window(10, 20, Mode::Off, "storm"), window(30, 40, Mode::On, "clear")]
    }

    #[test]
    fn gap_keeps_last_ended_window() {
        let state = resolve_mode(&schedule(), at(25));
        assert_eq!(state.mode, Mode::Off);
        assert_eq!(state.reason.as_deref(), Some("storm"));
    }

    #[test]
    fn contained_window_wins() {
        assert_eq!(resolve_mode(&schedule(), at(15)).mode, Mode::Off);
        let on = resolve_mode(&schedule(), at(35));
        assert_eq!(on.mode, Mode::On);
        assert_eq!(on.reason.as_deref(), Some("clear"));
    }

    #[test]
    fn before_all_windows_is_on_without_reason() {
        assert_eq!(resolve_mode(&schedule(), at(5)), ModeState::default());
        assert_eq!(resolve_mode(&[], at(5)), ModeState::default());
    }

    #[test]
    fn boundaries_are_inclusive() {
        assert_eq!(resolve_mode(&schedule(), at(10)).mode, Mode::Off);
        assert_eq!(resolve_mode(&schedule(), at(20)).mode, Mode::Off);
        assert_eq!(resolve_mode(&schedule(), at(30)).mode, Mode::On);
    }

    #[test]
    fn after_all_windows_uses_last() {
        let state = resolve_mode(&schedule(), at(100));
        assert_eq!(state.mode, Mode::On);
        assert_eq!(state.reason.as_deref(), Some("clear"));
    }

    #[test]
    fn overlapping_windows_earliest_start_wins() {
        let windows = vec![window(10, 30, Mode::Off, "first"), window(20, 40, Mode::On, "second")];
        let state = resolve_mode(&windows, at(25));
        assert_eq!(state.reason.as_deref(), Some("first"));
    }
}
