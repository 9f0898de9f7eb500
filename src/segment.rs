//! Risk-colored track segmentation.
//!
//! The track is split at "now" into past and future, and each half is cut
//! into runs of equal display color. Consecutive runs share their boundary
//! vertex so the rendered polyline has no gaps at color changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoVertex;
use crate::model::{Rgba, TrackPoint};
use crate::risk::{RiskLevel, RiskLookup};

pub const DEFAULT_PAST_OPACITY: f64 = 0.95;
pub const DEFAULT_FUTURE_OPACITY: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentOpacity {
    pub past: f64,
    pub future: f64,
}

impl Default for SegmentOpacity {
    fn default() -> Self {
        Self {
            past: DEFAULT_PAST_OPACITY,
            future: DEFAULT_FUTURE_OPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub points: Vec<GeoVertex>,
    pub color: Rgba,
    /// First vertex is the last point of the previous segment.
    pub joined: bool,
}

impl Segment {
    /// Number of track points this segment owns (excludes a borrowed vertex).
    pub fn owned_len(&self) -> usize {
        self.points.len() - usize::from(self.joined)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentedTrack {
    pub past: Vec<Segment>,
    pub future: Vec<Segment>,
}

/// Segments `track` around `now` (points at exactly `now` are past).
pub fn segment_track(
    track: &[TrackPoint],
    lookup: &RiskLookup,
    now: DateTime<Utc>,
    opacity: SegmentOpacity,
) -> SegmentedTrack {
    let (past, future): (Vec<&TrackPoint>, Vec<&TrackPoint>) = track.iter().partition(|pt| pt.t <= now);
    SegmentedTrack {
        past: build_segments(&past, lookup, opacity.past),
        future: build_segments(&future, lookup, opacity.future),
    }
}

fn build_segments(points: &[&TrackPoint], lookup: &RiskLookup, opacity: f64) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut last_vertex: Option<GeoVertex> = None;

    for pt in points {
        let color = RiskLevel::from_risk(lookup.risk_at(&pt.t)).color().with_opacity(opacity);
        let vertex = GeoVertex::from_track_point(pt);
        match segments.last_mut() {
            Some(current) if current.color == color => current.points.push(vertex),
            _ => {
                let mut seg = Segment {
                    points: Vec::with_capacity(2),
                    color,
                    joined: last_vertex.is_some(),
                };
                seg.points.extend(last_vertex);
                seg.points.push(vertex);
                segments.push(seg);
            }
        }
        last_vertex = Some(vertex);
    }
    segments
}
