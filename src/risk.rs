//! Risk aggregation from multi-channel flux samples.
//!
//! Samples are grouped by exact instant and collapsed into one scalar per
//! instant: `risk = scale * Σ weight[ch] * value[ch]^exponent`, counting only
//! strictly positive readings. Weights are used as given, never normalized.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DecisionConfig;
use crate::error::EngineError;
use crate::model::{FluxSample, Rgba};

pub const MEDIUM_RISK_THRESHOLD: f64 = 3.0;
pub const HIGH_RISK_THRESHOLD: f64 = 5.0;

const LOW_COLOR: Rgba = Rgba::opaque(0xa3, 0xe6, 0x35);
const MEDIUM_COLOR: Rgba = Rgba::opaque(0x22, 0xd3, 0xee);
const HIGH_COLOR: Rgba = Rgba::opaque(0xf9, 0x73, 0x16);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskPoint {
    #[serde(with = "crate::time::iso")]
    pub t: DateTime<Utc>,
    pub risk: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskParams {
    pub weights: HashMap<String, f64>,
    pub exponent: f64,
    pub scale: f64,
}

impl RiskParams {
    pub fn from_decision(cfg: &DecisionConfig) -> Self {
        Self {
            weights: cfg.risk_weights.clone(),
            exponent: cfg.risk_exponent,
            scale: cfg.risk_scale,
        }
    }
}

/// Collapses flux samples into one risk value per distinct instant, in
/// ascending time order.
///
/// A repeated `(t, channel)` pair keeps the later sample. Non-finite
/// parameters or sample values reject the whole batch.
pub fn risk_series(samples: &[FluxSample], params: &RiskParams) -> Result<Vec<RiskPoint>, EngineError> {
    if !params.exponent.is_finite() || !params.scale.is_finite() {
        return Err(EngineError::Malformed(format!(
            "risk exponent {} / scale {} must be finite",
            params.exponent, params.scale
        )));
    }

    // BTreeMaps keep both the output order and the summation order fixed.
    let mut by_time: BTreeMap<DateTime<Utc>, BTreeMap<&str, f64>> = BTreeMap::new();
    for (i, sample) in samples.iter().enumerate() {
        if !sample.value.is_finite() {
            return Err(EngineError::Malformed(format!(
                "flux sample {} ({}) has non-finite value",
                i, sample.channel
            )));
        }
        by_time
            .entry(sample.t)
            .or_default()
            .insert(sample.channel.as_str(), sample.value);
    }

    let series = by_time
        .into_iter()
        .map(|(t, channels)| {
            let sum: f64 = channels
                .iter()
                .filter(|(_, value)| **value > 0.0)
                .map(|(channel, value)| {
                    let weight = params.weights.get(*channel).copied().unwrap_or(0.0);
                    weight * value.powf(params.exponent)
                })
                .sum();
            RiskPoint { t, risk: params.scale * sum }
        })
        .collect();
    Ok(series)
}

/// Time to risk lookup built from an aggregated series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiskLookup {
    by_time: BTreeMap<DateTime<Utc>, f64>,
}

impl RiskLookup {
    pub fn from_series(series: &[RiskPoint]) -> Self {
        Self {
            by_time: series.iter().map(|p| (p.t, p.risk)).collect(),
        }
    }

    pub fn get(&self, t: &DateTime<Utc>) -> Option<f64> {
        self.by_time.get(t).copied()
    }

    /// Risk at `t`, zero when no sample exists for that exact instant.
    pub fn risk_at(&self, t: &DateTime<Utc>) -> f64 {
        self.get(t).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Buckets are closed at the bottom: exactly 3.0 is medium, exactly 5.0 is high.
    pub fn from_risk(risk: f64) -> Self {
        if risk >= HIGH_RISK_THRESHOLD {
            RiskLevel::High
        } else if risk >= MEDIUM_RISK_THRESHOLD {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn color(&self) -> Rgba {
        match self {
            RiskLevel::Low => LOW_COLOR,
            RiskLevel::Medium => MEDIUM_COLOR,
            RiskLevel::High => HIGH_COLOR,
        }
    }
}
