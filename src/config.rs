//! Backend application configuration as served by `GET /config`.
//!
//! Only the fields the engine reads are typed; everything else is kept in
//! the `extra` maps so that a fetched config can be edited and sent back
//! through `PUT /config` without losing keys this crate does not know about.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_GRID_CHANNEL: &str = "Je>1MeV";

fn default_track_step_sec() -> u32 {
    60
}

fn default_percentile() -> String {
    "mean".to_string()
}

fn default_one() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrbitConfig {
    #[serde(default = "default_track_step_sec")]
    pub track_step_sec: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for OrbitConfig {
    fn default() -> Self {
        Self {
            track_step_sec: default_track_step_sec(),
            extra: Map::new(),
        }
    }
}

/// Channel list; the backend accepts either a plain list or an
/// index-to-name mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnergyChannels {
    List(Vec<String>),
    Indexed(BTreeMap<String, String>),
}

impl Default for EnergyChannels {
    fn default() -> Self {
        EnergyChannels::List(
            ["Je>100keV", "Je>1MeV", "Jp>10MeV", "Jp>50MeV"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }
}

impl EnergyChannels {
    /// Channel names in index order.
    pub fn names(&self) -> Vec<String> {
        match self {
            EnergyChannels::List(v) => v.clone(),
            EnergyChannels::Indexed(m) => {
                let mut entries: Vec<(i64, &String)> = m
                    .iter()
                    .map(|(k, v)| (k.trim().parse::<i64>().unwrap_or(i64::MAX), v))
                    .collect();
                entries.sort_by_key(|(k, _)| *k);
                entries.into_iter().map(|(_, v)| v.clone()).collect()
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ae9Ap9Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_alt_km: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxConfig {
    #[serde(default = "default_percentile")]
    pub percentile_default: String,
    #[serde(default)]
    pub energy_channels: EnergyChannels,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ae9ap9: Option<Ae9Ap9Config>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for FluxConfig {
    fn default() -> Self {
        Self {
            percentile_default: default_percentile(),
            energy_channels: EnergyChannels::default(),
            ae9ap9: None,
            extra: Map::new(),
        }
    }
}

impl FluxConfig {
    pub fn default_alt_km(&self) -> Option<f64> {
        self.ae9ap9.as_ref().and_then(|c| c.default_alt_km)
    }

    pub fn first_channel(&self) -> String {
        self.energy_channels
            .names()
            .into_iter()
            .next()
            .unwrap_or_else(|| DEFAULT_GRID_CHANNEL.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionConfig {
    #[serde(default)]
    pub risk_weights: HashMap<String, f64>,
    #[serde(default = "default_one")]
    pub risk_exponent: f64,
    #[serde(default = "default_one")]
    pub risk_scale: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        let risk_weights = [("Je>100keV", 0.4), ("Je>1MeV", 0.3), ("Jp>10MeV", 0.2), ("Jp>50MeV", 0.1)]
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        Self {
            risk_weights,
            risk_exponent: 1.0,
            risk_scale: 1.0,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub orbits: OrbitConfig,
    #[serde(default)]
    pub flux: FluxConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response of both `GET /config` and `PUT /config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub version: i64,
    pub config: AppConfig,
    #[serde(default)]
    pub history_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flux_model: Option<String>,
}

/// Sets `path` (dot separated, e.g. `decision.r_off`) inside a JSON document,
/// creating intermediate objects as needed. `raw` is parsed as JSON when it
/// can be, otherwise stored as a string.
pub fn set_json_path(doc: &mut Value, path: &str, raw: &str) -> Result<(), String> {
    let value: Value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    let keys: Vec<&str> = path.split('.').filter(|k| !k.is_empty()).collect();
    let (last, parents) = keys.split_last().ok_or_else(|| format!("empty config path {:?}", path))?;
    let mut node = doc;
    for key in parents {
        let obj = node
            .as_object_mut()
            .ok_or_else(|| format!("{:?} is not an object in {:?}", key, path))?;
        node = obj.entry(key.to_string()).or_insert_with(|| Value::Object(Map::new()));
    }
    let obj = node
        .as_object_mut()
        .ok_or_else(|| format!("parent of {:?} is not an object", last))?;
    obj.insert(last.to_string(), value);
    Ok(())
}
