//! Risk-aware orbit track rendering engine.
//!
//! Turns raw satellite telemetry (orbit track, multi-channel particle flux,
//! observation windows, gridded flux snapshots) into render-ready artifacts:
//! a risk-colored trajectory split at "now", a smoothed current position, a
//! false-color heatmap raster and the current observation mode.

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod heatmap;
pub mod interpolate;
pub mod mode;
pub mod model;
pub mod plan;
pub mod risk;
pub mod segment;
pub mod settings;
pub mod time;

pub use engine::{Engine, Snapshot, Timers};
pub use error::EngineError;
