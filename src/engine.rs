//! Refresh orchestration.
//!
//! Three independent cycles feed one immutable [`Snapshot`]:
//!
//! * telemetry refresh: state, track, flux and windows are fetched
//!   concurrently, then aggregated, segmented and resolved into a mode;
//! * grid refresh: one flux grid layer is rasterized into a heatmap;
//! * position tick: the current position is re-interpolated from the last
//!   committed track.
//!
//! Each publish swaps in a whole new snapshot through a `watch` channel, so
//! readers only ever see complete frames. Network failures keep the prior
//! snapshot and record a message instead.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::client::TelemetrySource;
use crate::config::{AppConfig, ConfigResponse};
use crate::error::EngineError;
use crate::heatmap::{flux_stats, rasterize, FluxStats, HeatmapImage};
use crate::interpolate::{interpolate_position, SmoothPos};
use crate::mode::{resolve_mode, ModeState};
use crate::model::{FluxGrid, FluxSample, OrbitState, TrackPoint, Window};
use crate::risk::{risk_series, RiskLookup, RiskParams, RiskPoint};
use crate::segment::{segment_track, SegmentOpacity, SegmentedTrack};

/// Per-stream generation counter.
///
/// A cycle takes a number with [`Generation::begin`] before its fetches and
/// may only publish if nothing newer has committed in the meantime.
#[derive(Debug, Default)]
pub struct Generation {
    issued: AtomicU64,
    committed: AtomicU64,
}

impl Generation {
    pub fn begin(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn try_commit(&self, id: u64) -> bool {
        self.committed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| (id > current).then_some(id))
            .is_ok()
    }

    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }
}

/// Raw results of one telemetry fetch.
#[derive(Debug, Clone)]
pub struct TelemetryInputs {
    pub state: OrbitState,
    pub track: Vec<TrackPoint>,
    pub flux: Vec<FluxSample>,
    pub windows: Vec<Window>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryFrame {
    #[serde(with = "crate::time::iso")]
    pub now: DateTime<Utc>,
    pub state: OrbitState,
    pub track: Vec<TrackPoint>,
    pub risk: Vec<RiskPoint>,
    pub segments: SegmentedTrack,
    pub windows: Vec<Window>,
    pub mode: ModeState,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeatmapFrame {
    #[serde(with = "crate::time::iso")]
    pub t: DateTime<Utc>,
    pub channel: String,
    pub percentile: String,
    pub alt_km: Option<f64>,
    pub stats: FluxStats,
    #[serde(skip)]
    pub image: Option<HeatmapImage>,
}

/// Everything a renderer needs for one frame.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub telemetry: Option<Arc<TelemetryFrame>>,
    pub heatmap: Option<Arc<HeatmapFrame>>,
    pub position: Option<SmoothPos>,
    pub telemetry_error: Option<String>,
    pub grid_error: Option<String>,
}

/// Pure telemetry pipeline: validate, aggregate, segment and resolve.
pub fn compute_telemetry(
    now: DateTime<Utc>,
    inputs: TelemetryInputs,
    config: &AppConfig,
    opacity: SegmentOpacity,
) -> Result<TelemetryFrame, EngineError> {
    TrackPoint::validate_sequence(&inputs.track)?;
    let risk = risk_series(&inputs.flux, &RiskParams::from_decision(&config.decision))?;
    let lookup = RiskLookup::from_series(&risk);
    let segments = segment_track(&inputs.track, &lookup, now, opacity);
    let mode = resolve_mode(&inputs.windows, now);
    Ok(TelemetryFrame {
        now,
        state: inputs.state,
        track: inputs.track,
        risk,
        segments,
        windows: inputs.windows,
        mode,
    })
}

/// Pure grid pipeline: rasterize layer 0 and compute its positive range.
pub fn compute_heatmap(grid: &FluxGrid, alt_km: Option<f64>) -> Result<HeatmapFrame, EngineError> {
    let image = rasterize(grid)?;
    let stats = flux_stats(grid)?;
    Ok(HeatmapFrame {
        t: grid.t,
        channel: grid.channel.clone(),
        percentile: grid.percentile.clone(),
        alt_km,
        stats,
        image,
    })
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub track_half_span: chrono::Duration,
    pub opacity: SegmentOpacity,
    /// Overrides the first configured energy channel for the grid.
    pub grid_channel: Option<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            track_half_span: chrono::Duration::minutes(90),
            opacity: SegmentOpacity::default(),
            grid_channel: None,
        }
    }
}

pub struct Engine<S> {
    source: S,
    options: EngineOptions,
    config: watch::Sender<Arc<AppConfig>>,
    config_loaded: AtomicBool,
    snapshot: watch::Sender<Arc<Snapshot>>,
    telemetry_gen: Generation,
    grid_gen: Generation,
}

impl<S: TelemetrySource> Engine<S> {
    pub fn new(source: S, options: EngineOptions) -> Self {
        Self {
            source,
            options,
            config: watch::Sender::new(Arc::new(AppConfig::default())),
            config_loaded: AtomicBool::new(false),
            snapshot: watch::Sender::new(Arc::new(Snapshot::default())),
            telemetry_gen: Generation::default(),
            grid_gen: Generation::default(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot.subscribe()
    }

    pub fn config(&self) -> Arc<AppConfig> {
        self.config.borrow().clone()
    }

    pub fn set_config(&self, config: AppConfig) {
        self.config.send_replace(Arc::new(config));
        self.config_loaded.store(true, Ordering::SeqCst);
    }

    /// Fetches the backend config and uses it for subsequent cycles.
    pub async fn load_config(&self) -> Result<ConfigResponse, EngineError> {
        let response = self.source.get_config().await?;
        log::info!(
            "Loaded backend config v{} (step {} s, percentile {})",
            response.version,
            response.config.orbits.track_step_sec,
            response.config.flux.percentile_default
        );
        self.set_config(response.config.clone());
        Ok(response)
    }

    /// Config for a cycle. Until a backend config has been loaded or set, each
    /// cycle fetches it first and fails if that fetch fails.
    async fn cycle_config(&self) -> Result<Arc<AppConfig>, EngineError> {
        if !self.config_loaded.load(Ordering::SeqCst) {
            self.load_config().await?;
        }
        Ok(self.config())
    }

    /// Publishes `update` if generation `id` of `generation` is still the
    /// newest. The check and the swap happen under the channel lock.
    fn publish(&self, generation: &Generation, id: u64, update: impl FnOnce(&mut Snapshot)) -> bool {
        let mut committed = false;
        self.snapshot.send_if_modified(|current| {
            if !generation.try_commit(id) {
                return false;
            }
            let mut next = Snapshot::clone(current);
            update(&mut next);
            *current = Arc::new(next);
            committed = true;
            true
        });
        committed
    }

    async fn fetch_telemetry(&self, now: DateTime<Utc>, config: &AppConfig) -> Result<TelemetryInputs, EngineError> {
        let start = now - self.options.track_half_span;
        let end = now + self.options.track_half_span;
        let step = config.orbits.track_step_sec;
        let percentile = config.flux.percentile_default.as_str();
        let (state, track, flux, windows) = tokio::try_join!(
            self.source.get_state(Some(now)),
            self.source.get_track(start, end, Some(step)),
            self.source.get_flux(start, end, step, percentile),
            self.source.get_windows(start, end, step, percentile),
        )?;
        Ok(TelemetryInputs { state, track, flux, windows })
    }

    /// Runs one telemetry cycle. Returns whether its result was published.
    pub async fn refresh_telemetry(&self, now: DateTime<Utc>) -> Result<bool, EngineError> {
        let id = self.telemetry_gen.begin();
        log::debug!("Telemetry refresh #{} at {}", id, now);

        let result = async {
            let config = self.cycle_config().await?;
            let inputs = self.fetch_telemetry(now, &config).await?;
            compute_telemetry(now, inputs, &config, self.options.opacity)
        }
        .await;

        match result {
            Ok(frame) => {
                let frame = Arc::new(frame);
                let position = interpolate_position(&frame.track, now);
                let summary = (frame.track.len(), frame.risk.len(), frame.mode.mode.label());
                let committed = self.publish(&self.telemetry_gen, id, |snap| {
                    if position.is_some() {
                        snap.position = position;
                    }
                    snap.telemetry = Some(frame);
                    snap.telemetry_error = None;
                });
                if committed {
                    log::info!(
                        "Telemetry #{} committed: {} track points, {} risk samples, mode {}",
                        id,
                        summary.0,
                        summary.1,
                        summary.2
                    );
                } else {
                    log::debug!("Telemetry #{} superseded, dropped", id);
                }
                Ok(committed)
            }
            Err(e) => {
                log::warn!("Telemetry refresh #{} failed: {}", id, e);
                let message = e.to_string();
                // Also commits the generation: an older cycle still in flight
                // can no longer publish after a newer one has failed.
                self.publish(&self.telemetry_gen, id, |snap| snap.telemetry_error = Some(message));
                Err(e)
            }
        }
    }

    /// Runs one grid cycle. Returns whether its result was published.
    pub async fn refresh_grid(&self, now: DateTime<Utc>) -> Result<bool, EngineError> {
        let id = self.grid_gen.begin();
        log::debug!("Grid refresh #{} at {}", id, now);

        let result = async {
            let config = self.cycle_config().await?;
            let channel = self
                .options
                .grid_channel
                .clone()
                .unwrap_or_else(|| config.flux.first_channel());
            let alt_km = config.flux.default_alt_km();
            let grid = self
                .source
                .get_flux_grid(now, &channel, &config.flux.percentile_default, alt_km)
                .await?;
            compute_heatmap(&grid, alt_km)
        }
        .await;

        match result {
            Ok(frame) => {
                let has_image = frame.image.is_some();
                let stats = frame.stats;
                let channel = frame.channel.clone();
                let frame = Arc::new(frame);
                let committed = self.publish(&self.grid_gen, id, |snap| {
                    snap.heatmap = Some(frame);
                    snap.grid_error = None;
                });
                if committed {
                    log::info!(
                        "Grid #{} committed: {} range [{:.3e}, {:.3e}]{}",
                        id,
                        channel,
                        stats.min,
                        stats.max,
                        if has_image { "" } else { ", no image" }
                    );
                }
                Ok(committed)
            }
            Err(e) => {
                log::warn!("Grid refresh #{} failed: {}", id, e);
                let message = e.to_string();
                self.publish(&self.grid_gen, id, |snap| snap.grid_error = Some(message));
                Err(e)
            }
        }
    }

    /// Re-interpolates the position from the committed track. When `now` is
    /// outside the track the last position is kept.
    pub fn tick(&self, now: DateTime<Utc>) -> Option<SmoothPos> {
        let current = self.snapshot();
        let position = current
            .telemetry
            .as_ref()
            .and_then(|frame| interpolate_position(&frame.track, now));
        if let Some(pos) = position {
            self.snapshot.send_modify(|snap| {
                let mut next = Snapshot::clone(snap);
                next.position = Some(pos);
                *snap = Arc::new(next);
            });
        }
        position.or(current.position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub refresh: Duration,
    pub grid: Duration,
    pub tick: Duration,
}

impl Default for Cadence {
    fn default() -> Self {
        Self {
            refresh: Duration::from_millis(15_000),
            grid: Duration::from_millis(60_000),
            tick: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Telemetry,
    Grid,
    Tick,
}

/// The three periodic tasks. Dropping this stops all of them.
pub struct Timers {
    handles: HashMap<TimerKind, JoinHandle<()>>,
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Interval loop that runs each `cycle` as a child task. The children live in
/// a `JoinSet` owned by the loop, so aborting the loop cancels them too.
fn cycle_loop<F, Fut>(period: Duration, mut cycle: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = ticker(period);
        let mut in_flight = JoinSet::new();
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    in_flight.spawn(cycle());
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }
    })
}

impl Timers {
    /// Spawns the timers. Each refresh cycle runs as its own task so a slow
    /// fetch never delays the next tick; stale results are dropped by the
    /// generation check. Stopping a timer also cancels its pending cycles.
    pub fn start<S: TelemetrySource + 'static>(engine: Arc<Engine<S>>, cadence: Cadence) -> Self {
        let mut handles = HashMap::new();

        let telemetry_engine = engine.clone();
        handles.insert(
            TimerKind::Telemetry,
            cycle_loop(cadence.refresh, move || {
                let engine = telemetry_engine.clone();
                async move {
                    let _ = engine.refresh_telemetry(Utc::now()).await;
                }
            }),
        );

        let grid_engine = engine.clone();
        handles.insert(
            TimerKind::Grid,
            cycle_loop(cadence.grid, move || {
                let engine = grid_engine.clone();
                async move {
                    let _ = engine.refresh_grid(Utc::now()).await;
                }
            }),
        );

        handles.insert(
            TimerKind::Tick,
            tokio::spawn(async move {
                let mut interval = ticker(cadence.tick);
                loop {
                    interval.tick().await;
                    engine.tick(Utc::now());
                }
            }),
        );

        log::info!(
            "Timers started: refresh {:?}, grid {:?}, tick {:?}",
            cadence.refresh,
            cadence.grid,
            cadence.tick
        );
        Self { handles }
    }

    /// Stops one timer. Returns false if it was not running.
    pub fn stop(&mut self, kind: TimerKind) -> bool {
        match self.handles.remove(&kind) {
            Some(handle) => {
                handle.abort();
                log::debug!("Timer {:?} stopped", kind);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, kind: TimerKind) -> bool {
        self.handles.get(&kind).is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}
