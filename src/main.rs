//! Command-line host for the risk track engine.
//!
//! - `run`: keep the three refresh timers going until Ctrl-C
//! - `snapshot`: one full pipeline pass written to disk
//! - `export-plan`: download the observation plan CSV
//! - `config`: show or edit the backend configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use risk_track::client::{BackendClient, TelemetrySource};
use risk_track::config::{set_json_path, AppConfig};
use risk_track::engine::{HeatmapFrame, TimerKind};
use risk_track::interpolate::SmoothPos;
use risk_track::mode::ModeState;
use risk_track::plan::{parse_plan, total_on_seconds};
use risk_track::segment::SegmentedTrack;
use risk_track::settings::Settings;
use risk_track::time::{parse_instant, to_iso};
use risk_track::{Engine, Timers};

#[derive(Parser, Debug)]
#[command(name = "risk-track")]
#[command(about = "Risk-aware orbit track rendering engine")]
#[command(version, long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("RISK_TRACK_BUILD"), ")"))]
struct Args {
    /// Settings file (JSON); missing fields use defaults
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Backend base URL, overrides the settings file
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Energy channel for the heatmap grid
    #[arg(long, global = true)]
    grid_channel: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the refresh timers and log frames until Ctrl-C
    Run,

    /// Run one full pipeline pass and write heatmap.png and frame.json
    Snapshot {
        /// Output directory
        #[arg(long)]
        out: PathBuf,

        /// Evaluation instant (ISO-8601), defaults to the current time
        #[arg(long)]
        now: Option<String>,
    },

    /// Download the observation plan CSV
    ExportPlan {
        /// Plan start (ISO-8601), defaults to the current time
        #[arg(long)]
        start: Option<String>,

        /// Plan length in hours
        #[arg(long, default_value = "24")]
        hours: u32,

        /// Output CSV file
        #[arg(long)]
        out: PathBuf,
    },

    /// Show or update the backend configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the current backend configuration
    Show,

    /// Update dotted config paths, e.g. `decision.r_off=4.5`
    Set {
        #[arg(required = true)]
        assignments: Vec<String>,
    },
}

/// Contents of `frame.json`.
#[derive(Serialize)]
struct FrameReport<'a> {
    now: String,
    mode: Option<&'a ModeState>,
    position: Option<SmoothPos>,
    position_ecef_m: Option<[f64; 3]>,
    segments: Option<&'a SegmentedTrack>,
    heatmap: Option<&'a HeatmapFrame>,
    telemetry_error: Option<&'a str>,
    grid_error: Option<&'a str>,
}

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    let settings = load_settings(&args)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(dispatch(args.command, settings))
}

fn load_settings(args: &Args) -> Result<Settings> {
    let mut settings = match &args.settings {
        Some(path) => Settings::load(path).with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    if let Some(url) = &args.base_url {
        settings.base_url = url.clone();
    }
    if let Some(channel) = &args.grid_channel {
        settings.grid_channel = Some(channel.clone());
    }
    settings.validate()?;
    Ok(settings)
}

fn parse_time_arg(raw: Option<&str>) -> Result<DateTime<Utc>> {
    match raw {
        Some(s) => parse_instant(s).with_context(|| format!("Invalid time {:?}", s)),
        None => Ok(Utc::now()),
    }
}

async fn dispatch(command: Command, settings: Settings) -> Result<()> {
    let client = BackendClient::new(&settings.base_url, settings.request_timeout())
        .context("Failed to build HTTP client")?;
    log::debug!("Backend at {}", client.base_url());

    match command {
        Command::Run => run(client, &settings).await,
        Command::Snapshot { out, now } => snapshot(client, &settings, &out, parse_time_arg(now.as_deref())?).await,
        Command::ExportPlan { start, hours, out } => {
            export_plan(&client, parse_time_arg(start.as_deref())?, hours, &out).await
        }
        Command::Config { action: ConfigAction::Show } => {
            let response = client.get_config().await.context("Failed to fetch config")?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Command::Config { action: ConfigAction::Set { assignments } } => set_config(&client, &assignments).await,
    }
}

async fn run(client: BackendClient, settings: &Settings) -> Result<()> {
    let engine = Arc::new(Engine::new(client, settings.engine_options()));
    if let Err(e) = engine.load_config().await {
        log::warn!("Backend config unavailable, retrying on each refresh: {}", e);
    }

    let mut frames = engine.subscribe();
    let mut timers = Timers::start(engine.clone(), settings.cadence());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl-C")?;
                log::info!("Shutting down");
                break;
            }
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = frames.borrow_and_update().clone();
                if let (Some(frame), Some(pos)) = (snap.telemetry.as_ref(), snap.position) {
                    log::debug!(
                        "{} lat {:.3} lon {:.3} alt {:.1} km",
                        frame.mode.mode.label(),
                        pos.lat,
                        pos.lon,
                        pos.alt_km
                    );
                }
            }
        }
    }

    for kind in [TimerKind::Tick, TimerKind::Grid, TimerKind::Telemetry] {
        timers.stop(kind);
    }
    Ok(())
}

async fn snapshot(client: BackendClient, settings: &Settings, out: &Path, now: DateTime<Utc>) -> Result<()> {
    let engine = Engine::new(client, settings.engine_options());
    engine.load_config().await.context("Failed to fetch backend config")?;
    engine
        .refresh_telemetry(now)
        .await
        .context("Telemetry refresh failed")?;
    if let Err(e) = engine.refresh_grid(now).await {
        log::warn!("Continuing without heatmap: {}", e);
    }

    std::fs::create_dir_all(out).with_context(|| format!("Failed to create {}", out.display()))?;
    let snap = engine.snapshot();

    if let Some(image) = snap.heatmap.as_ref().and_then(|h| h.image.as_ref()) {
        let path = out.join("heatmap.png");
        std::fs::write(&path, image.encode_png()?).with_context(|| format!("Failed to write {}", path.display()))?;
        log::info!("Wrote {} ({}x{})", path.display(), image.width, image.height);
    }

    let telemetry = snap.telemetry.as_deref();
    let report = FrameReport {
        now: to_iso(&now),
        mode: telemetry.map(|t| &t.mode),
        position: snap.position,
        position_ecef_m: snap.position.map(|p| p.ecef_m()),
        segments: telemetry.map(|t| &t.segments),
        heatmap: snap.heatmap.as_deref(),
        telemetry_error: snap.telemetry_error.as_deref(),
        grid_error: snap.grid_error.as_deref(),
    };
    let path = out.join("frame.json");
    std::fs::write(&path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!("Wrote {}", path.display());
    Ok(())
}

async fn export_plan(client: &BackendClient, start: DateTime<Utc>, hours: u32, out: &Path) -> Result<()> {
    let bytes = client
        .export_observation_plan(start, hours)
        .await
        .context("Failed to export observation plan")?;
    std::fs::write(out, &bytes).with_context(|| format!("Failed to write {}", out.display()))?;

    let items = parse_plan(&bytes)?;
    for item in &items {
        log::info!(
            "{} {} -> {} ({:.0} s) {}",
            item.mode.label(),
            to_iso(&item.on_utc),
            to_iso(&item.off_utc),
            item.duration_sec,
            item.reason
        );
    }
    log::info!(
        "Wrote {}: {} ON intervals, {:.1} h observing in {} h",
        out.display(),
        items.len(),
        total_on_seconds(&items) / 3600.0,
        hours
    );
    Ok(())
}

async fn set_config(client: &BackendClient, assignments: &[String]) -> Result<()> {
    let current = client.get_config().await.context("Failed to fetch config")?;
    let mut doc = serde_json::to_value(&current.config)?;
    for assignment in assignments {
        let Some((path, value)) = assignment.split_once('=') else {
            bail!("Expected KEY=VALUE, got {:?}", assignment);
        };
        set_json_path(&mut doc, path.trim(), value.trim()).map_err(anyhow::Error::msg)?;
    }
    let config: AppConfig = serde_json::from_value(doc).context("Edited config no longer decodes")?;
    let updated = client.update_config(&config).await.context("Failed to update config")?;
    log::info!("Config updated: version {} -> {}", current.version, updated.version);
    Ok(())
}
