//! # Bike Pulse Application Entry Point
//!
//! This binary wires the pulse pipeline together: it loads configuration,
//! polls the station feed, keeps the map engine's station source in sync and
//! repaints the pulse markers on a fixed frame clock.
//! It supports both live map mode and development mode (ASCII output via `--stdout`).

// Test modules
#[cfg(test)]
mod tests;

use anyhow::Context;
use bike_pulse_lib::config::Config;
use bike_pulse_lib::engine::{AnimatedImage, MapEngine, MapError};
use bike_pulse_lib::feed::{fetch_stations, ReqwestClient};
use bike_pulse_lib::headless::HeadlessMap;
use bike_pulse_lib::map_sync::MapSyncAdapter;
use bike_pulse_lib::poller::DataPoller;
use bike_pulse_lib::renderer::{
    draw_icon_ascii, draw_legend, draw_stats_panel, format_icon_ascii, format_legend,
    format_stats_panel, format_station,
};
use bike_pulse_lib::risk::RiskCategory;
use bike_pulse_lib::{NetworkState, StationSnapshot};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Stations listed in the development report.
const AT_RISK_LISTED: usize = 5;
/// Animation time at which development mode samples the marker frames.
const FRAME_PREVIEW_MS: u64 = 400;

#[derive(Parser, Debug)]
#[command(name = "bike-pulse")]
#[command(about = "Live bike-share map with risk-pulsing station markers", long_about = None)]
struct Cli {
    /// Configuration file (defaults to bike-pulse.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Development mode: poll once, print stats, legend and icon frames, then exit
    #[arg(long)]
    stdout: bool,

    /// Stop live mode after this many repaints
    #[arg(long, value_name = "N")]
    frames: Option<u64>,
}

/// Messages from the poller task to the main loop.
#[derive(Debug)]
enum PollEvent {
    Stations(Vec<StationSnapshot>),
    Failed(String),
}

/// Everything the main loop owns: the adapter (and through it the engine),
/// the last good network state, and the last poll error.
struct Dashboard<E: MapEngine> {
    adapter: MapSyncAdapter<E>,
    state: Option<NetworkState>,
    last_error: Option<String>,
}

impl<E: MapEngine> Dashboard<E> {
    fn new(adapter: MapSyncAdapter<E>) -> Self {
        Self {
            adapter,
            state: None,
            last_error: None,
        }
    }

    /// Fold one poll outcome into the dashboard.
    ///
    /// A failure keeps the previous state and markers untouched.
    fn apply(&mut self, event: PollEvent) -> Result<(), MapError> {
        match event {
            PollEvent::Stations(stations) => {
                let state = NetworkState::from_snapshots(stations);
                self.adapter.update_data(&state.stations)?;
                let stats = &state.stats;
                info!(
                    stations = stats.total_stations,
                    bikes = stats.total_bikes,
                    capacity = stats.total_capacity,
                    critical = stats.critical_count,
                    low = stats.low_count,
                    healthy = stats.healthy_count,
                    load_percent = stats.system_load_percent,
                    "Network updated"
                );
                self.state = Some(state);
                self.last_error = None;
            }
            PollEvent::Failed(message) => {
                error!(error = %message, "Failed to fetch station data");
                self.last_error = Some(message);
            }
        }
        Ok(())
    }
}

impl Dashboard<HeadlessMap> {
    fn repaint(&mut self, elapsed_ms: u64) -> bool {
        self.adapter
            .engine_mut()
            .map(|map| map.repaint(elapsed_ms))
            .unwrap_or(false)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_filter(filter);
    tracing_subscriber::registry().with(stderr_layer).init();
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // Load .env file
    init_tracing();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    config.apply_env_overrides();
    config.validate()?;

    // Create Tokio runtime for async operations
    let rt = tokio::runtime::Runtime::new()?;

    // Development mode: ASCII output for testing
    if cli.stdout {
        return rt.block_on(run_development(&config));
    }

    rt.block_on(run_live(&config, cli.frames))
}

/// Poll once and print the stats panel, legend and one frame of each marker.
async fn run_development(config: &Config) -> anyhow::Result<()> {
    let client = ReqwestClient::new(config.request_timeout())?;
    let url = config.stations_url();
    let stations = fetch_stations(&client, &url)
        .await
        .with_context(|| format!("fetching {}", url))?;
    let state = NetworkState::from_snapshots(stations);

    draw_stats_panel(&state.stats, Utc::now());
    println!();
    draw_legend(&state.stats);
    println!();

    let mut adapter = MapSyncAdapter::new(config.pulse.styles(), config.pulse.icon_size);
    adapter
        .initialize(HeadlessMap::new())
        .map_err(MapError::from)?;
    adapter.update_data(&state.stations)?;
    if let Some(map) = adapter.engine_mut() {
        map.repaint(FRAME_PREVIEW_MS);
        for category in RiskCategory::ALL {
            if let Some(image) = map.image(category.icon_name()) {
                let (width, height) = image.dimensions();
                println!("{} ({})", category.icon_name(), category.label());
                draw_icon_ascii(image.pixels(), width, height);
            }
        }
    }
    adapter.teardown();

    print!("{}", format_at_risk(&state));
    Ok(())
}

/// The most at-risk stations, worst first.
fn format_at_risk(state: &NetworkState) -> String {
    let mut critical: Vec<&StationSnapshot> = state
        .stations
        .iter()
        .filter(|station| station.risk_category == RiskCategory::Critical)
        .collect();
    critical.sort_by(|a, b| b.risk.total_cmp(&a.risk).then_with(|| a.id.cmp(&b.id)));

    let mut out = format!("Most at risk ({} critical)\n", critical.len());
    for station in critical.into_iter().take(AT_RISK_LISTED) {
        out.push_str(&format!("  {}\n", format_station(station)));
    }
    out
}

/// Full text status of the dashboard, as printed on shutdown.
fn format_status(dashboard: &Dashboard<HeadlessMap>, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    match &dashboard.state {
        Some(state) => {
            out.push_str(&format_stats_panel(&state.stats, now));
            out.push_str(&format_legend(&state.stats));
        }
        None => out.push_str("No station data yet\n"),
    }
    if let Some(message) = &dashboard.last_error {
        out.push_str(&format!("Last error: {}\n", message));
    }
    if let Some(map) = dashboard.adapter.engine() {
        if let Some(image) = map.image(RiskCategory::Critical.icon_name()) {
            let (width, height) = image.dimensions();
            out.push_str(&format_icon_ascii(image.pixels(), width, height));
        }
    }
    out
}

/// Run the live map until Ctrl-C or the frame limit.
async fn run_live(config: &Config, frame_limit: Option<u64>) -> anyhow::Result<()> {
    config.require_access_token()?;
    let layer = MapSyncAdapter::<HeadlessMap>::marker_layer();
    info!(
        center = ?config.map.center,
        zoom = config.map.zoom,
        icon_scale = layer.icon_size.at_zoom(config.map.zoom),
        feed = %config.stations_url(),
        "Starting live map"
    );
    debug!(style = %layer.to_style_json(), "Marker layer");

    let adapter = MapSyncAdapter::new(config.pulse.styles(), config.pulse.icon_size)
        .with_click_handler(|station| info!(station = %format_station(station), "Station selected"));
    let mut dashboard = Dashboard::new(adapter);
    dashboard
        .adapter
        .initialize(HeadlessMap::new())
        .map_err(MapError::from)?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let error_tx = tx.clone();
    let client = Arc::new(ReqwestClient::new(config.request_timeout())?);
    let mut poller = DataPoller::new(client, config.stations_url());
    poller.start(
        config.poll_interval(),
        move |stations| {
            let _ = tx.send(PollEvent::Stations(stations));
        },
        move |message| {
            let _ = error_tx.send(PollEvent::Failed(message));
        },
    )?;

    let mut repaint = time::interval(config.frame_interval());
    repaint.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let started = Instant::now();
    let mut frames = 0u64;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!(error = %e, "Could not listen for Ctrl-C");
                }
                info!("Shutdown requested");
                break;
            }
            Some(event) = rx.recv() => {
                if let Err(e) = dashboard.apply(event) {
                    error!(error = %e, "Failed to update map data");
                }
            }
            _ = repaint.tick() => {
                dashboard.repaint(started.elapsed().as_millis() as u64);
                frames += 1;
                if frame_limit.is_some_and(|limit| frames >= limit) {
                    info!(frames, "Frame limit reached");
                    break;
                }
            }
        }
    }

    // Stop the data clock before releasing the engine
    poller.stop().await;
    print!("{}", format_status(&dashboard, Utc::now()));
    drop(dashboard.adapter.teardown());
    Ok(())
}
