//! cellsense - cellular signal tracker
//!
//! Polls an LTE modem for serving and neighbor cells, publishes location
//! fixes and handover recommendations.
//!
//! # Usage
//!
//! ```bash
//! # Track with a Quectel module on its AT port
//! cellsense --device /dev/ttyUSB2
//!
//! # Drive past simulated towers, no hardware needed
//! cellsense --simulate
//!
//! # Locate from a fingerprint table and use a trained handover model
//! cellsense --fingerprints data/fingerprints.json --model data/handover_model.json
//! ```
//!
//! # Environment Variables
//!
//! - `CELLSENSE_CONFIG`: Path to the TOML config (default: ./cellsense.toml)
//! - `CELLSENSE_DEVICE`: Serial device override
//! - `RUST_LOG`: Logging level (default: info)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cellsense::acquisition::{ModemLink, UnsolicitedMessage};
use cellsense::config::TrackerConfig;
use cellsense::handover::load_model;
use cellsense::{
    EventBus, FingerprintEngine, HandoverEngine, ModemCellSource, ModemChannel, PollingLoop,
    SerialLink, SimulatedLink, TrackerEvent, TrackerState,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "cellsense")]
#[command(about = "Cellular signal tracking, fingerprint geolocation and handover prediction")]
#[command(version)]
struct CliArgs {
    /// TOML config file (overrides the CELLSENSE_CONFIG search order)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Serial device of the modem AT port (e.g. /dev/ttyUSB2)
    #[arg(long, env = "CELLSENSE_DEVICE")]
    device: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// Use the built-in modem simulator instead of a serial device
    #[arg(long)]
    simulate: bool,

    /// Fingerprint table (JSON) for geolocation
    #[arg(long, value_name = "PATH")]
    fingerprints: Option<PathBuf>,

    /// Handover sequence model (JSON)
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Poll interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Force a network rescan when a handover becomes imminent
    #[arg(long)]
    auto_handover: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

// ============================================================================
// Startup
// ============================================================================

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

/// Load the config file and apply command-line overrides.
fn load_config(args: &CliArgs) -> Result<TrackerConfig> {
    let mut config = match &args.config {
        Some(path) => TrackerConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TrackerConfig::load(),
    };

    if let Some(device) = &args.device {
        config.modem.device.clone_from(device);
    }
    if let Some(baud) = args.baud {
        config.modem.baud_rate = baud;
    }
    if let Some(path) = &args.fingerprints {
        config.geolocation.fingerprint_path = Some(path.display().to_string());
    }
    if let Some(path) = &args.model {
        config.handover.model_path = Some(path.display().to_string());
    }
    if let Some(interval_ms) = args.interval_ms {
        config.polling.interval_ms = interval_ms;
    }
    if args.auto_handover {
        config.polling.auto_handover = true;
    }

    config.validate().context("Invalid configuration after overrides")?;
    Ok(config)
}

/// Fingerprint engine, loaded from the configured table when there is one.
///
/// A table that fails to load leaves geolocation disabled.
fn build_geolocation(config: &TrackerConfig) -> FingerprintEngine {
    let mut engine = FingerprintEngine::new(config.geolocation.clone());
    if let Some(path) = &config.geolocation.fingerprint_path {
        match engine.load_fingerprints(Path::new(path)) {
            Ok(count) => info!(path = %path, fingerprints = count, "Fingerprint table loaded"),
            Err(e) => warn!(path = %path, error = %e, "Fingerprint table not loaded, geolocation disabled"),
        }
    } else {
        info!("No fingerprint table configured, geolocation disabled");
    }
    engine
}

/// Handover engine, with the learned model attached when it loads.
fn build_handover(config: &TrackerConfig) -> HandoverEngine {
    let mut engine = HandoverEngine::new(config.handover.clone());
    if let Some(path) = &config.handover.model_path {
        match load_model(Path::new(path)) {
            Ok(model) => {
                info!(path = %path, "Handover model loaded");
                engine.set_model(Some(Box::new(model)));
            }
            Err(e) => warn!(path = %path, error = %e, "Handover model not loaded, using rules only"),
        }
    }
    engine
}

fn build_link(args: &CliArgs, config: &TrackerConfig) -> Box<dyn ModemLink> {
    if args.simulate {
        info!(
            towers = config.simulation.towers.len(),
            speed_kmh = config.simulation.speed_kmh,
            "Input: simulated modem"
        );
        Box::new(SimulatedLink::new(config.simulation.clone()))
    } else {
        info!(device = %config.modem.device, baud = config.modem.baud_rate, "Input: serial modem");
        Box::new(SerialLink::from_config(&config.modem))
    }
}

/// Log what the modem reports about its network before polling starts.
async fn log_network(channel: &ModemChannel) {
    match channel.registration().await {
        Ok(reg) => info!(status = ?reg.status, tac = ?reg.tac, cell_id = ?reg.cell_id, "Registration"),
        Err(e) => warn!(error = %e, "Registration query failed"),
    }
    match channel.carrier().await {
        Ok(carrier) => info!(carrier = ?carrier, "Carrier"),
        Err(e) => debug!(error = %e, "Carrier query failed"),
    }
    match channel.preferred_bands().await {
        Ok(bands) => {
            let list: Vec<u16> = bands.iter().map(|b| b.band).collect();
            info!(bands = ?list, "Preferred LTE bands");
        }
        Err(e) => debug!(error = %e, "Band query failed"),
    }
}

// ============================================================================
// Subscribers
// ============================================================================

fn spawn_event_logger(mut rx: mpsc::Receiver<TrackerEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                TrackerEvent::MeasurementAvailable(report) => debug!(
                    cell_id = report.serving.cell_id,
                    pci = report.serving.pci,
                    rsrp = report.serving.rsrp,
                    neighbors = report.neighbors.len(),
                    "Measurement"
                ),
                TrackerEvent::LocationUpdated(fix) => info!(
                    lat = fix.latitude,
                    lon = fix.longitude,
                    confidence = fix.confidence,
                    uncertainty_m = fix.uncertainty_m,
                    "Location updated"
                ),
                TrackerEvent::HandoverRecommended(h) => info!(
                    target = ?h.target_cell_id,
                    target_rsrp = h.target_rsrp,
                    current_rsrp = h.current_rsrp,
                    reason = %h.reason,
                    source = ?h.source,
                    "Handover imminent"
                ),
                TrackerEvent::QualityChanged { previous, current } => {
                    info!(%previous, %current, "Signal quality changed");
                }
                TrackerEvent::ConnectionChanged { connected, source } => {
                    info!(connected, source = %source, "Source connection changed");
                }
            }
        }
    })
}

fn spawn_notification_logger(
    mut rx: broadcast::Receiver<UnsolicitedMessage>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                msg = rx.recv() => match msg {
                    Ok(UnsolicitedMessage::RegistrationChanged(reg)) => {
                        info!(status = ?reg.status, cell_id = ?reg.cell_id, "Registration changed");
                    }
                    Ok(other) => debug!(message = ?other, "Unsolicited"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Notification logger lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.log_json);

    let config = load_config(&args)?;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  cellsense - Cellular Signal Tracker");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let link = build_link(&args, &config);
    let channel = Arc::new(ModemChannel::new(link, config.modem.clone()));
    channel.connect().await.context("Failed to connect to modem")?;
    if let Some(identity) = channel.identity().await {
        info!(
            manufacturer = %identity.manufacturer,
            model = %identity.model,
            firmware = %identity.firmware,
            "Modem connected"
        );
    }
    log_network(&channel).await;

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let events = Arc::new(EventBus::new());
    let event_logger = spawn_event_logger(events.subscribe(config.polling.event_capacity));
    let notification_logger =
        spawn_notification_logger(channel.notifications(), cancel_token.clone());

    let state = Arc::new(RwLock::new(TrackerState::default()));
    if args.simulate {
        state.write().await.velocity_kmh = config.simulation.speed_kmh;
    }

    let polling_loop = PollingLoop::new(
        config.polling.clone(),
        build_geolocation(&config),
        build_handover(&config),
        Arc::clone(&state),
        Arc::clone(&events),
        cancel_token.clone(),
    );
    let source_name = if args.simulate { "simulator" } else { "modem" };
    let mut source = ModemCellSource::new(Arc::clone(&channel), source_name);
    let stats = polling_loop.run(&mut source).await;

    channel.disconnect().await;
    drop(events);
    event_logger.await.ok();
    notification_logger.await.ok();

    let channel_stats = channel.stats();
    info!(
        cycles = stats.cycles,
        errors = stats.errors,
        handovers = stats.handovers_recommended,
        commands = channel_stats.commands_sent,
        timeouts = channel_stats.timeouts,
        reconnections = channel_stats.reconnections,
        "cellsense shutdown complete"
    );
    Ok(())
}
