//! PiPower Daemon (pipowerd)
//!
//! Polls the PiPower hat on two timers, caches the latest snapshot for
//! socket queries, publishes snapshots as events, and applies fan and GPIO
//! commands received over the socket.
//!
//! # Backends
//! - **Hardware**: sysfs 1-Wire, hwmon, IIO, GPIO and PWM
//! - **Simulated**: `--mock`, or automatically when the hardware backend
//!   cannot be brought up

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use pipower::config::{load_settings, settings_path, Settings};
use pipower::constants::{env, paths};
use pipower::events::{EventSink, FanoutSink, JsonLinesSink, TracingSink};
use pipower::hw::modules;
use pipower::poller::{run_timer, HatService, Timer};
use pipower::{server, BackendKind, Peripherals, PowerHat, SimulatedBoard};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "pipowerd")]
#[command(version)]
#[command(about = "PiPower hat telemetry and fan/GPIO control daemon")]
#[command(long_about = "PiPower hat telemetry and fan/GPIO control daemon

Samples temperatures, bus power, light level and GPIO inputs, drives the two
PWM fans and configured GPIO outputs, and serves snapshots over a Unix socket.

ENVIRONMENT VARIABLES:
    PIPOWER_CONFIG=<path>   Settings file location
    PIPOWER_LOG=debug       Log filter (trace, debug, info, warn, error)")]
struct Args {
    /// Settings file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Unix socket for queries and commands
    #[arg(short, long, default_value = paths::SOCKET)]
    socket: PathBuf,

    /// JSON-lines event log
    #[arg(short, long)]
    events: Option<PathBuf>,

    /// Use the simulated backend instead of real hardware
    #[arg(long)]
    mock: bool,

    /// Seed for the simulated backend
    #[arg(long, requires = "mock")]
    seed: Option<u64>,

    /// Print one snapshot as JSON and exit
    #[arg(long)]
    once: bool,
}

/// Initialize tracing: journald when available, otherwise stderr
fn init_logging() -> (String, bool) {
    let log_level = std::env::var(env::LOG).unwrap_or_else(|_| "info".to_string());
    let mut use_journald = Path::new(paths::JOURNALD_SOCKET).exists();

    if use_journald {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stderr", e);
                use_journald = false;
                tracing_subscriber::fmt()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_env_filter(&log_level)
                    .init();
            }
        }
    } else {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_env_filter(&log_level)
            .init();
    }
    (log_level, use_journald)
}

fn check_privileges() {
    // SAFETY: geteuid has no preconditions and only returns the effective uid
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        warn!("Not running as root (euid={}); sysfs writes will likely fail", euid);
    }
}

fn simulated(seed: Option<u64>) -> Peripherals {
    match seed {
        Some(seed) => SimulatedBoard::new(seed).build(),
        None => SimulatedBoard::from_entropy().build(),
    }
}

/// Build and initialize the hat, falling back to the simulated backend when
/// the hardware cannot be brought up
fn bring_up(args: &Args, settings: &Settings) -> Result<PowerHat> {
    if !args.mock {
        check_privileges();
        modules::load_w1_modules();
        match Peripherals::hardware(&settings.hardware) {
            Ok(peripherals) => {
                let hat = PowerHat::new(peripherals);
                match hat.initialize(settings) {
                    Ok(()) => return Ok(hat),
                    Err(e) => error!("Hardware backend failed to initialize: {}", e),
                }
            }
            Err(e) => error!("{}", e),
        }
        warn!("Falling back to simulated backend");
    }

    let hat = PowerHat::new(simulated(args.seed));
    hat.initialize(settings).context("simulated backend failed to initialize")?;
    Ok(hat)
}

fn event_sink(args: &Args) -> Arc<dyn EventSink> {
    let primary = args.events.clone().unwrap_or_else(|| PathBuf::from(paths::EVENT_LOG));
    let mut fanout = FanoutSink::new().with(Arc::new(TracingSink));
    match JsonLinesSink::open_with_fallback(&primary, Path::new(paths::EVENT_LOG_FALLBACK)) {
        Ok(sink) => {
            info!("STARTUP: Event log: {}", sink.path().display());
            fanout = fanout.with(Arc::new(sink));
        }
        Err(e) => warn!("Event log disabled: {}", e),
    }
    Arc::new(fanout)
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("SIGNAL: Received SIGINT"),
                _ = term.recv() => info!("SIGNAL: Received SIGTERM"),
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            info!("SIGNAL: Received SIGINT");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // PHASE 1: Arguments and logging
    let args = Args::parse();
    let (log_level, use_journald) = init_logging();
    info!("STARTUP: pipowerd {} starting", VERSION);
    let log_target = if use_journald { "systemd journal" } else { "stderr" };
    info!("STARTUP: Logging to {} (level {})", log_target, log_level);

    // PHASE 2: Settings
    let config_path = settings_path(args.config.as_deref());
    let settings = load_settings(&config_path)
        .with_context(|| format!("failed to load settings from {}", config_path.display()))?;
    info!("STARTUP: Settings: {}", config_path.display());

    // PHASE 3: Hardware
    let hat = Arc::new(bring_up(&args, &settings)?);
    if hat.backend() == BackendKind::Simulated && !args.mock {
        warn!("STARTUP: Running without hardware, readings are simulated");
    }

    if args.once {
        let snapshot = hat.read_all(&settings)?;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        hat.shutdown();
        return Ok(());
    }

    // PHASE 4: Service, first snapshot
    let service = Arc::new(
        HatService::new(Arc::clone(&hat), settings)
            .with_settings_path(&config_path)
            .with_sink(event_sink(&args)),
    );
    {
        let svc = Arc::clone(&service);
        match tokio::task::spawn_blocking(move || svc.refresh_cache()).await {
            Ok(Ok(_)) => info!("STARTUP: Initial snapshot cached"),
            Ok(Err(e)) => warn!("Initial snapshot failed: {}", e),
            Err(e) => warn!("Initial snapshot task failed: {}", e),
        }
    }

    // PHASE 5: Timers and signal handling
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cache_timer =
        tokio::spawn(run_timer(Arc::clone(&service), Timer::Cache, shutdown_rx.clone()));
    let publish_timer =
        tokio::spawn(run_timer(Arc::clone(&service), Timer::Publish, shutdown_rx.clone()));
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = signal_tx.send(true);
    });

    // PHASE 6: Serve until shutdown
    let result = server::run_server(&args.socket, Arc::clone(&service), shutdown_rx).await;
    let _ = shutdown_tx.send(true);
    let _ = cache_timer.await;
    let _ = publish_timer.await;

    // PHASE 7: Stop fans
    let stop = Arc::clone(&hat);
    if let Err(e) = tokio::task::spawn_blocking(move || stop.shutdown()).await {
        error!("Fan shutdown task failed: {}", e);
    }
    info!("SHUTDOWN: pipowerd stopped");

    result.context("socket server failed")
}
