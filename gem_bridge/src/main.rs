//! # GEM Bridge Binary
//!
//! Runs the signal monitoring engine against the configured controller.
//!
//! # Usage
//!
//! ```bash
//! # Run with the settings file (simulation driver by default)
//! gem_bridge run --config config/bridge.toml
//!
//! # Verbose JSON logs, also written to a daily rolling file
//! gem_bridge -v --json run --config config/bridge.toml --log-dir /var/log/gem_bridge
//!
//! # Validate both documents and print the registries
//! gem_bridge check --config config/bridge.toml
//! ```

use clap::{Parser, Subcommand};
use gem_bridge::Engine;
use gem_common::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{Level, error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// GEM Bridge - PLC signal monitoring and call-back execution engine
#[derive(Parser, Debug)]
#[command(name = "gem_bridge")]
#[command(version)]
#[command(about = "PLC signal monitoring and call-back execution engine")]
#[command(long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the engine and run until Ctrl-C
    Run {
        /// Path to the bridge settings file
        #[arg(short, long, default_value = "config/bridge.toml")]
        config: PathBuf,

        /// Also write logs to a daily rolling file in this directory
        #[arg(long, value_name = "DIR")]
        log_dir: Option<PathBuf>,

        /// Seconds between diagnostics snapshots in the log (0 disables)
        #[arg(long, default_value_t = 60)]
        diag_interval: u64,
    },
    /// Load and validate the settings and equipment documents
    Check {
        /// Path to the bridge settings file
        #[arg(short, long, default_value = "config/bridge.toml")]
        config: PathBuf,
    },
}

/// Host session stand-in that logs outbound reports.
struct LoggingHost;

impl HostProtocol for LoggingHost {
    fn send_event_report(&self, report: &EventReport) -> Result<(), HostError> {
        let payload = serde_json::to_string(&report.reports).map_err(|e| HostError::Transport(e.to_string()))?;
        info!(event = %report.event_name, ceid = report.ceid, reports = %payload, "S6F11 event report");
        Ok(())
    }

    fn send_alarm_report(&self, report: &AlarmReport) -> Result<(), HostError> {
        info!(
            alarm_id = report.alarm_id,
            alarm_code = report.alarm_code,
            text = %report.alarm_text,
            occurred = report.occurred,
            "S5F1 alarm report"
        );
        Ok(())
    }
}

fn main() {
    if let Err(e) = run() {
        error!("GEM bridge failed: {}", e);
        eprintln!("gem_bridge: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    match &args.command {
        Command::Run {
            config,
            log_dir,
            diag_interval,
        } => {
            let loaded = BridgeConfig::load_resolved(config);
            let _guard = setup_tracing(&args, loaded.as_ref().ok(), log_dir.as_deref())?;
            run_engine(loaded?, *diag_interval)
        }
        Command::Check { config } => {
            let loaded = BridgeConfig::load_resolved(config);
            let _guard = setup_tracing(&args, loaded.as_ref().ok(), None)?;
            check(loaded?)
        }
    }
}

fn run_engine(config: BridgeConfig, diag_interval: u64) -> Result<(), Box<dyn std::error::Error>> {
    info!("GEM bridge v{} starting...", env!("CARGO_PKG_VERSION"));
    let engine = Engine::from_config(config, Arc::new(LoggingHost))?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        flag.store(false, Ordering::SeqCst);
    })?;

    engine.start()?;
    info!(workers = ?engine.worker_names(), "GEM bridge running");

    let interval = Duration::from_secs(diag_interval);
    let mut last_diag = Instant::now();
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
        if !interval.is_zero() && last_diag.elapsed() >= interval {
            last_diag = Instant::now();
            let snapshot = serde_json::to_string(&engine.diagnostics())?;
            info!(diagnostics = %snapshot, "Engine diagnostics");
        }
    }

    engine.stop()?;
    info!("GEM bridge shutdown complete");
    Ok(())
}

fn check(config: BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::from_config(config, Arc::new(LoggingHost))?;
    info!("Configuration is valid");
    println!("{}", serde_json::to_string_pretty(&engine.diagnostics())?);
    Ok(())
}

/// Setup tracing from CLI flags, `RUST_LOG` and the configured log level.
fn setup_tracing(
    args: &Args,
    config: Option<&BridgeConfig>,
    log_dir: Option<&Path>,
) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let default_directive = config
        .map(|c| c.shared.log_level.as_directive())
        .unwrap_or("info");
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    if args.verbose {
        filter = filter.add_directive(Level::DEBUG.into());
    }

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "gem_bridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if args.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    Ok(guard)
}
