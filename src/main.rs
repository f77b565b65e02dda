//! dbus-idle - print how long the user session has been idle.

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use dbus_idle::BackendChoice;
use dbus_idle::IdleMonitor;
use dbus_idle::IdleThreshold;
use dbus_idle::Registry;
use dbus_idle::config::RunConfig;
use serde::Serialize;
use tracing::debug;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Get idle time from various backends.
///
/// Prints the number of seconds since the last keyboard or mouse input.
#[derive(Parser, Debug)]
#[command(name = "dbus-idle")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend to use: "best" tries each one in priority order.
    #[arg(long, default_value = "best")]
    backend: BackendChoice,

    /// Seconds of inactivity after which the session counts as idle.
    #[arg(long, default_value_t = IdleThreshold::DEFAULT_SECONDS)]
    threshold: u64,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    /// Print a JSON report instead of the bare number.
    #[arg(long)]
    json: bool,

    /// List known backends in priority order and exit.
    #[arg(long)]
    list_backends: bool,
}

impl From<&Args> for RunConfig {
    fn from(args: &Args) -> Self {
        Self {
            backend: args.backend.clone(),
            threshold: IdleThreshold::from_secs(args.threshold),
            debug: args.debug,
            json: args.json,
        }
    }
}

/// JSON output of `--json`.
#[derive(Debug, Serialize)]
struct Report {
    backend: &'static str,
    idle_seconds: f64,
    threshold: IdleThreshold,
    idle: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = RunConfig::from(&args);

    init_logging(config.debug)?;
    debug!("dbus-idle v{} starting", env!("CARGO_PKG_VERSION"));

    let registry = Registry::with_defaults();

    if args.list_backends {
        for name in registry.names() {
            println!("{name}");
        }
        return Ok(());
    }

    if let Err(e) = run(&registry, &config).await {
        error!("Failed to get idle time: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Initialize logging on stderr; stdout carries only the answer.
///
/// `RUST_LOG` wins over `--debug` when set.
fn init_logging(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "error" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("dbus_idle={level}")))
        .context("Invalid log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

/// Select a backend, query it once and print the result.
async fn run(registry: &Registry, config: &RunConfig) -> Result<()> {
    let mut monitor = IdleMonitor::select(registry, config.threshold, &config.backend)
        .await
        .with_context(|| format!("No usable backend for '{}'", config.backend))?;

    let idle_seconds = monitor.idle_seconds().await;

    if config.json {
        let report = Report {
            backend: monitor.backend_name(),
            idle_seconds,
            threshold: monitor.threshold(),
            idle: dbus_idle::idle::exceeds_threshold(idle_seconds, monitor.threshold()),
        };
        println!(
            "{}",
            serde_json::to_string(&report).context("Failed to serialize report")?
        );
    } else {
        println!("{idle_seconds:.3}");
    }

    Ok(())
}
