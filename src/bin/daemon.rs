//! Background sync service.
//!
//! Drains the local sync queue against the configured remote on a timer and
//! whenever the remote becomes reachable again. Reachability is probed via
//! the remote's health endpoint.
//!
//! ## Usage
//!
//! ```bash
//! inspection-sync-daemon              # Run in foreground
//! inspection-sync-daemon --once       # Drain once and exit
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use inspection_sync::config::Config;
use inspection_sync::db::Database;
use inspection_sync::logging;
use inspection_sync::sync::{
    BackoffPolicy, Connectivity, DrainOutcome, HttpRemote, SyncDrainer, SyncEvent, SyncQueue,
    SyncScheduler,
};

/// Daemon options
struct DaemonConfig {
    /// Drain interval override (seconds)
    interval: Option<u64>,
    /// Health probe interval (seconds)
    probe_interval: u64,
    /// Drain once and exit
    once: bool,
    /// Config path override
    config_path: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval: None,
            probe_interval: 10,
            once: false,
            config_path: None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let daemon_config = parse_args();

    logging::init_daemon()?;

    info!("Inspection sync daemon starting...");

    let config = match &daemon_config.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!("Config loaded");

    let db = Arc::new(
        Database::open_or_degraded(&config.database)
            .with_context(|| format!("Failed to open {}", config.database.sqlite_path.display()))?,
    );
    if db.is_degraded() {
        warn!("Running without durable storage; queued edits will not survive a restart");
    } else {
        info!("Database opened at {:?}", config.database.sqlite_path);
    }

    let remote = Arc::new(HttpRemote::from_config(&config.remote));
    let connectivity = Connectivity::new(remote.ping().await);
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let drainer = Arc::new(
        SyncDrainer::new(
            SyncQueue::new(db),
            remote.clone(),
            connectivity.clone(),
            BackoffPolicy::from_config(&config.sync),
        )
        .with_events(events_tx),
    );
    tokio::spawn(log_events(events_rx));

    if daemon_config.once {
        info!("Running in single-shot mode");
        match drainer.drain().await {
            DrainOutcome::Completed(report) => info!(?report, "Drain finished"),
            other => info!(?other, "Drain skipped"),
        }
        return Ok(());
    }

    let interval = daemon_config
        .interval
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.sync.interval());
    info!("Running in daemon mode, draining every {:?}", interval);

    tokio::spawn(probe_loop(
        remote,
        connectivity.clone(),
        Duration::from_secs(daemon_config.probe_interval),
    ));

    SyncScheduler::new(interval)
        .run(drainer, connectivity, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("Inspection sync daemon stopped");
    Ok(())
}

fn parse_args() -> DaemonConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = DaemonConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--once" | "-1" => {
                config.once = true;
            }
            "--interval" | "-i" => {
                if i + 1 < args.len() {
                    if let Ok(interval) = args[i + 1].parse() {
                        config.interval = Some(interval);
                    }
                    i += 1;
                }
            }
            "--probe-interval" => {
                if i + 1 < args.len() {
                    if let Ok(interval) = args[i + 1].parse() {
                        config.probe_interval = interval;
                    }
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config
}

fn print_help() {
    println!(
        r#"inspection-sync-daemon - Background sync for queued photo edits

USAGE:
    inspection-sync-daemon [OPTIONS]

OPTIONS:
    --once, -1              Drain the queue once and exit
    --interval, -i N        Drain interval in seconds (default: from config)
    --probe-interval N      Remote health probe interval in seconds (default: 10)
    --config, -c PATH       Path to config file
    --help, -h              Show this help message

ENVIRONMENT:
    INSPECTION_SYNC_CONFIG   Path to config file (overrides default location)
    INSPECTION_SYNC_LOG      Log level (trace, debug, info, warn, error)
"#
    );
}

/// Poll the remote's health endpoint and publish reachability.
async fn probe_loop(remote: Arc<HttpRemote>, connectivity: Connectivity, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        connectivity.set_online(remote.ping().await);
    }
}

async fn log_events(mut rx: mpsc::UnboundedReceiver<SyncEvent>) {
    while let Some(event) = rx.recv().await {
        match &event {
            SyncEvent::Failed { revision, retries, error, .. } => error!(
                photo_id = event.photo_id(),
                revision,
                retries,
                error = %error,
                "Edit will not reach the remote"
            ),
            _ => info!(photo_id = event.photo_id(), ?event, "Sync event"),
        }
    }
}
