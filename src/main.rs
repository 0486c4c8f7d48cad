use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use inspection_sync::config::Config;
use inspection_sync::db::{to_db_timestamp, Database};
use inspection_sync::logging;
use inspection_sync::store::RecordStore;
use inspection_sync::sync::{
    BackoffPolicy, Connectivity, DrainOutcome, HttpRemote, SyncDrainer, SyncQueue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Status,
    Drain,
    Check,
    ResetQueue,
}

struct Args {
    command: Command,
    config_path: Option<PathBuf>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        command: Command::Status,
        config_path: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("inspection-sync {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--status" | "-s" => parsed.command = Command::Status,
            "--drain" | "-d" => parsed.command = Command::Drain,
            "--check" => parsed.command = Command::Check,
            "--reset-queue" => parsed.command = Command::ResetQueue,
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!(
        r#"inspection-sync - Inspect and drain the local photo sync queue

USAGE:
    inspection-sync [OPTIONS]

OPTIONS:
    --status, -s        Show store and queue state (default)
    --drain, -d         Run one drain cycle against the remote
    --check             Report photos and inspections that disagree
    --reset-queue       Discard every pending edit
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    INSPECTION_SYNC_CONFIG   Path to config file (overrides default location)
    INSPECTION_SYNC_LOG      Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/inspection-sync/config.toml

See also: inspection-sync-daemon --help"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    let _ = logging::init(Some(Config::config_dir().join("logs")));

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // A degraded memory store would only show an empty queue here.
    let db = Arc::new(
        Database::open(&config.database)
            .with_context(|| format!("Failed to open {}", config.database.sqlite_path.display()))?,
    );

    match args.command {
        Command::Status => status(db, &config).await,
        Command::Drain => drain(db, &config).await,
        Command::Check => check(db).await,
        Command::ResetQueue => reset_queue(db).await,
    }
}

async fn status(db: Arc<Database>, config: &Config) -> Result<()> {
    let store = RecordStore::new(db.clone());
    let queue = SyncQueue::new(db.clone());
    let policy = BackoffPolicy::from_config(&config.sync);

    println!("Backend:      {}", db.backend_name());
    let inspections = store.list_inspections().await?;
    println!("Inspections:  {}", inspections.len());
    if let Some(latest) = store.get_most_recent_inspection().await? {
        println!("Most recent:  {} ({})", latest.address, latest.id);
    }

    let items = queue.list_pending().await?;
    println!("Queued edits: {}", items.len());
    for item in items {
        let next = item.backoff_anchor()
            + chrono::Duration::from_std(policy.delay_for(item.retries))
                .unwrap_or_else(|_| chrono::Duration::zero());
        println!(
            "  {}  rev {}  retries {}  next attempt {}",
            item.id,
            item.revision,
            item.retries,
            to_db_timestamp(&next)
        );
    }
    Ok(())
}

async fn drain(db: Arc<Database>, config: &Config) -> Result<()> {
    let remote = Arc::new(HttpRemote::from_config(&config.remote));
    let connectivity = Connectivity::new(remote.ping().await);
    if !connectivity.is_online() {
        println!("Remote {} is unreachable, nothing sent", config.remote.endpoint);
        return Ok(());
    }

    let drainer = SyncDrainer::new(
        SyncQueue::new(db),
        remote,
        connectivity,
        BackoffPolicy::from_config(&config.sync),
    );

    match drainer.drain().await {
        DrainOutcome::Completed(report) => {
            println!(
                "Examined {}: {} applied, {} stale, {} retrying, {} failed, {} deferred, {} errors",
                report.examined,
                report.applied,
                report.stale,
                report.retrying,
                report.failed,
                report.deferred,
                report.errors
            );
        }
        other => println!("Drain skipped: {:?}", other),
    }
    Ok(())
}

async fn check(db: Arc<Database>) -> Result<()> {
    let store = RecordStore::new(db);
    let violations = store.check_consistency().await?;
    if violations.is_empty() {
        println!("Store is consistent");
    } else {
        for violation in &violations {
            println!("{}", violation);
        }
        println!("{} problem(s) found", violations.len());
    }
    Ok(())
}

async fn reset_queue(db: Arc<Database>) -> Result<()> {
    let removed = SyncQueue::new(db).clear().await?;
    println!("Removed {} queued edit(s)", removed);
    Ok(())
}
