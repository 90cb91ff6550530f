//! # Operation Queue Inspector
//!
//! Inspects and drains the persisted operation queue of a Haven database.
//!
//! ## Usage
//! ```bash
//! # List every queued operation
//! cargo run -p haven-sync --bin haven-queue -- list
//!
//! # Only failed ones
//! cargo run -p haven-sync --bin haven-queue -- list --status failed
//!
//! # Deliver pending operations against the configured base URL
//! cargo run -p haven-sync --bin haven-queue -- drain --batch 20
//!
//! # Use a specific database and config file
//! cargo run -p haven-sync --bin haven-queue -- count --db ./haven.db --config ./sync.toml
//! ```
//!
//! Logging follows `RUST_LOG` (default `info,sqlx=warn`).

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use haven_core::OperationStatus;
use haven_store::{SqliteStore, StoreConfig};
use haven_sync::{ConnectivityMonitor, HttpExecutor, OperationQueue, SyncConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    List,
    Count,
    Drain,
    Clear,
}

fn print_help() {
    println!("Haven Operation Queue Inspector");
    println!();
    println!("Usage: haven-queue <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  list               Print queued operations");
    println!("  count              Print the number of queued operations");
    println!("  drain              Deliver eligible operations now");
    println!("  clear              Remove every queued operation");
    println!();
    println!("Options:");
    println!("  -s, --status <S>   Filter list/count by pending|in_progress|completed|failed");
    println!("  -b, --batch <N>    Batch size for drain (default: from config)");
    println!("  -d, --db <PATH>    Database file path (default: from config)");
    println!("  -c, --config <PATH> Config file path (default: platform config dir)");
    println!("  -h, --help         Show this help message");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut command = None;
    let mut status: Option<OperationStatus> = None;
    let mut batch: Option<usize> = None;
    let mut db_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "list" => command = Some(Command::List),
            "count" => command = Some(Command::Count),
            "drain" => command = Some(Command::Drain),
            "clear" => command = Some(Command::Clear),
            "--status" | "-s" => {
                if i + 1 < args.len() {
                    status = Some(args[i + 1].parse()?);
                    i += 1;
                }
            }
            "--batch" | "-b" => {
                if i + 1 < args.len() {
                    batch = Some(args[i + 1].parse()?);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_help();
                return Ok(());
            }
        }
        i += 1;
    }

    let Some(command) = command else {
        print_help();
        return Ok(());
    };

    init_tracing();

    let config = SyncConfig::load(config_path)?;
    let db_path = db_path
        .or_else(|| config.database_path())
        .ok_or("no database path configured")?;

    let store = Arc::new(SqliteStore::new(StoreConfig::new(db_path.clone())).await?);
    let executor = Arc::new(HttpExecutor::from_config(&config)?);
    let network = Arc::new(ConnectivityMonitor::online());

    let queue = OperationQueue::builder(store.clone(), executor, network)
        .with_config(&config)
        .open()
        .await?;

    println!("Database: {}", db_path.display());

    match command {
        Command::List => {
            let operations = queue.list(status).await;
            if operations.is_empty() {
                println!("Queue is empty");
            }
            for op in operations {
                println!(
                    "{}  {:<7} {:<11} {:<6} retries={} {} {}",
                    op.id,
                    op.op_type,
                    op.status,
                    op.priority,
                    op.retry_count,
                    op.http_method().as_str(),
                    op.endpoint
                );
                if let Some(error) = &op.error_message {
                    println!("    last error: {}", error);
                }
            }
        }
        Command::Count => {
            println!("{}", queue.count(status).await);
        }
        Command::Drain => {
            let batch_size = batch.unwrap_or(config.queue.batch_size);
            let report = queue.drain(batch_size).await;
            println!(
                "Succeeded: {}  Failed: {}  Remaining: {}",
                report.succeeded, report.failed, report.remaining
            );
        }
        Command::Clear => {
            let before = queue.count(None).await;
            queue.clear().await;
            println!("Removed {} operations", before);
        }
    }

    store.close().await;
    Ok(())
}
