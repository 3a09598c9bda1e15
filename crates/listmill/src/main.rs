//! Listmill: scheduled multi-source list-ingestion service.
//!
//! Usage:
//!     listmill serve --db-url sqlite:listmill.db --data-dir ./data
//!     listmill refresh --list 3

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use listmill::http::{public_router, AppState};
use listmill_ingest::{ImportStatus, Importer, NetPolicy};
use listmill_logging::LogConfig;
use listmill_publish::{AccessGate, Publisher};
use listmill_scheduler::Scheduler;
use listmill_store::ListStore;

/// How long shutdown waits for in-flight refreshes.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "listmill", about = "Scheduled multi-source list-ingestion service")]
struct Args {
    /// Store URL
    #[arg(long, env = "LISTMILL_DB_URL", default_value = "sqlite:listmill.db")]
    db_url: String,

    /// Data directory (artifacts, logs)
    #[arg(long, env = "LISTMILL_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Verbose console logging
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler and the public HTTP surface (default)
    Serve {
        /// Bind address for the public endpoints
        #[arg(long, env = "LISTMILL_BIND", default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Refresh worker pool size
        #[arg(long, env = "LISTMILL_MAX_WORKERS", default_value_t = listmill_scheduler::DEFAULT_MAX_WORKERS)]
        max_workers: usize,
    },
    /// Force-refresh one list and print the diagnostic log
    Refresh {
        /// List id
        #[arg(long)]
        list: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = listmill_logging::init_logging(LogConfig {
        app_name: "listmill",
        data_dir: &args.data_dir,
        verbose: args.verbose,
    })?;

    let store = Arc::new(
        ListStore::open(&args.db_url)
            .await
            .with_context(|| format!("Failed to open store {}", args.db_url))?,
    );
    store.init().await.context("Failed to initialize store")?;

    let policy = NetPolicy::from_env();
    let publisher = Arc::new(Publisher::new(Arc::clone(&store), &args.data_dir));
    let hook: Arc<dyn listmill_ingest::ArtifactHook> = publisher.clone();
    let importer = Arc::new(Importer::new(Arc::clone(&store), policy).with_artifact_hook(hook));

    let command = args.command.unwrap_or(Command::Serve {
        bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
        max_workers: listmill_scheduler::DEFAULT_MAX_WORKERS,
    });
    match command {
        Command::Serve { bind, max_workers } => {
            serve(store, importer, publisher, bind, max_workers).await
        }
        Command::Refresh { list } => refresh(importer, list).await,
    }
}

async fn serve(
    store: Arc<ListStore>,
    importer: Arc<Importer>,
    publisher: Arc<Publisher>,
    bind: SocketAddr,
    max_workers: usize,
) -> Result<()> {
    info!("Starting listmill");

    let scheduler = Scheduler::new(Arc::clone(&store), importer, max_workers);
    let scheduled = scheduler.start().await?;
    info!("Scheduler running with {scheduled} job(s)");

    let state = AppState {
        store: Arc::clone(&store),
        gate: Arc::new(AccessGate::new(Arc::clone(&store))),
        publisher,
    };
    let router =
        public_router(state).into_make_service_with_connect_info::<SocketAddr>();

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    info!("Public endpoints listening on {bind}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Shutting down; waiting for in-flight refreshes");
    scheduler.shutdown(SHUTDOWN_GRACE).await;
    Ok(())
}

async fn refresh(importer: Arc<Importer>, list_id: i64) -> Result<()> {
    let outcome = importer.import(list_id, true).await;
    for line in &outcome.log {
        println!("{line}");
    }
    match outcome.status {
        ImportStatus::Success { rows } => {
            println!("OK: {rows} rows imported");
            Ok(())
        }
        ImportStatus::Skipped => {
            println!("Skipped: refreshed too recently");
            Ok(())
        }
        ImportStatus::Failed { kind, message } => {
            anyhow::bail!("import failed ({kind}): {message}")
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received shutdown signal");
}
