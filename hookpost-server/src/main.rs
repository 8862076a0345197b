//! hookpost server
//!
//! Runs the webhook dispatcher against Postgres on a fixed cadence.

mod config;
mod scheduler;
mod shutdown;
mod state;

use clap::Parser;
use config::file::LogFormat;
use config::{ConfigLoader, get_database_url};
use hookpost_core::repository::PgWebhookRepository;
use scheduler::Scheduler;
use shutdown::{spawn_config_reload_handler, spawn_shutdown_listener};
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// hookpost - durable, signed webhook delivery
#[derive(Parser, Debug)]
#[command(name = "hookpost-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./hookpost.toml")]
    config: PathBuf,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Process one batch of due deliveries and exit
    #[arg(long, default_value = "false")]
    once: bool,

    /// Secret used to sign deliveries whose subscription has none
    #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
    default_secret: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration; the log format lives in it, so tracing comes after
    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.default_secret.clone()));
    let loaded_config = config_loader.load()?;
    init_tracing(loaded_config.log_format);

    tracing::info!("Starting hookpost-server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Configuration loaded from {:?}", args.config);
    let batch_size = loaded_config.schedule.batch_size;

    // Get database URL from environment
    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    // Run migrations if requested
    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    let repository = Arc::new(PgWebhookRepository::new(db_pool.clone()));
    let state = AppState::new(repository, loaded_config)?;

    if args.once {
        let report = state
            .runtime()
            .dispatcher
            .process_pending_events(batch_size)
            .await?;
        tracing::info!(
            due = report.due,
            delivered = report.delivered,
            retrying = report.retrying,
            failed = report.failed,
            skipped = report.skipped,
            "Single batch finished"
        );
    } else {
        let shutdown_rx = spawn_shutdown_listener();

        // Spawn config reload handler (listens for SIGHUP)
        let reload_handle =
            spawn_config_reload_handler(state.clone(), config_loader, shutdown_rx.clone());

        Scheduler::new(state.subscribe(), shutdown_rx).run().await;

        if let Err(e) = reload_handle.await {
            tracing::warn!("Config reload handler ended abnormally: {}", e);
        }
    }

    // Close database connections gracefully
    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}
