//! chainbell server
//!
//! Watches Sui event streams and posts matching events to Telegram chats.

mod api;
mod config;
mod pipeline;
mod server;
mod shutdown;
mod state;

use chainbell_core::config::ConfigStore;
use chainbell_core::ledger::{Ledger, MemoryLedger, PgLedger};
use chainbell_core::registry::{MemoryRegistry, PgRegistry, SubscriptionRegistry};
use clap::Parser;
use config::{ConfigLoader, get_database_url};
use pipeline::{Pipeline, telegram_transport};
use server::{build_router, run_server};
use shutdown::{shutdown_signal, spawn_config_reload_handler};
use sqlx::postgres::PgPoolOptions;
use state::{AdminConfig, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// chainbell - blockchain event notifications for Telegram
#[derive(Parser, Debug)]
#[command(name = "chainbell-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./chainbell.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:9090)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Keep the ledger and subscriptions in memory instead of Postgres
    #[arg(long, default_value = "false")]
    memory_ledger: bool,

    /// Emit logs as JSON lines
    #[arg(long, default_value = "false")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(args.log_json);

    if let Ok(path) = dotenv {
        tracing::debug!("Loaded environment from {:?}", path);
    }
    tracing::info!("Starting chainbell-server v{}", env!("CARGO_PKG_VERSION"));

    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let (ledger, registry, db_pool): (
        Arc<dyn Ledger>,
        Arc<dyn SubscriptionRegistry>,
        Option<sqlx::PgPool>,
    ) =
        if args.memory_ledger {
            if args.migrate {
                tracing::warn!("--migrate has no effect with --memory-ledger");
            }
            tracing::warn!("Using the in-memory ledger, nothing survives a restart");
            (
                Arc::new(MemoryLedger::new()),
                Arc::new(MemoryRegistry::new()),
                None,
            )
        } else {
            let database_url = get_database_url().map_err(|e| {
                tracing::error!("DATABASE_URL environment variable not set");
                e
            })?;

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

            (
                Arc::new(PgLedger::new(db_pool.clone())),
                Arc::new(PgRegistry::new(db_pool.clone())),
                Some(db_pool),
            )
        };

    let transport = telegram_transport(&config.telegram)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatch_store = ConfigStore::new(config.dispatch);

    let pipeline = Pipeline::start(
        &config,
        ledger.clone(),
        registry.clone(),
        Arc::new(transport),
        dispatch_store.clone(),
        shutdown_rx.clone(),
    );

    if config.server.admin_token.is_none() {
        tracing::warn!("No admin token configured, the subscription API is disabled");
    }
    let state = AppState::new(
        registry,
        ledger,
        AdminConfig::new(config.server.admin_token.as_deref()),
    );

    // Listens for SIGHUP
    let reload_handle = spawn_config_reload_handler(
        config_loader,
        state.admin.clone(),
        dispatch_store,
        shutdown_rx,
    );

    let router = build_router(state);

    tracing::info!("Starting HTTP server on {}", config.server.listen);
    let result = run_server(router, config.server.listen, shutdown_signal()).await;
    if let Err(e) = &result {
        tracing::error!("HTTP server failed: {}", e);
    }

    // Stop the pipeline and let in-flight work settle
    let _ = shutdown_tx.send(true);
    pipeline.join().await;
    let _ = reload_handle.await;

    if let Some(db_pool) = db_pool {
        tracing::info!("Closing database connections...");
        db_pool.close().await;
    }
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
