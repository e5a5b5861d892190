//! Decibel Service - sensor ingestion and HTTP API.
//!
//! Run with: `cargo run -p decibel-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use decibel_service::middleware::SecurityState;
use decibel_service::simulate::{DEFAULT_DEVICE_ID, DEFAULT_INTERVAL, Simulator};
use decibel_service::{AppState, Config, app};
use decibel_store::Store;

/// Decibel Service - sensor ingestion and HTTP REST API.
#[derive(Parser, Debug)]
#[command(name = "decibel-service")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long, global = true)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the service in the foreground (default behavior).
    Run,

    /// Simulate an ESP32 posting random readings to a running service.
    Simulate {
        /// Service base URL.
        #[arg(long, env = "API_URL", default_value = "http://localhost:3333")]
        url: String,

        /// Device id to report as.
        #[arg(long, env = "DEVICE_ID", default_value = DEFAULT_DEVICE_ID)]
        device_id: String,

        /// Delay between readings in milliseconds.
        #[arg(long, env = "INTERVAL_MS", default_value_t = DEFAULT_INTERVAL.as_millis() as u64)]
        interval_ms: u64,

        /// Stop after this many readings.
        #[arg(long)]
        count: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Args {
        command,
        config,
        bind,
        database,
    } = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("decibel_service=info".parse()?)
                .add_directive("decibel_store=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    match command {
        Some(Command::Simulate {
            url,
            device_id,
            interval_ms,
            count,
        }) => {
            let interval = Duration::from_millis(interval_ms.max(1));
            Simulator::new(&url, device_id, interval).run(count).await;
            Ok(())
        }
        Some(Command::Run) | None => run_server(config, bind, database).await,
    }
}

async fn run_server(
    config_path: Option<PathBuf>,
    bind: Option<String>,
    database: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = match &config_path {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_else(|e| {
            warn!("Ignoring unreadable default config: {}", e);
            Config::default()
        }),
    };

    // Override config with CLI args
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = database {
        config.storage.path = db_path;
    }
    config.validate()?;

    let store = Store::open_with_readers(&config.storage.path, config.storage.read_connections)?
        .with_entry_limit(config.storage.max_entries);

    let state = AppState::new(store, config.clone());
    if config.security.rate_limit_enabled {
        spawn_rate_limit_cleanup(
            Arc::clone(&state.security),
            config.security.rate_limit_window_secs,
        );
    }

    let addr: SocketAddr = config.server.bind.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Starting server on {}", addr);
    info!("Sensor endpoint: POST http://{}/dados", addr);
    info!("Dashboard API: http://{}/api/dados", addr);
    if config.security.api_key_enabled {
        info!("API key required for dashboard endpoints");
    }

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

/// Sweep expired rate limit entries once per window.
fn spawn_rate_limit_cleanup(security: Arc<SecurityState>, window_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(window_secs.max(1)));
        loop {
            ticker.tick().await;
            security.limiter.cleanup(window_secs).await;
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
