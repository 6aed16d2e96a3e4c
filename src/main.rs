mod adapters;
mod application;
mod config;
mod domain;
mod interface;
mod ports;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adapters::{MemoryStore, SlpClient, SqliteStore};
use application::{PollScheduler, ServerQueries};
use config::{Config, StorageBackend, RECOMMENDED_MIN_ENTRIES};
use interface::http::{create_router, AppState};
use ports::SampleStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("mcwatch={},tower_http=info", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting mcwatch v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {:?}", config);

    if config.max_entries < RECOMMENDED_MIN_ENTRIES {
        warn!(
            max_entries = config.max_entries,
            recommended = RECOMMENDED_MIN_ENTRIES,
            "⚠ max_entries is very low, history will be short"
        );
    }
    if !config.auto_clean {
        warn!("⚠ Automatic cleanup disabled, sample history will grow without bound");
    }

    let endpoints = config.resolve_endpoints().await?;
    info!("✓ Monitoring {} servers", endpoints.len());

    // Initialize storage
    let store: Arc<dyn SampleStore> = match config.storage {
        StorageBackend::Sqlite => {
            let store = SqliteStore::connect(&config.database_url, config.retention()).await?;
            info!("✓ SQLite store ready at {}", config.database_url);
            Arc::new(store)
        }
        StorageBackend::Memory => {
            warn!("⚠ Using in-memory storage, samples are lost on restart");
            Arc::new(MemoryStore::new(config.retention()))
        }
    };

    // Start the poller
    let scheduler = PollScheduler::new(
        endpoints,
        Arc::new(SlpClient::new(config.probe_timeout())),
        store.clone(),
        config.poll_period(),
    )
    .with_probe_timeout(config.probe_timeout());
    scheduler.register_endpoints().await?;
    info!("✓ Poll scheduler initialized");

    let stats = scheduler.stats();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = scheduler.spawn(shutdown_rx);

    // Create HTTP server
    let app = create_router(AppState {
        queries: ServerQueries::new(store),
        stats,
        default_limit: config.default_response_entries,
        max_limit: config.max_response_entries,
    });
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("✓ mcwatch listening on {}", addr);
    info!("  → API: http://localhost:{}/api/servers", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    poller.await?;
    info!("mcwatch stopped");

    Ok(())
}
