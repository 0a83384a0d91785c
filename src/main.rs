use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod db;
mod intake;
mod models;
mod normalize;
mod parser;
mod scheduler;
mod services;
mod settings;

use config::AppConfig;
use intake::StagingIntake;
use scheduler::ScanScheduler;
use services::anilist::AniListScanner;
use services::registry::ScannerRegistry;
use services::tmdb::TmdbScanner;
use settings::Settings;

/// Tracks all background task handles for graceful shutdown
struct BackgroundTasks {
    handles: Vec<(&'static str, JoinHandle<()>)>,
    shutdown: CancellationToken,
}

impl BackgroundTasks {
    fn new() -> Self {
        Self {
            handles: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.handles.push((name, handle));
    }

    async fn shutdown(self) {
        tracing::info!("Initiating graceful shutdown...");

        // Signal all tasks to stop
        self.shutdown.cancel();

        // Wait for all tasks with a timeout
        for (name, handle) in self.handles {
            tracing::debug!("Waiting for {} to finish...", name);
            match tokio::time::timeout(Duration::from_secs(10), handle).await {
                Ok(Ok(())) => tracing::debug!("{} finished cleanly", name),
                Ok(Err(e)) => tracing::warn!("{} panicked: {}", name, e),
                Err(_) => tracing::warn!("{} timed out during shutdown", name),
            }
        }

        tracing::info!("All background tasks stopped");
    }
}

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub settings: Arc<Settings>,
    pub intake: Arc<StagingIntake>,
    pub registry: Arc<ScannerRegistry>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediarr=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = AppConfig::load();

    config.paths.ensure_dirs().await?;

    config.log_config();

    // Database setup with optimized connection pool
    let database_url = config.database_url();
    tracing::debug!("Database URL: {}", database_url);

    let connect_options = SqliteConnectOptions::from_str(&database_url)?
        .create_if_missing(true)
        // WAL mode for better concurrent read/write performance
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        // NORMAL sync is safe with WAL and much faster
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        // Enable foreign key enforcement
        .foreign_keys(true)
        // Busy timeout for concurrent access (5 seconds)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(connect_options)
        .await?;

    db::migrate(&pool).await?;

    let settings = Arc::new(Settings::new(pool.clone()));
    settings.seed_defaults().await?;

    let intake = Arc::new(StagingIntake::new(
        pool.clone(),
        settings.clone(),
        config.parser.dictionaries(),
    ));

    // Scanners are registered once at startup; the registry is passed around
    // by handle from here on.
    let mut registry = ScannerRegistry::new(settings.clone());
    match config.metadata.tmdb_key() {
        Some(key) => registry.register(Arc::new(TmdbScanner::new(key))),
        None => tracing::info!("TMDB scanner disabled (no API key configured)"),
    }
    registry.register(Arc::new(AniListScanner::new()));
    let registry = Arc::new(registry);

    let scheduler = Arc::new(ScanScheduler::new(
        pool.clone(),
        settings.clone(),
        intake.clone(),
        registry.clone(),
    ));

    let state = Arc::new(AppState {
        db: pool.clone(),
        settings: settings.clone(),
        intake: intake.clone(),
        registry: registry.clone(),
    });

    let mut bg_tasks = BackgroundTasks::new();
    let shutdown_token = bg_tasks.token();

    if config.scheduler.enabled {
        let intake_tick = Duration::from_secs(config.scheduler.intake_tick_seconds.max(1));
        let scan_tick = Duration::from_secs(config.scheduler.scan_tick_seconds.max(1));

        let intake_scheduler = scheduler.clone();
        let cancel = shutdown_token.clone();
        bg_tasks.spawn("file-intake-loop", async move {
            intake_scheduler.run_intake_loop(cancel, intake_tick).await;
        });

        let scan_scheduler = scheduler.clone();
        let cancel = shutdown_token.clone();
        bg_tasks.spawn("metadata-scan-loop", async move {
            scan_scheduler.run_metadata_loop(cancel, scan_tick).await;
        });
    } else {
        tracing::info!("Scheduler disabled by configuration");
    }

    // Root handler
    async fn root_handler() -> &'static str {
        "mediarr"
    }

    // Build router
    let app = Router::new()
        .route("/", get(root_handler).head(root_handler))
        .route("/health", get(|| async { "OK" }))
        .merge(api::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let bind_address: std::net::IpAddr = config
        .bind_address
        .parse()
        .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0]));
    let addr = SocketAddr::from((bind_address, config.port));
    tracing::info!("Starting server on {}", addr);

    // Create shutdown signal listener
    let shutdown_signal = async {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
            _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
        }
    };

    // Start server with graceful shutdown
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // After the server stops, gracefully shut down background tasks
    bg_tasks.shutdown().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}
