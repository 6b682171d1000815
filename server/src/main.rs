//! Calsync Server binary.

use std::sync::Arc;

use calsync_server::config::Config;
use calsync_server::db::{self, FileRepository, PgRepository, StateRepository};
use calsync_server::remote::{MemoryCalendar, RemoteAdapter};
use calsync_server::sync::{RealtimeWorker, SyncOrchestrator};
use calsync_server::websocket::{forward_status, ConnectionManager};
use calsync_server::{app, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Buffered provider notifications before senders wait.
const NOTIFICATION_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "calsync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Calsync Server on {}:{}", config.host, config.port);

    let repository: Arc<dyn StateRepository> = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url, config.database_max_connections).await?;
            tracing::info!("Running database migrations...");
            db::run_migrations(&pool).await?;
            Arc::new(PgRepository::new(pool))
        }
        None => {
            tracing::info!(path = %config.state_file.display(), "Using state file");
            Arc::new(FileRepository::new(config.state_file.clone()))
        }
    };

    // Provider binding: the in-process calendar
    let remote: Arc<dyn RemoteAdapter> = Arc::new(MemoryCalendar::new());

    let orchestrator = Arc::new(SyncOrchestrator::restore(remote, repository).await?);
    orchestrator.set_realtime_enabled(config.realtime_enabled);

    let (notifications, worker) = RealtimeWorker::new(orchestrator.clone(), NOTIFICATION_CAPACITY);
    tokio::spawn(worker.run());

    let conn_manager = ConnectionManager::new_shared();
    tokio::spawn(forward_status(orchestrator.subscribe(), conn_manager.clone()));

    let state = AppState {
        orchestrator,
        config: Arc::new(config.clone()),
        conn_manager,
        notifications,
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app(state)).await?;

    Ok(())
}
