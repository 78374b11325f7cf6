mod activity;
mod auth;
mod config;
mod db;
mod errors;
mod http;
mod models;
mod notifications;
mod policy;
mod projects;
mod session;
mod tasks;
mod tracker;

pub use crate::config::{AuthSettings, ServerConfig};
pub use crate::db::Database;
pub use crate::errors::{AppError, AppResult};
pub use crate::http::{build_router, AppState};
pub use crate::models::{
    ActivityAction, NotificationType, ProjectStatus, Role, TaskPriority, TaskStatus,
};
pub use crate::policy::Actor;
pub use crate::tasks::TaskChange;
pub use crate::tracker::TrackerCore;

use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Opens the store, wires the core and serves the REST surface until ctrl-c.
pub async fn serve(config: ServerConfig) -> AppResult<()> {
    let db = Arc::new(Database::new(&config.db_path)?);
    let core = Arc::new(TrackerCore::new(db, &config.auth)?);

    tokio::spawn({
        let core = core.clone();
        async move {
            let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
            loop {
                interval.tick().await;
                let purged = core.sessions().purge_expired().await;
                if purged > 0 {
                    tracing::info!(purged, "expired sessions purged");
                }
            }
        }
    });

    let router = build_router(AppState::new(core, config.cors_origins.clone()));
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(
        bind_addr = %config.bind_addr,
        db_path = %config.db_path.display(),
        "team tracker listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("team tracker stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// Installs the global subscriber. Logs go to a daily rolling file when a log
/// directory is configured, otherwise to stdout.
pub fn init_tracing(config: &ServerConfig) -> AppResult<()> {
    let (non_blocking, guard) = match &config.log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)?;
            let file_appender = tracing_appender::rolling::daily(log_dir, "tracker.log");
            tracing_appender::non_blocking(file_appender)
        }
        None => tracing_appender::non_blocking(std::io::stdout()),
    };
    let _ = LOG_GUARD.set(guard);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking);

    let installed = if config.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|error| AppError::Internal(error.to_string()))
}
