//! Themis - Judge Worker
//!
//! Claims pending submissions, judges them inside sandboxed containers
//! and records verdicts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use themis::config::Config;
use themis::dispatch;
use themis::metrics::MetricsServer;
use themis::sandbox::DockerSandbox;
use themis::service::JudgeService;
use themis::store::SubmissionStore;
use themis::workspace::WorkspaceManager;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "themis=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    tracing::info!("Starting Themis judge worker");

    let config = Config::from_env();
    tracing::info!("Environment: {}", config.environment);

    tracing::info!("Connecting to database...");
    let db_pool = sqlx::PgPool::connect(&config.database_url).await?;
    tracing::info!("Database connected");

    // Fail fast when the isolation runtime is down
    let sandbox = DockerSandbox::new(
        config.execution.output_limit_bytes,
        Duration::from_millis(config.execution.kill_grace_ms),
        config.execution.cpus,
    );
    sandbox.probe().await?;

    let store = Arc::new(SubmissionStore::new(db_pool));
    let service = Arc::new(JudgeService::new(
        Arc::new(sandbox),
        store.clone(),
        WorkspaceManager::new(config.storage.workspaces_path.clone()),
        config.execution.clone(),
    ));

    // Shutdown signal cancels every in-flight run
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
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
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        tracing::info!("Shutdown signal received, cancelling in-flight runs...");
        shutdown.cancel();
    });

    // Start metrics server
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = MetricsServer::run(metrics_port).await {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    // Worker pool and intake
    let (pool, runner) = dispatch::pool(
        service,
        config.pool.workers,
        config.pool.queue_capacity,
    );
    let runner_handle = tokio::spawn(runner.run(cancel.clone()));

    tracing::info!(
        workers = config.pool.workers,
        queue_capacity = config.pool.queue_capacity,
        "Themis ready, polling for submissions"
    );

    dispatch::intake_loop(store, pool, config.pool.clone(), cancel.clone()).await;

    let _ = runner_handle.await;
    tracing::info!("Themis shutdown complete");
    Ok(())
}
