//! Package deployment server

use anyhow::Context;
use axum::http::header::CONTENT_TYPE;
use pkgdeploy_api::inventory::StaticInventory;
use pkgdeploy_api::telemetry::init_tracing;
use pkgdeploy_api::{AppState, routes};
use pkgdeploy_config::{SystemConfig, load_config};
use pkgdeploy_db::{PgDeploymentJobRepo, PgPackageCatalog, create_pool, run_migrations};
use pkgdeploy_scheduler::{BroadcastNotifier, JobScheduler};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(std::env::var("PKGDEPLOY_LOG_JSON").is_ok_and(|v| v == "1"));

    let config = match std::env::var("PKGDEPLOY_CONFIG") {
        Ok(path) => load_config(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => SystemConfig::default(),
    };

    let database_url = std::env::var("DATABASE_URL")
        .ok()
        .or(config.server.database_url.clone())
        .context("DATABASE_URL is not set and no database-url is configured")?;

    info!("Connecting to database...");
    let pool = create_pool(&database_url).await?;
    run_migrations(&pool).await?;
    info!("Database connected");

    let nodes = Arc::new(StaticInventory::new(config.nodes.clone()));
    info!(nodes = nodes.len(), "Loaded node inventory");

    let notifier = Arc::new(BroadcastNotifier::default());
    let scheduler = Arc::new(JobScheduler::new(
        config.deployment.clone(),
        Arc::new(PgDeploymentJobRepo::new(pool.clone())),
        Arc::new(PgPackageCatalog::new(pool)),
        notifier.clone(),
        nodes.clone(),
    ));
    scheduler.start().await?;
    let sweeper = scheduler.spawn_retention_sweeper();

    let state = AppState::new(scheduler.clone(), notifier, nodes);
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            // The requester header is set by the authenticating proxy, never by browsers.
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers([CONTENT_TYPE]),
        );

    info!("Starting server on {}", config.server.listen);
    let listener = TcpListener::bind(&config.server.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Stopping deployment scheduler");
    scheduler.stop().await;
    sweeper.await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
