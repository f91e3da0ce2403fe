use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use orderhub_api::{app, worker::FeedWorker, AppState};
use orderhub_order::{CacheSettings, OrderService, ReconcileSettings};
use orderhub_store::app_config::Config;
use orderhub_store::{DbClient, PgOrderStore, RedisClient};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "orderhub_api=debug,orderhub_order=debug,orderhub_store=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("failed to load config")?;
    tracing::info!("Starting orderhub on port {}", config.server.port);

    let db = DbClient::new(&config.database)
        .await
        .context("failed to connect to Postgres")?;
    db.migrate().await.context("failed to run migrations")?;

    let redis = RedisClient::connect(&config.redis)
        .await
        .context("failed to connect to Redis")?;

    let service = Arc::new(OrderService::new(
        Arc::new(PgOrderStore::new(db.pool.clone())),
        Arc::new(redis),
        CacheSettings {
            max_orders: config.redis.max_orders,
        },
        ReconcileSettings {
            conflict_retries: config.reconciliation.conflict_retries,
        },
    ));

    match service.warm_cache().await {
        Ok(loaded) => tracing::info!("Cache warmed with {} orders", loaded),
        Err(e) => tracing::warn!("Cache warm-up failed, continuing cold: {}", e),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = FeedWorker::new(&config.kafka, service.clone()).context("failed to start feed worker")?;
    let worker_handle = tokio::spawn(worker.run(shutdown_rx));

    let state = AppState::new(
        service,
        Duration::from_secs(config.server.request_timeout_seconds),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("HTTP server drained, stopping feed worker");
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_handle.await {
        tracing::error!("Feed worker task failed: {}", e);
    }
    db.close().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
