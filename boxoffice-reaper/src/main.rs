use anyhow::Context;
use boxoffice_core::{Store, SystemClock};
use boxoffice_reaper::Reaper;
use boxoffice_store::{app_config::Config, DbClient};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boxoffice_reaper=debug,boxoffice_store=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!(
        seat_lock_ttl_seconds = config.holds.seat_lock_ttl_seconds,
        pending_order_minutes = config.holds.pending_order_minutes,
        "Starting box office reaper"
    );

    let db = DbClient::new(&config.database)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    let store: Arc<dyn Store> = Arc::new(db.store());
    let reaper = Arc::new(Reaper::new(store, Arc::new(SystemClock)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(reaper.run(config.reaper.clone(), shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    // the worker may already be gone, nothing to notify then
    let _ = shutdown_tx.send(true);
    worker.await.context("Reaper task panicked")?;

    db.pool.close().await;
    Ok(())
}
