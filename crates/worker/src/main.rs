//! Recommendation worker process: consumes lookup jobs from the Redis work queue,
//! renders catalog rows into the result store, and publishes notifications.
//!
//! Exits non-zero when the broker or the database cannot be reached within the
//! configured retry budget. `SIGHUP` reloads the item directory file.

use anyhow::Context;
use tracing::{info, warn};

use hhrec_core::ItemDirectory;
use hhrec_infra::broker::RedisStreamsBroker;
use hhrec_infra::items::load_directory;
use hhrec_infra::store::postgres::{connect_pool, ensure_schema};
use hhrec_infra::store::{PostgresCatalogStore, PostgresResultStore};
use hhrec_infra::{JobProcessor, RecommendationWorker, Settings, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hhrec_observability::init("hhrec-worker");

    let settings = Settings::from_env().context("reading configuration")?;
    let items = load_directory(settings.items_path.as_deref())
        .await
        .context("loading item directory")?;

    let database_url = settings
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set")?;
    let pool = connect_pool(database_url, &settings.worker.connect_retry)
        .await
        .context("connecting to postgres")?;
    ensure_schema(&pool).await.context("creating tables")?;

    let broker = RedisStreamsBroker::from_settings(&settings.broker).context("configuring broker")?;
    let processor = JobProcessor::new(
        PostgresCatalogStore::new(pool.clone()),
        PostgresResultStore::new(pool),
        items.clone(),
        settings.worker.max_redeliveries,
    );

    let handle = RecommendationWorker::new(broker, processor, WorkerConfig::from_settings(&settings))
        .start()
        .await
        .context("starting worker")?;

    if let Some(path) = settings.items_path.clone() {
        spawn_item_reload(items, path);
    }

    handle.run_until(shutdown_signal()).await.context("worker stopped")?;
    info!("worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
fn spawn_item_reload(items: ItemDirectory, path: std::path::PathBuf) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "could not listen for SIGHUP; item reload disabled");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            match hhrec_infra::items::reload_directory(&items, &path).await {
                Ok(count) => info!(items = count, "item directory reloaded on SIGHUP"),
                Err(e) => warn!(error = %e, "item directory reload failed, keeping the current one"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_item_reload(_items: ItemDirectory, _path: std::path::PathBuf) {}
