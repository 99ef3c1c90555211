//! Runtime wiring: which stores, broker and result feed the handlers talk to.
//!
//! - **in-memory** (dev mode and tests): in-memory broker and stores, plus a worker
//!   running inside the API process so that enqueued jobs actually complete;
//! - **persistent**: Postgres stores, Redis Streams work queue, Redis pub/sub result
//!   feed. Workers run as separate `hhrec-worker` processes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::Mutex;
use tracing::{info, warn};

use hhrec_core::ItemDirectory;
use hhrec_events::{InMemoryBroker, ResultMessage, Subscription};
use hhrec_infra::items::load_directory;
use hhrec_infra::store::{InMemoryCatalogStore, InMemoryRequestLog, InMemoryResultStore};
use hhrec_infra::{
    CatalogStore, JobEnqueuer, JobProcessor, JobSubmitter, RecommendationWorker, RequestLog,
    ResultStore, RetryPolicy, Settings, WorkerConfig, WorkerHandle,
};

/// Where SSE subscribers get result notifications from.
#[derive(Debug, Clone)]
pub enum ResultFeed {
    InMemory(InMemoryBroker),
    #[cfg(feature = "redis")]
    Redis(hhrec_infra::broker::RedisResultChannel),
}

impl ResultFeed {
    pub fn subscribe(&self) -> Subscription<ResultMessage> {
        match self {
            ResultFeed::InMemory(broker) => broker.subscribe_results(),
            #[cfg(feature = "redis")]
            ResultFeed::Redis(channel) => channel.subscribe(),
        }
    }
}

/// Everything a handler may need, shared behind an `Arc`.
pub struct AppServices {
    pub enqueuer: Arc<dyn JobSubmitter>,
    pub catalog: Arc<dyn CatalogStore>,
    pub results: Arc<dyn ResultStore>,
    pub requests: Arc<dyn RequestLog>,
    pub items: ItemDirectory,
    /// File the item directory was loaded from; reload reads it again.
    pub items_path: Option<PathBuf>,
    pub feed: ResultFeed,
    worker: Mutex<Option<WorkerHandle>>,
}

impl AppServices {
    /// Stop the in-process worker, if this instance runs one.
    pub async fn shutdown(&self) {
        let Some(handle) = self.worker.lock().await.take() else {
            return;
        };
        match handle.shutdown().await {
            Ok(()) => info!("in-process worker stopped"),
            Err(e) => warn!(error = %e, "in-process worker stopped with error"),
        }
    }
}

/// Backends of the in-memory shape. Callers keep clones to seed the catalog or
/// inspect the broker.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackends {
    pub broker: InMemoryBroker,
    pub catalog: Arc<InMemoryCatalogStore>,
    pub results: Arc<InMemoryResultStore>,
    pub requests: Arc<InMemoryRequestLog>,
}

/// Build services from settings: in-memory when neither `DATABASE_URL` nor
/// `REDIS_URL` is set, persistent otherwise.
pub async fn build_services(settings: &Settings) -> anyhow::Result<AppServices> {
    let items = load_directory(settings.items_path.as_deref())
        .await
        .context("loading item directory")?;

    if settings.is_dev_mode() {
        warn!("DATABASE_URL and REDIS_URL are not set; running in-memory with an in-process worker");
        return build_in_memory_services(
            InMemoryBackends::default(),
            items,
            settings.items_path.clone(),
            settings.worker.max_redeliveries,
        )
        .await;
    }

    build_persistent_services(settings, items).await
}

/// In-memory services with a worker consuming the in-memory broker.
pub async fn build_in_memory_services(
    backends: InMemoryBackends,
    items: ItemDirectory,
    items_path: Option<PathBuf>,
    max_redeliveries: u32,
) -> anyhow::Result<AppServices> {
    let processor = JobProcessor::new(
        backends.catalog.clone(),
        backends.results.clone(),
        items.clone(),
        max_redeliveries,
    );
    let config = WorkerConfig::default()
        .with_name("in-process-worker")
        .with_poll_interval(Duration::from_millis(200))
        .with_connect_retry(RetryPolicy::once());

    let worker = RecommendationWorker::new(backends.broker.clone(), processor, config)
        .start()
        .await
        .context("starting in-process worker")?;

    Ok(AppServices {
        enqueuer: Arc::new(JobEnqueuer::new(backends.broker.clone())),
        catalog: backends.catalog,
        results: backends.results,
        requests: backends.requests,
        items,
        items_path,
        feed: ResultFeed::InMemory(backends.broker),
        worker: Mutex::new(Some(worker)),
    })
}

#[cfg(feature = "redis")]
async fn build_persistent_services(settings: &Settings, items: ItemDirectory) -> anyhow::Result<AppServices> {
    use hhrec_infra::broker::RedisStreamsBroker;
    use hhrec_infra::store::postgres::{connect_pool, ensure_schema};
    use hhrec_infra::store::{PostgresCatalogStore, PostgresRequestLog, PostgresResultStore};

    let database_url = settings
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set when REDIS_URL is")?;
    if settings.broker.redis_url.is_none() {
        anyhow::bail!("REDIS_URL must be set when DATABASE_URL is");
    }

    let pool = connect_pool(database_url, &settings.worker.connect_retry)
        .await
        .context("connecting to postgres")?;
    ensure_schema(&pool).await.context("creating tables")?;

    let broker = RedisStreamsBroker::from_settings(&settings.broker)?;
    let feed = ResultFeed::Redis(broker.result_channel());
    info!(work_queue = %settings.broker.topology.work_queue, "persistent services ready");

    Ok(AppServices {
        enqueuer: Arc::new(JobEnqueuer::new(broker)),
        catalog: Arc::new(PostgresCatalogStore::new(pool.clone())),
        results: Arc::new(PostgresResultStore::new(pool.clone())),
        requests: Arc::new(PostgresRequestLog::new(pool)),
        items,
        items_path: settings.items_path.clone(),
        feed,
        worker: Mutex::new(None),
    })
}

#[cfg(not(feature = "redis"))]
async fn build_persistent_services(_settings: &Settings, _items: ItemDirectory) -> anyhow::Result<AppServices> {
    anyhow::bail!("built without the `redis` feature; unset DATABASE_URL and REDIS_URL to run in-memory")
}
