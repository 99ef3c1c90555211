use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use hhrec_events::{BrokerConnection, BrokerConnector, BrokerError};

use super::processor::{JobProcessor, WorkerStats};
use crate::config::Settings;
use crate::jobs::{RetryPolicy, retry_fixed};
use crate::store::{CatalogStore, ResultStore};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Connection retries exhausted. Fatal: the worker process exits.
    #[error("broker unavailable after {attempts} attempts: {reason}")]
    BrokerUnavailable { attempts: u32, reason: String },

    #[error("broker setup failed: {0}")]
    Setup(#[from] BrokerError),

    #[error("worker task aborted: {0}")]
    Aborted(String),
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name for logging
    pub name: String,
    /// Longest wait for a delivery before checking for shutdown
    pub poll_interval: Duration,
    pub connect_retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "recommendation-worker".to_string(),
            poll_interval: Duration::from_secs(1),
            connect_retry: RetryPolicy::fixed(10, Duration::from_secs(5)),
        }
    }
}

impl WorkerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            name: settings.broker.consumer_name.clone(),
            connect_retry: settings.worker.connect_retry.clone(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_connect_retry(mut self, policy: RetryPolicy) -> Self {
        self.connect_retry = policy;
        self
    }
}

/// Connect under `policy`. Exhaustion is [`WorkerError::BrokerUnavailable`].
pub async fn connect_with_retry<K>(connector: &K, policy: &RetryPolicy) -> Result<K::Connection, WorkerError>
where
    K: BrokerConnector,
{
    retry_fixed(policy, "broker", || connector.connect())
        .await
        .map_err(|e| WorkerError::BrokerUnavailable {
            attempts: e.attempts,
            reason: e.last_error.to_string(),
        })
}

/// Connect and set the channel up for consuming: work queue and result exchange
/// declared, prefetch of exactly one.
pub async fn open_consumer<K>(connector: &K, policy: &RetryPolicy) -> Result<K::Connection, WorkerError>
where
    K: BrokerConnector,
{
    let mut conn = connect_with_retry(connector, policy).await?;
    conn.declare_work_queue().await?;
    conn.declare_result_exchange().await?;
    conn.set_prefetch(1).await?;
    Ok(conn)
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<Result<(), WorkerError>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Current worker statistics.
    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Request graceful shutdown and wait for the worker to stop. The job in
    /// progress, if any, finishes first.
    pub async fn shutdown(mut self) -> Result<(), WorkerError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        join(self.join).await
    }

    /// Run until `signal` completes, then shut down gracefully. Returns early if
    /// the worker stops on its own first.
    pub async fn run_until<F>(mut self, signal: F) -> Result<(), WorkerError>
    where
        F: std::future::Future<Output = ()>,
    {
        tokio::select! {
            res = &mut self.join => {
                return res.unwrap_or_else(|e| Err(WorkerError::Aborted(e.to_string())));
            }
            _ = signal => {}
        }
        info!("worker shutdown requested");
        self.shutdown().await
    }
}

async fn join(handle: JoinHandle<Result<(), WorkerError>>) -> Result<(), WorkerError> {
    handle
        .await
        .unwrap_or_else(|e| Err(WorkerError::Aborted(e.to_string())))
}

/// Consumes recommendation jobs from the work queue, one at a time.
#[derive(Debug)]
pub struct RecommendationWorker<K, C, R> {
    connector: K,
    processor: JobProcessor<C, R>,
    config: WorkerConfig,
}

impl<K, C, R> RecommendationWorker<K, C, R>
where
    K: BrokerConnector + 'static,
    K::Connection: 'static,
    C: CatalogStore + 'static,
    R: ResultStore + 'static,
{
    pub fn new(connector: K, processor: JobProcessor<C, R>, config: WorkerConfig) -> Self {
        Self {
            connector,
            processor,
            config,
        }
    }

    /// Connect (with retry) and start consuming on a background task.
    ///
    /// Fails with [`WorkerError::BrokerUnavailable`] when the broker cannot be
    /// reached within the retry policy; nothing is spawned then.
    pub async fn start(self) -> Result<WorkerHandle, WorkerError> {
        let conn = open_consumer(&self.connector, &self.config.connect_retry).await?;
        info!(worker = %self.config.name, "worker connected, consuming");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let join = tokio::spawn(self.run(conn, shutdown_rx, stats.clone()));

        Ok(WorkerHandle {
            shutdown: Some(shutdown_tx),
            join,
            stats,
        })
    }

    #[instrument(skip_all, fields(worker = %self.config.name))]
    async fn run(
        self,
        mut conn: K::Connection,
        mut shutdown_rx: oneshot::Receiver<()>,
        stats: Arc<Mutex<WorkerStats>>,
    ) -> Result<(), WorkerError> {
        loop {
            // Shutdown is only observed between deliveries.
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            let delivery = match conn.next_delivery(self.config.poll_interval).await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => continue,
                Err(e) => {
                    error!(error = %e, "broker read failed, reconnecting");
                    bump_broker_errors(&stats);
                    let _ = conn.close().await;
                    conn = open_consumer(&self.connector, &self.config.connect_retry).await?;
                    continue;
                }
            };

            match self.processor.handle(&mut conn, &delivery).await {
                Ok(disposition) => {
                    if let Ok(mut s) = stats.lock() {
                        s.record(disposition);
                    }
                }
                Err(e) => {
                    warn!(delivery_id = %delivery.id, error = %e, "failed to settle delivery, left for redelivery");
                    bump_broker_errors(&stats);
                }
            }
        }

        if let Err(e) = conn.close().await {
            warn!(error = %e, "failed to close broker connection");
        }
        info!("worker stopped");
        Ok(())
    }
}

fn bump_broker_errors(stats: &Mutex<WorkerStats>) {
    if let Ok(mut s) = stats.lock() {
        s.broker_errors += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hhrec_core::{CatalogRecord, HouseholdKey, HouseholdProfile, ItemDirectory, ItemInfo, ItemMap};
    use hhrec_events::{Delivery, InMemoryBroker, InMemoryConnection, JobMessage, ResultMessage};

    use super::*;
    use crate::store::{InMemoryCatalogStore, InMemoryResultStore};

    fn key(v: i64) -> HouseholdKey {
        HouseholdKey::new(v).unwrap()
    }

    fn catalog() -> Arc<InMemoryCatalogStore> {
        Arc::new(InMemoryCatalogStore::with_records([
            CatalogRecord::new(key(42), HouseholdProfile::default(), vec![10, 20, 30]),
            CatalogRecord::new(key(1), HouseholdProfile::default(), vec![10]),
            CatalogRecord::new(key(2), HouseholdProfile::default(), vec![20]),
        ]))
    }

    fn items() -> ItemDirectory {
        ItemDirectory::new(ItemMap::from_iter([(10, ItemInfo::new("Produce", "🥦"))]))
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig::default()
            .with_name("worker-test")
            .with_poll_interval(Duration::from_millis(20))
            .with_connect_retry(RetryPolicy::fixed(3, Duration::ZERO))
    }

    fn worker(
        broker: &InMemoryBroker,
        catalog: Arc<InMemoryCatalogStore>,
        results: Arc<InMemoryResultStore>,
    ) -> RecommendationWorker<InMemoryBroker, Arc<InMemoryCatalogStore>, Arc<InMemoryResultStore>> {
        let processor = JobProcessor::new(catalog, results, items(), 5);
        RecommendationWorker::new(broker.clone(), processor, fast_config())
    }

    async fn publish(broker: &InMemoryBroker, v: i64) {
        let mut conn = broker.connect().await.unwrap();
        conn.declare_work_queue().await.unwrap();
        conn.publish_job(&JobMessage::new(key(v))).await.unwrap();
        conn.close().await.unwrap();
    }

    /// Faults and observations for a [`ScriptedBroker`].
    #[derive(Debug, Default, Clone)]
    struct Script {
        /// Acks to fail; a failed ack also breaks the connection for its next read.
        fail_acks: u32,
        /// Reads to fail.
        fail_reads: u32,
        /// Refuse connections once this many succeeded.
        refuse_after: Option<u32>,
        connects: u32,
        exchange_declared: bool,
        prefetch: Vec<u16>,
    }

    /// In-memory broker whose connections fail on cue.
    #[derive(Debug, Clone)]
    struct ScriptedBroker {
        inner: InMemoryBroker,
        script: Arc<Mutex<Script>>,
    }

    impl ScriptedBroker {
        fn new(script: Script) -> Self {
            Self {
                inner: InMemoryBroker::default(),
                script: Arc::new(Mutex::new(script)),
            }
        }

        fn script(&self) -> Script {
            self.script.lock().unwrap().clone()
        }
    }

    #[derive(Debug)]
    struct ScriptedConnection {
        inner: InMemoryConnection,
        script: Arc<Mutex<Script>>,
        broken: bool,
    }

    #[async_trait::async_trait]
    impl BrokerConnector for ScriptedBroker {
        type Connection = ScriptedConnection;

        async fn connect(&self) -> Result<Self::Connection, BrokerError> {
            {
                let script = self.script.lock().unwrap();
                if script.refuse_after.is_some_and(|limit| script.connects >= limit) {
                    return Err(BrokerError::Unavailable("connection refused".to_string()));
                }
            }
            let inner = self.inner.connect().await?;
            self.script.lock().unwrap().connects += 1;
            Ok(ScriptedConnection {
                inner,
                script: self.script.clone(),
                broken: false,
            })
        }
    }

    #[async_trait::async_trait]
    impl BrokerConnection for ScriptedConnection {
        async fn declare_work_queue(&mut self) -> Result<(), BrokerError> {
            self.inner.declare_work_queue().await
        }

        async fn declare_result_exchange(&mut self) -> Result<(), BrokerError> {
            self.script.lock().unwrap().exchange_declared = true;
            self.inner.declare_result_exchange().await
        }

        async fn set_prefetch(&mut self, count: u16) -> Result<(), BrokerError> {
            self.script.lock().unwrap().prefetch.push(count);
            self.inner.set_prefetch(count).await
        }

        async fn publish_job(&mut self, job: &JobMessage) -> Result<(), BrokerError> {
            self.inner.publish_job(job).await
        }

        async fn publish_result(&mut self, result: &ResultMessage) -> Result<(), BrokerError> {
            self.inner.publish_result(result).await
        }

        async fn next_delivery(&mut self, wait: Duration) -> Result<Option<Delivery>, BrokerError> {
            let fail = {
                let mut script = self.script.lock().unwrap();
                if self.broken || script.fail_reads > 0 {
                    script.fail_reads = script.fail_reads.saturating_sub(u32::from(!self.broken));
                    true
                } else {
                    false
                }
            };
            if fail {
                self.broken = false;
                return Err(BrokerError::Unavailable("connection reset".to_string()));
            }
            self.inner.next_delivery(wait).await
        }

        async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
            {
                let mut script = self.script.lock().unwrap();
                if script.fail_acks > 0 {
                    script.fail_acks -= 1;
                    self.broken = true;
                    return Err(BrokerError::Unavailable("connection reset during ack".to_string()));
                }
            }
            self.inner.ack(delivery).await
        }

        async fn reject(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
            self.inner.reject(delivery).await
        }

        async fn requeue(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
            self.inner.requeue(delivery).await
        }

        async fn dead_letter(&mut self, delivery: &Delivery, reason: &str) -> Result<(), BrokerError> {
            self.inner.dead_letter(delivery, reason).await
        }

        async fn close(&mut self) -> Result<(), BrokerError> {
            self.inner.close().await
        }
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(tokio::time::Instant::now() < deadline, "condition not met within 5s");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn connect_retry_exhaustion_is_fatal_after_exact_attempts() {
        let broker = InMemoryBroker::default();
        broker.set_reachable(false);

        let err = worker(&broker, catalog(), Arc::new(InMemoryResultStore::new()))
            .start()
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::BrokerUnavailable { attempts: 3, .. }));
        assert_eq!(broker.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn worker_renders_and_acks_queued_job() {
        let broker = InMemoryBroker::default();
        let results = Arc::new(InMemoryResultStore::new());
        let handle = worker(&broker, catalog(), results.clone()).start().await.unwrap();

        publish(&broker, 42).await;
        eventually(|| results.len() == 1).await;
        eventually(|| broker.acked_count() == 1).await;

        let record = results.get(key(42)).await.unwrap().unwrap();
        assert_eq!(
            record.recommendations,
            vec!["🥦 10 (Produce)", "❓ 20 (Unknown)", "❓ 30 (Unknown)"]
        );
        assert_eq!(handle.stats().jobs_succeeded, 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn worker_declares_topology_before_consuming() {
        let broker = ScriptedBroker::new(Script::default());
        let processor = JobProcessor::new(catalog(), Arc::new(InMemoryResultStore::new()), items(), 5);
        let handle = RecommendationWorker::new(broker.clone(), processor, fast_config())
            .start()
            .await
            .unwrap();

        assert!(broker.inner.is_work_queue_declared());
        let script = broker.script();
        assert!(script.exchange_declared);
        assert_eq!(script.prefetch, vec![1]);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn failed_ack_leaves_job_for_redelivery() {
        let broker = ScriptedBroker::new(Script {
            fail_acks: 1,
            ..Script::default()
        });
        let results = Arc::new(InMemoryResultStore::new());
        let processor = JobProcessor::new(catalog(), results.clone(), items(), 5);
        let handle = RecommendationWorker::new(broker.clone(), processor, fast_config())
            .start()
            .await
            .unwrap();

        publish(&broker.inner, 42).await;
        eventually(|| broker.inner.acked_count() == 1).await;

        // Rendered on both deliveries, stored once.
        assert_eq!(results.write_log(), vec![key(42), key(42)]);
        assert_eq!(results.len(), 1);
        assert_eq!(broker.script().connects, 2);
        assert_eq!(broker.inner.outstanding_len(), 0);

        let stats = handle.stats();
        assert_eq!(stats.jobs_succeeded, 1);
        assert_eq!(stats.broker_errors, 2);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn read_failure_reconnects_and_keeps_consuming() {
        let broker = ScriptedBroker::new(Script {
            fail_reads: 1,
            ..Script::default()
        });
        let results = Arc::new(InMemoryResultStore::new());
        let processor = JobProcessor::new(catalog(), results.clone(), items(), 5);
        let handle = RecommendationWorker::new(broker.clone(), processor, fast_config())
            .start()
            .await
            .unwrap();

        eventually(|| broker.script().connects == 2).await;
        publish(&broker.inner, 1).await;
        eventually(|| results.len() == 1).await;

        assert_eq!(broker.script().prefetch, vec![1, 1]);
        assert_eq!(handle.stats().broker_errors, 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn failed_reconnect_stops_the_worker() {
        let broker = ScriptedBroker::new(Script {
            fail_reads: 1,
            refuse_after: Some(1),
            ..Script::default()
        });
        let processor = JobProcessor::new(catalog(), Arc::new(InMemoryResultStore::new()), items(), 5);
        let handle = RecommendationWorker::new(broker.clone(), processor, fast_config())
            .start()
            .await
            .unwrap();

        let err = handle.run_until(std::future::pending()).await.unwrap_err();

        assert!(matches!(err, WorkerError::BrokerUnavailable { attempts: 3, .. }));
        assert_eq!(broker.script().connects, 1);
    }

    #[tokio::test]
    async fn unknown_key_is_acked_and_leaves_no_result() {
        let broker = InMemoryBroker::default();
        let results = Arc::new(InMemoryResultStore::new());
        let handle = worker(&broker, catalog(), results.clone()).start().await.unwrap();

        publish(&broker, 999_999_999).await;
        eventually(|| broker.acked_count() == 1).await;

        assert!(results.is_empty());
        assert_eq!(handle.stats().unknown_keys, 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn jobs_are_processed_strictly_in_sequence() {
        let broker = InMemoryBroker::default();
        let catalog = catalog();
        catalog.set_lookup_delay(key(1), Duration::from_millis(200));
        let results = Arc::new(InMemoryResultStore::new());
        let handle = worker(&broker, catalog, results.clone()).start().await.unwrap();

        publish(&broker, 1).await;
        publish(&broker, 2).await;

        // While A is being looked up, B must not be written.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(results.write_log().is_empty());

        eventually(|| results.len() == 2).await;
        assert_eq!(results.write_log(), vec![key(1), key(2)]);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_jobs_rewrite_an_identical_result() {
        let broker = InMemoryBroker::default();
        let results = Arc::new(InMemoryResultStore::new());
        let handle = worker(&broker, catalog(), results.clone()).start().await.unwrap();

        publish(&broker, 42).await;
        eventually(|| results.write_log().len() == 1).await;
        let first = results.get(key(42)).await.unwrap();

        publish(&broker, 42).await;
        eventually(|| results.write_log().len() == 2).await;
        let second = results.get(key(42)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(results.len(), 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn stopped_worker_consumes_nothing() {
        let broker = InMemoryBroker::default();
        let results = Arc::new(InMemoryResultStore::new());
        let handle = worker(&broker, catalog(), results.clone()).start().await.unwrap();

        handle.shutdown().await.unwrap();
        publish(&broker, 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(broker.ready_len(), 1);
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn run_until_stops_on_signal() {
        let broker = InMemoryBroker::default();
        let results = Arc::new(InMemoryResultStore::new());
        let handle = worker(&broker, catalog(), results.clone()).start().await.unwrap();

        publish(&broker, 42).await;
        eventually(|| results.len() == 1).await;

        let (tx, rx) = oneshot::channel::<()>();
        let running = tokio::spawn(handle.run_until(async move {
            let _ = rx.await;
        }));
        tx.send(()).unwrap();

        running.await.unwrap().unwrap();
        assert_eq!(broker.acked_count(), 1);
    }
}
