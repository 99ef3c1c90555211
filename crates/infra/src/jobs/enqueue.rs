//! Job Enqueuer: turns a validated household key into a durable job message.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument, warn};

use hhrec_core::HouseholdKey;
use hhrec_events::{BrokerConnection, BrokerConnector, BrokerError, JobMessage};

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    /// The broker could not be reached; nothing was published.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// Connected, but declaring the queue or publishing failed.
    #[error("publish failed: {0}")]
    Publish(BrokerError),
}

/// Acknowledgment returned to the caller once the job is on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnqueueReceipt {
    pub status: &'static str,
    pub household_key: HouseholdKey,
}

impl EnqueueReceipt {
    pub fn queued(household_key: HouseholdKey) -> Self {
        Self {
            status: "queued",
            household_key,
        }
    }
}

/// Object-safe submission seam used by the HTTP layer.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn enqueue(&self, household_key: HouseholdKey) -> Result<EnqueueReceipt, EnqueueError>;
}

/// Publishes one job per call over a short-lived broker connection.
///
/// There is no deduplication: enqueuing the same key twice puts two jobs on the
/// queue, and the second one rewrites an identical result.
#[derive(Debug, Clone)]
pub struct JobEnqueuer<K> {
    connector: K,
}

impl<K: BrokerConnector> JobEnqueuer<K> {
    pub fn new(connector: K) -> Self {
        Self { connector }
    }

    #[instrument(skip(self), err)]
    pub async fn enqueue(&self, household_key: HouseholdKey) -> Result<EnqueueReceipt, EnqueueError> {
        let mut conn = self
            .connector
            .connect()
            .await
            .map_err(|e| EnqueueError::BrokerUnavailable(e.to_string()))?;

        let job = JobMessage::new(household_key);
        let published = publish(&mut conn, &job).await;

        if let Err(e) = conn.close().await {
            warn!(error = %e, "failed to close broker connection after publish");
        }

        match published {
            Ok(()) => {
                info!("job queued");
                Ok(EnqueueReceipt::queued(household_key))
            }
            Err(e) if e.is_unavailable() => Err(EnqueueError::BrokerUnavailable(e.to_string())),
            Err(e) => Err(EnqueueError::Publish(e)),
        }
    }
}

async fn publish<C: BrokerConnection>(conn: &mut C, job: &JobMessage) -> Result<(), BrokerError> {
    conn.declare_work_queue().await?;
    conn.publish_job(job).await
}

#[async_trait]
impl<K> JobSubmitter for JobEnqueuer<K>
where
    K: BrokerConnector + 'static,
{
    async fn enqueue(&self, household_key: HouseholdKey) -> Result<EnqueueReceipt, EnqueueError> {
        JobEnqueuer::enqueue(self, household_key).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hhrec_events::InMemoryBroker;

    use super::*;

    fn key(v: i64) -> HouseholdKey {
        HouseholdKey::new(v).unwrap()
    }

    #[tokio::test]
    async fn enqueue_declares_queue_and_publishes_one_job() {
        let broker = InMemoryBroker::default();
        let enqueuer = JobEnqueuer::new(broker.clone());

        let receipt = enqueuer.enqueue(key(42)).await.unwrap();

        assert_eq!(receipt, EnqueueReceipt::queued(key(42)));
        assert!(broker.is_work_queue_declared());
        assert_eq!(broker.ready_len(), 1);

        let mut conn = broker.connect().await.unwrap();
        let delivery = conn
            .next_delivery(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.body, br#"{"user_id":42}"#.to_vec());
    }

    #[tokio::test]
    async fn unreachable_broker_changes_nothing() {
        let broker = InMemoryBroker::default();
        broker.set_reachable(false);
        let enqueuer = JobEnqueuer::new(broker.clone());

        let err = enqueuer.enqueue(key(7)).await.unwrap_err();

        assert!(matches!(err, EnqueueError::BrokerUnavailable(_)));
        assert_eq!(broker.ready_len(), 0);
    }

    #[tokio::test]
    async fn same_key_twice_yields_two_jobs() {
        let broker = InMemoryBroker::default();
        let submitter: &dyn JobSubmitter = &JobEnqueuer::new(broker.clone());

        submitter.enqueue(key(5)).await.unwrap();
        submitter.enqueue(key(5)).await.unwrap();

        assert_eq!(broker.ready_len(), 2);
    }

    #[test]
    fn receipt_serializes_as_queued_status() {
        let json = serde_json::to_value(EnqueueReceipt::queued(key(42))).unwrap();
        assert_eq!(json, serde_json::json!({"status": "queued", "household_key": 42}));
    }
}
