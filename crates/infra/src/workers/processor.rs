//! Per-delivery state machine of the recommendation worker.
//!
//! ```text
//! received → processing ─┬─ ok ─────────────► upsert → publish (best effort) → ack
//!                        ├─ unknown key ────► ack, no result
//!                        ├─ malformed body ─► reject, no requeue
//!                        └─ transient ──────► requeue (counter + 1)
//!                                             └─ past max_redeliveries → dead-letter
//! ```
//!
//! The result upsert always completes before the acknowledgment, so a crash in
//! between only causes a redelivery that rewrites an identical record.

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use hhrec_core::{HouseholdKey, ItemDirectory, ResultRecord};
use hhrec_events::{BrokerConnection, BrokerError, Delivery, JobMessage, ResultMessage};

use crate::store::{CatalogStore, ResultStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessingError {
    /// The body can never be processed (bad JSON, missing `user_id`, key ≤ 0).
    #[error("malformed job: {0}")]
    MalformedJob(String),

    /// The household has no catalog entry. Terminal, not an error for the queue.
    #[error("household {0} not found in catalog")]
    UnknownKey(HouseholdKey),

    /// Any failure that may succeed on a later attempt.
    #[error("transient processing error: {0}")]
    Transient(String),
}

impl From<StoreError> for ProcessingError {
    fn from(e: StoreError) -> Self {
        ProcessingError::Transient(e.to_string())
    }
}

/// What happened to a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Completed,
    UnknownKey,
    Rejected,
    Requeued,
    DeadLettered,
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub unknown_keys: u64,
    pub jobs_rejected: u64,
    pub jobs_requeued: u64,
    pub jobs_dead_lettered: u64,
    pub broker_errors: u64,
}

impl WorkerStats {
    pub fn record(&mut self, disposition: Disposition) {
        self.jobs_processed += 1;
        match disposition {
            Disposition::Completed => self.jobs_succeeded += 1,
            Disposition::UnknownKey => self.unknown_keys += 1,
            Disposition::Rejected => self.jobs_rejected += 1,
            Disposition::Requeued => self.jobs_requeued += 1,
            Disposition::DeadLettered => self.jobs_dead_lettered += 1,
        }
    }
}

/// Looks up, renders and stores one job; decides its disposition on the queue.
#[derive(Debug)]
pub struct JobProcessor<C, R> {
    catalog: C,
    results: R,
    items: ItemDirectory,
    max_redeliveries: u32,
}

impl<C, R> JobProcessor<C, R>
where
    C: CatalogStore,
    R: ResultStore,
{
    /// `max_redeliveries` is how many times a failing job is put back on the
    /// queue before it is dead-lettered.
    pub fn new(catalog: C, results: R, items: ItemDirectory, max_redeliveries: u32) -> Self {
        Self {
            catalog,
            results,
            items,
            max_redeliveries,
        }
    }

    /// Parse, look up, render and upsert. Returns the stored record.
    pub async fn process(&self, body: &[u8]) -> Result<ResultRecord, ProcessingError> {
        let job = JobMessage::from_bytes(body).map_err(|e| ProcessingError::MalformedJob(e.to_string()))?;
        let key = job.household_key;

        let record = self
            .catalog
            .get(key)
            .await?
            .ok_or(ProcessingError::UnknownKey(key))?;

        let items = self.items.snapshot();
        let result = ResultRecord::render(&record, &items);
        self.results.upsert(&result).await?;

        Ok(result)
    }

    /// Process one delivery and settle it on `conn`.
    ///
    /// The returned error is a broker failure while settling; the delivery is
    /// then left to the broker's redelivery.
    #[instrument(
        skip(self, conn, delivery),
        fields(delivery_id = %delivery.id, attempt = delivery.redeliveries)
    )]
    pub async fn handle<B>(&self, conn: &mut B, delivery: &Delivery) -> Result<Disposition, BrokerError>
    where
        B: BrokerConnection + ?Sized,
    {
        match self.process(&delivery.body).await {
            Ok(result) => {
                let household_key = result.household_key;
                if let Err(e) = conn.publish_result(&ResultMessage::from(&result)).await {
                    warn!(%household_key, error = %e, "result notification not published");
                }
                conn.ack(delivery).await?;
                info!(%household_key, "job completed");
                Ok(Disposition::Completed)
            }
            Err(ProcessingError::UnknownKey(household_key)) => {
                conn.ack(delivery).await?;
                info!(%household_key, "household not in catalog, job dropped");
                Ok(Disposition::UnknownKey)
            }
            Err(ProcessingError::MalformedJob(reason)) => {
                conn.reject(delivery).await?;
                warn!(%reason, "malformed job rejected");
                Ok(Disposition::Rejected)
            }
            Err(ProcessingError::Transient(reason)) => {
                if delivery.redeliveries >= self.max_redeliveries {
                    conn.dead_letter(delivery, &reason).await?;
                    error!(
                        %reason,
                        max_redeliveries = self.max_redeliveries,
                        "job failed too often, dead-lettered"
                    );
                    Ok(Disposition::DeadLettered)
                } else {
                    conn.requeue(delivery).await?;
                    warn!(%reason, "job failed, requeued");
                    Ok(Disposition::Requeued)
                }
            }
        }
    }
}
