//! Redis Streams-backed work queue (durable, at-least-once delivery).
//!
//! ## Mapping
//!
//! - **Work queue**: one stream (`recommendation_requests`), one consumer group
//!   shared by every worker (`model_workers`). Each entry carries two fields:
//!   `payload` (the JSON job body) and `attempt` (the redelivery counter).
//! - **Declare**: `XGROUP CREATE … MKSTREAM` from id `0`, `BUSYGROUP` ignored, so
//!   jobs published before the first worker starts are still consumed.
//! - **Prefetch**: `XREADGROUP COUNT 1`, and no read at all while this connection
//!   holds as many unacknowledged entries as the prefetch allows.
//! - **Ack / reject**: `XACK` + `XDEL` in one `MULTI`.
//! - **Requeue**: re-`XADD` the payload with `attempt + 1`, then `XACK` + `XDEL`
//!   the original, in one `MULTI`.
//! - **Dead-letter**: `XADD` to the DLQ stream with the reason, then `XACK` +
//!   `XDEL`, in one `MULTI`.
//! - **Crash recovery**: entries pending on this consumer name (left over from a
//!   previous process) or idle on any consumer for longer than `claim_idle` are
//!   taken over with `XCLAIM` before new entries are read. Their delivery count is
//!   added to the redelivery counter.
//!
//! Closing a connection does not return held entries immediately; they are
//! reclaimed through the recovery path above.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamPendingId, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, RedisError};
use tracing::{debug, info, instrument, warn};

use hhrec_events::{
    BrokerConnection, BrokerConnector, BrokerError, Delivery, JobMessage, QueueTopology, ResultMessage,
};

use crate::config::BrokerSettings;

const FIELD_PAYLOAD: &str = "payload";
const FIELD_ATTEMPT: &str = "attempt";

/// Pending entries inspected per recovery scan.
const CLAIM_SCAN: usize = 16;

#[derive(Debug, Clone)]
struct StreamsConfig {
    topology: QueueTopology,
    group: String,
    consumer: String,
    claim_idle: Duration,
}

/// Connector for the Redis Streams broker.
#[derive(Debug, Clone)]
pub struct RedisStreamsBroker {
    client: redis::Client,
    config: Arc<StreamsConfig>,
}

fn redis_error(op: &str, e: RedisError) -> BrokerError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        BrokerError::Unavailable(format!("{op}: {e}"))
    } else {
        BrokerError::Command(format!("{op} failed: {e}"))
    }
}

impl RedisStreamsBroker {
    /// Create a connector. No connection is opened yet.
    pub fn new(
        redis_url: impl AsRef<str>,
        topology: QueueTopology,
        group: impl Into<String>,
        consumer: impl Into<String>,
        claim_idle: Duration,
    ) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| BrokerError::Unavailable(format!("invalid redis url: {e}")))?;

        Ok(Self {
            client,
            config: Arc::new(StreamsConfig {
                topology,
                group: group.into(),
                consumer: consumer.into(),
                claim_idle,
            }),
        })
    }

    pub fn from_settings(settings: &BrokerSettings) -> Result<Self, BrokerError> {
        let url = settings
            .redis_url
            .as_deref()
            .ok_or_else(|| BrokerError::Unavailable("REDIS_URL is not set".to_string()))?;
        Self::new(
            url,
            settings.topology.clone(),
            settings.consumer_group.clone(),
            settings.consumer_name.clone(),
            settings.claim_idle,
        )
    }

    /// Fan-out channel on the same Redis instance, for readers of result notifications.
    pub fn result_channel(&self) -> super::RedisResultChannel {
        super::RedisResultChannel::from_client(
            self.client.clone(),
            self.config.topology.result_exchange.clone(),
        )
    }
}

#[async_trait]
impl BrokerConnector for RedisStreamsBroker {
    type Connection = RedisStreamsConnection;

    async fn connect(&self) -> Result<Self::Connection, BrokerError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        debug!(consumer = %self.config.consumer, "connected to redis");

        Ok(RedisStreamsConnection {
            conn,
            config: self.config.clone(),
            prefetch: None,
            held: HashSet::new(),
        })
    }
}

/// One consumer's connection to the work queue.
pub struct RedisStreamsConnection {
    conn: MultiplexedConnection,
    config: Arc<StreamsConfig>,
    prefetch: Option<u16>,
    /// Stream ids handed out and not yet settled by this connection.
    held: HashSet<String>,
}

impl std::fmt::Debug for RedisStreamsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamsConnection")
            .field("consumer", &self.config.consumer)
            .field("prefetch", &self.prefetch)
            .field("held", &self.held)
            .finish()
    }
}

/// Build a delivery from a stream entry that was handed out `previous_deliveries`
/// times before.
fn delivery_from_entry(entry: &StreamId, previous_deliveries: usize) -> Delivery {
    let body: Vec<u8> = entry.get(FIELD_PAYLOAD).unwrap_or_default();
    let attempt: u32 = entry.get(FIELD_ATTEMPT).unwrap_or(0);
    let previous = u32::try_from(previous_deliveries).unwrap_or(u32::MAX);

    Delivery {
        id: entry.id.clone(),
        body,
        redeliveries: attempt.saturating_add(previous),
    }
}

/// Minimum idle time to pass to `XCLAIM` for a pending entry, or `None` when
/// the entry is not ours to take: already held here, or owned by a live
/// consumer that has not been idle for `claim_idle_ms`.
fn claim_threshold(
    entry: &StreamPendingId,
    held: &HashSet<String>,
    consumer: &str,
    claim_idle_ms: u64,
) -> Option<u64> {
    if held.contains(&entry.id) {
        return None;
    }
    if entry.consumer == consumer {
        return Some(0);
    }
    let idle_ms = u64::try_from(entry.last_delivered_ms).unwrap_or(u64::MAX);
    (idle_ms >= claim_idle_ms).then_some(claim_idle_ms)
}

/// Smallest stream id strictly greater than `id`, used as the inclusive start
/// of the next `XPENDING` page. `None` for an id that is not `<ms>-<seq>` or
/// is the largest possible one.
fn id_after(id: &str) -> Option<String> {
    let (ms, seq) = id.split_once('-')?;
    let ms: u64 = ms.parse().ok()?;
    let seq: u64 = seq.parse().ok()?;
    match seq.checked_add(1) {
        Some(seq) => Some(format!("{ms}-{seq}")),
        None => ms.checked_add(1).map(|ms| format!("{ms}-0")),
    }
}

impl RedisStreamsConnection {
    fn stream(&self) -> &str {
        &self.config.topology.work_queue
    }

    fn settle(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        if self.held.remove(&delivery.id) {
            Ok(())
        } else {
            Err(BrokerError::UnknownDelivery(delivery.id.clone()))
        }
    }

    fn at_prefetch_limit(&self) -> bool {
        self.prefetch
            .is_some_and(|limit| self.held.len() >= usize::from(limit))
    }

    /// Take over one abandoned entry, if any. Pages through the whole pending
    /// list, `CLAIM_SCAN` entries at a time.
    async fn claim_abandoned(&mut self) -> Result<Option<Delivery>, BrokerError> {
        let claim_idle_ms = u64::try_from(self.config.claim_idle.as_millis()).unwrap_or(u64::MAX);
        let mut from = "-".to_string();

        loop {
            let pending: StreamPendingCountReply = redis::cmd("XPENDING")
                .arg(self.stream())
                .arg(&self.config.group)
                .arg(&from)
                .arg("+")
                .arg(CLAIM_SCAN)
                .query_async(&mut self.conn)
                .await
                .map_err(|e| redis_error("XPENDING", e))?;

            let page_len = pending.ids.len();
            let next_from = pending.ids.last().map(|entry| id_after(&entry.id));

            for entry in &pending.ids {
                let Some(min_idle) = claim_threshold(entry, &self.held, &self.config.consumer, claim_idle_ms)
                else {
                    continue;
                };

                let claimed: StreamClaimReply = redis::cmd("XCLAIM")
                    .arg(self.stream())
                    .arg(&self.config.group)
                    .arg(&self.config.consumer)
                    .arg(min_idle)
                    .arg(&entry.id)
                    .query_async(&mut self.conn)
                    .await
                    .map_err(|e| redis_error("XCLAIM", e))?;

                // Empty when another consumer claimed it first.
                let Some(stream_entry) = claimed.ids.first() else {
                    continue;
                };

                let delivery = delivery_from_entry(stream_entry, entry.times_delivered);
                info!(
                    delivery_id = %delivery.id,
                    previous_owner = %entry.consumer,
                    redeliveries = delivery.redeliveries,
                    "reclaimed abandoned delivery"
                );
                self.held.insert(delivery.id.clone());
                return Ok(Some(delivery));
            }

            match next_from {
                Some(Some(next)) if page_len >= CLAIM_SCAN => from = next,
                _ => return Ok(None),
            }
        }
    }

    async fn read_new(&mut self, wait: Duration) -> Result<Option<Delivery>, BrokerError> {
        let mut options = StreamReadOptions::default()
            .group(&self.config.group, &self.config.consumer)
            .count(1);
        let block_ms = usize::try_from(wait.as_millis()).unwrap_or(usize::MAX);
        if block_ms > 0 {
            options = options.block(block_ms);
        }

        let stream = self.config.topology.work_queue.clone();
        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(&[stream.as_str()], &[">"], &options)
            .await
            .map_err(|e| redis_error("XREADGROUP", e))?;

        let Some(entry) = reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .next()
        else {
            return Ok(None);
        };

        let delivery = delivery_from_entry(&entry, 0);
        self.held.insert(delivery.id.clone());
        Ok(Some(delivery))
    }

    /// `XACK` + `XDEL` of one entry in a single transaction.
    async fn remove_entry(&mut self, id: &str, op: &str) -> Result<(), BrokerError> {
        let stream = self.stream().to_string();
        let () = redis::pipe()
            .atomic()
            .cmd("XACK")
            .arg(&stream)
            .arg(&self.config.group)
            .arg(id)
            .ignore()
            .cmd("XDEL")
            .arg(&stream)
            .arg(id)
            .ignore()
            .query_async(&mut self.conn)
            .await
            .map_err(|e| redis_error(op, e))?;
        Ok(())
    }
}

#[async_trait]
impl BrokerConnection for RedisStreamsConnection {
    async fn declare_work_queue(&mut self) -> Result<(), BrokerError> {
        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(self.stream())
            .arg(&self.config.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut self.conn)
            .await;

        match created {
            Ok(()) => {
                info!(stream = %self.stream(), group = %self.config.group, "work queue declared");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(redis_error("XGROUP CREATE", e)),
        }
    }

    async fn declare_result_exchange(&mut self) -> Result<(), BrokerError> {
        // Pub/sub channels exist implicitly.
        Ok(())
    }

    async fn set_prefetch(&mut self, count: u16) -> Result<(), BrokerError> {
        self.prefetch = if count == 0 { None } else { Some(count) };
        Ok(())
    }

    #[instrument(skip(self, job), fields(household_key = %job.household_key), err)]
    async fn publish_job(&mut self, job: &JobMessage) -> Result<(), BrokerError> {
        let payload = job.to_bytes()?;
        let stream = self.stream().to_string();

        let _: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("*")
            .arg(FIELD_PAYLOAD)
            .arg(payload)
            .arg(FIELD_ATTEMPT)
            .arg(0u32)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| redis_error("XADD", e))?;

        Ok(())
    }

    async fn publish_result(&mut self, result: &ResultMessage) -> Result<(), BrokerError> {
        let payload =
            serde_json::to_string(result).map_err(|e| BrokerError::Serialization(e.to_string()))?;
        let channel = self.config.topology.result_exchange.clone();

        let receivers: i64 = self
            .conn
            .publish(&channel, payload)
            .await
            .map_err(|e| redis_error("PUBLISH", e))?;

        debug!(channel = %channel, receivers, "result published");
        Ok(())
    }

    async fn next_delivery(&mut self, wait: Duration) -> Result<Option<Delivery>, BrokerError> {
        if self.at_prefetch_limit() {
            return Ok(None);
        }

        if let Some(delivery) = self.claim_abandoned().await? {
            return Ok(Some(delivery));
        }

        self.read_new(wait).await
    }

    #[instrument(skip(self, delivery), fields(delivery_id = %delivery.id), err)]
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.settle(delivery)?;
        self.remove_entry(&delivery.id, "ack").await
    }

    #[instrument(skip(self, delivery), fields(delivery_id = %delivery.id), err)]
    async fn reject(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.settle(delivery)?;
        self.remove_entry(&delivery.id, "reject").await
    }

    #[instrument(skip(self, delivery), fields(delivery_id = %delivery.id, attempt = delivery.redeliveries + 1), err)]
    async fn requeue(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.settle(delivery)?;
        let stream = self.stream().to_string();

        let () = redis::pipe()
            .atomic()
            .cmd("XADD")
            .arg(&stream)
            .arg("*")
            .arg(FIELD_PAYLOAD)
            .arg(delivery.body.as_slice())
            .arg(FIELD_ATTEMPT)
            .arg(delivery.redeliveries.saturating_add(1))
            .ignore()
            .cmd("XACK")
            .arg(&stream)
            .arg(&self.config.group)
            .arg(&delivery.id)
            .ignore()
            .cmd("XDEL")
            .arg(&stream)
            .arg(&delivery.id)
            .ignore()
            .query_async(&mut self.conn)
            .await
            .map_err(|e| redis_error("requeue", e))?;

        Ok(())
    }

    #[instrument(skip(self, delivery), fields(delivery_id = %delivery.id, redeliveries = delivery.redeliveries), err)]
    async fn dead_letter(&mut self, delivery: &Delivery, reason: &str) -> Result<(), BrokerError> {
        self.settle(delivery)?;
        let stream = self.stream().to_string();
        let dlq = self.config.topology.dead_letter_queue.clone();

        let () = redis::pipe()
            .atomic()
            .cmd("XADD")
            .arg(&dlq)
            .arg("*")
            .arg(FIELD_PAYLOAD)
            .arg(delivery.body.as_slice())
            .arg("redeliveries")
            .arg(delivery.redeliveries)
            .arg("reason")
            .arg(reason)
            .arg("original_message_id")
            .arg(&delivery.id)
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .ignore()
            .cmd("XACK")
            .arg(&stream)
            .arg(&self.config.group)
            .arg(&delivery.id)
            .ignore()
            .cmd("XDEL")
            .arg(&stream)
            .arg(&delivery.id)
            .ignore()
            .query_async(&mut self.conn)
            .await
            .map_err(|e| redis_error("dead-letter", e))?;

        warn!(dead_letter_queue = %dlq, reason, "message sent to dead-letter queue");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if !self.held.is_empty() {
            warn!(
                held = self.held.len(),
                "closing with unacknowledged deliveries; they will be reclaimed"
            );
        }
        self.held.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn entry(fields: &[(&str, &[u8])]) -> StreamId {
        StreamId {
            id: "1700000000000-0".to_string(),
            map: fields
                .iter()
                .map(|(k, v)| (k.to_string(), redis::Value::Data(v.to_vec())))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn fresh_entry_uses_attempt_field() {
        let delivery = delivery_from_entry(&entry(&[("payload", br#"{"user_id":5}"#), ("attempt", b"2")]), 0);

        assert_eq!(delivery.id, "1700000000000-0");
        assert_eq!(delivery.body, br#"{"user_id":5}"#.to_vec());
        assert_eq!(delivery.redeliveries, 2);
    }

    #[test]
    fn reclaimed_entry_adds_previous_deliveries() {
        let delivery = delivery_from_entry(&entry(&[("payload", b"{}"), ("attempt", b"1")]), 3);
        assert_eq!(delivery.redeliveries, 4);
    }

    #[test]
    fn missing_fields_yield_an_empty_first_delivery() {
        let delivery = delivery_from_entry(&entry(&[]), 0);
        assert!(delivery.body.is_empty());
        assert_eq!(delivery.redeliveries, 0);
    }

    fn pending(id: &str, consumer: &str, idle_ms: usize) -> StreamPendingId {
        StreamPendingId {
            id: id.to_string(),
            consumer: consumer.to_string(),
            last_delivered_ms: idle_ms,
            times_delivered: 1,
        }
    }

    #[test]
    fn own_pending_entries_are_claimed_without_idle_wait() {
        let held = HashSet::new();
        assert_eq!(claim_threshold(&pending("5-0", "worker-a", 0), &held, "worker-a", 60_000), Some(0));
    }

    #[test]
    fn other_consumers_entries_wait_for_claim_idle() {
        let held = HashSet::new();
        assert_eq!(claim_threshold(&pending("5-0", "worker-b", 59_999), &held, "worker-a", 60_000), None);
        assert_eq!(
            claim_threshold(&pending("5-0", "worker-b", 60_000), &held, "worker-a", 60_000),
            Some(60_000)
        );
    }

    #[test]
    fn held_entries_are_never_reclaimed() {
        let held = HashSet::from(["5-0".to_string()]);
        assert_eq!(claim_threshold(&pending("5-0", "worker-a", 0), &held, "worker-a", 60_000), None);
    }

    #[test]
    fn next_page_starts_just_past_the_last_id() {
        assert_eq!(id_after("1700000000000-3").as_deref(), Some("1700000000000-4"));
        assert_eq!(id_after(&format!("7-{}", u64::MAX)).as_deref(), Some("8-0"));
        assert_eq!(id_after(&format!("{}-{}", u64::MAX, u64::MAX)), None);
        assert_eq!(id_after("garbage"), None);
    }

    #[test]
    fn invalid_url_is_reported_as_unavailable() {
        let err = RedisStreamsBroker::new(
            "not a url",
            QueueTopology::default(),
            "model_workers",
            "worker-test",
            Duration::from_secs(60),
        )
        .unwrap_err();
        assert!(err.is_unavailable());
    }
}
