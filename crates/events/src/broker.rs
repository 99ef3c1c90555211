//! Work-queue broker abstraction.
//!
//! A broker offers three things to the pipeline:
//!
//! - a **durable work queue** with at-least-once delivery and explicit
//!   acknowledgment: a delivery stays outstanding until it is acked, rejected,
//!   requeued or dead-lettered, and an outstanding delivery whose consumer dies is
//!   handed out again;
//! - a **fan-out result exchange** for best-effort notifications;
//! - a **dead-letter queue** for payloads that kept failing.
//!
//! Connections are obtained through a [`BrokerConnector`]. The enqueue path opens a
//! connection per publish; a worker holds one connection for its lifetime.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::BrokerError;
use crate::messages::{JobMessage, ResultMessage};

pub const DEFAULT_WORK_QUEUE: &str = "recommendation_requests";
pub const DEFAULT_DEAD_LETTER_QUEUE: &str = "recommendation_requests:dlq";
pub const DEFAULT_RESULT_EXCHANGE: &str = "results";

/// Names of the broker objects the pipeline uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    pub work_queue: String,
    pub dead_letter_queue: String,
    pub result_exchange: String,
}

impl Default for QueueTopology {
    fn default() -> Self {
        Self {
            work_queue: DEFAULT_WORK_QUEUE.to_string(),
            dead_letter_queue: DEFAULT_DEAD_LETTER_QUEUE.to_string(),
            result_exchange: DEFAULT_RESULT_EXCHANGE.to_string(),
        }
    }
}

/// One outstanding message handed to a consumer.
///
/// `id` is the broker's delivery handle; it is only meaningful for acknowledging
/// this delivery and is never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    pub body: Vec<u8>,
    /// How many times this payload was handed out before this delivery.
    pub redeliveries: u32,
}

/// Opens broker connections.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    type Connection: BrokerConnection;

    /// One connection attempt. Fails with [`BrokerError::Unavailable`] when the
    /// broker cannot be reached; retrying is the caller's decision.
    async fn connect(&self) -> Result<Self::Connection, BrokerError>;
}

/// A live connection (plus channel) to the broker.
#[async_trait]
pub trait BrokerConnection: Send {
    /// Declare the durable work queue. Idempotent.
    async fn declare_work_queue(&mut self) -> Result<(), BrokerError>;

    /// Declare the fan-out result exchange. Idempotent.
    async fn declare_result_exchange(&mut self) -> Result<(), BrokerError>;

    /// Limit the number of unacknowledged deliveries held by this connection.
    async fn set_prefetch(&mut self, count: u16) -> Result<(), BrokerError>;

    /// Publish a job in persistent mode.
    async fn publish_job(&mut self, job: &JobMessage) -> Result<(), BrokerError>;

    /// Publish a result notification on the fan-out exchange.
    async fn publish_result(&mut self, result: &ResultMessage) -> Result<(), BrokerError>;

    /// Wait up to `wait` for the next delivery. `Ok(None)` means nothing arrived,
    /// or the prefetch limit is reached.
    async fn next_delivery(&mut self, wait: Duration) -> Result<Option<Delivery>, BrokerError>;

    /// Remove the delivery from the queue for good.
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Reject without requeue: the payload is discarded.
    async fn reject(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Reject with requeue: the payload goes back on the work queue with its
    /// redelivery counter incremented.
    async fn requeue(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Move the payload to the dead-letter queue and acknowledge the delivery.
    async fn dead_letter(&mut self, delivery: &Delivery, reason: &str) -> Result<(), BrokerError>;

    /// Close the connection. Outstanding deliveries are returned to the queue.
    async fn close(&mut self) -> Result<(), BrokerError>;
}
