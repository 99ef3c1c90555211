//! In-memory broker for tests/dev.
//!
//! Same contract as the Redis-backed broker: durable-until-acked work queue,
//! per-connection prefetch, redelivery on close/drop, dead-letter queue, and a
//! best-effort fan-out exchange. It also exposes knobs to make the broker
//! unreachable or the fan-out refuse publishes, and counters for assertions.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::broker::{BrokerConnection, BrokerConnector, Delivery, QueueTopology};
use crate::bus::{FanoutChannel, Subscription};
use crate::error::BrokerError;
use crate::in_memory_bus::InMemoryFanout;
use crate::messages::{JobMessage, ResultMessage};

/// A payload parked on the dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub body: Vec<u8>,
    pub redeliveries: u32,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    body: Vec<u8>,
    redeliveries: u32,
}

#[derive(Debug)]
struct BrokerState {
    reachable: bool,
    fanout_failing: bool,
    connect_attempts: u32,
    work_queue_declared: bool,
    exchange_declared: bool,
    ready: VecDeque<QueuedMessage>,
    /// delivery id → (connection id, message)
    outstanding: HashMap<String, (u64, QueuedMessage)>,
    dead_letters: Vec<DeadLetter>,
    rejected: usize,
    acked: usize,
    next_delivery_id: u64,
    next_connection_id: u64,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            reachable: true,
            fanout_failing: false,
            connect_attempts: 0,
            work_queue_declared: false,
            exchange_declared: false,
            ready: VecDeque::new(),
            outstanding: HashMap::new(),
            dead_letters: Vec::new(),
            rejected: 0,
            acked: 0,
            next_delivery_id: 0,
            next_connection_id: 0,
        }
    }
}

#[derive(Debug)]
struct Shared {
    topology: QueueTopology,
    state: Mutex<BrokerState>,
    notify: Notify,
    fanout: InMemoryFanout<ResultMessage>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Cloneable handle to one in-memory broker instance.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(QueueTopology::default())
    }
}

impl InMemoryBroker {
    pub fn new(topology: QueueTopology) -> Self {
        Self {
            shared: Arc::new(Shared {
                topology,
                state: Mutex::new(BrokerState::default()),
                notify: Notify::new(),
                fanout: InMemoryFanout::new(),
            }),
        }
    }

    pub fn topology(&self) -> &QueueTopology {
        &self.shared.topology
    }

    /// Make subsequent connection attempts fail (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.lock().reachable = reachable;
    }

    /// Make fan-out publishes fail (or succeed again).
    pub fn set_fanout_failing(&self, failing: bool) {
        self.shared.lock().fanout_failing = failing;
    }

    /// Put a raw body on the work queue, bypassing serialization.
    pub fn push_raw(&self, body: impl Into<Vec<u8>>) {
        self.shared.lock().ready.push_back(QueuedMessage {
            body: body.into(),
            redeliveries: 0,
        });
        self.shared.notify.notify_waiters();
    }

    pub fn connect_attempts(&self) -> u32 {
        self.shared.lock().connect_attempts
    }

    pub fn is_work_queue_declared(&self) -> bool {
        self.shared.lock().work_queue_declared
    }

    /// Messages waiting to be delivered.
    pub fn ready_len(&self) -> usize {
        self.shared.lock().ready.len()
    }

    /// Messages delivered but not yet settled.
    pub fn outstanding_len(&self) -> usize {
        self.shared.lock().outstanding.len()
    }

    pub fn acked_count(&self) -> usize {
        self.shared.lock().acked
    }

    pub fn rejected_count(&self) -> usize {
        self.shared.lock().rejected
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.lock().dead_letters.clone()
    }

    /// Subscribe to the fan-out result exchange.
    pub fn subscribe_results(&self) -> Subscription<ResultMessage> {
        self.shared.fanout.subscribe()
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    type Connection = InMemoryConnection;

    async fn connect(&self) -> Result<Self::Connection, BrokerError> {
        let mut state = self.shared.lock();
        state.connect_attempts += 1;
        if !state.reachable {
            return Err(BrokerError::Unavailable(
                "in-memory broker is unreachable".to_string(),
            ));
        }
        state.next_connection_id += 1;
        Ok(InMemoryConnection {
            shared: self.shared.clone(),
            id: state.next_connection_id,
            prefetch: None,
            closed: false,
        })
    }
}

impl FanoutChannel<ResultMessage> for InMemoryBroker {
    type Error = BrokerError;

    fn publish(&self, message: ResultMessage) -> Result<(), Self::Error> {
        self.shared
            .fanout
            .publish(message)
            .map_err(|e| BrokerError::Command(format!("{e:?}")))
    }

    fn subscribe(&self) -> Subscription<ResultMessage> {
        self.subscribe_results()
    }
}

/// Connection to an [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemoryConnection {
    shared: Arc<Shared>,
    id: u64,
    prefetch: Option<u16>,
    closed: bool,
}

impl InMemoryConnection {
    fn settle(&self, delivery: &Delivery) -> Result<QueuedMessage, BrokerError> {
        let mut state = self.shared.lock();
        match state.outstanding.get(&delivery.id) {
            Some((owner, _)) if *owner == self.id => {}
            _ => return Err(BrokerError::UnknownDelivery(delivery.id.clone())),
        }
        state
            .outstanding
            .remove(&delivery.id)
            .map(|(_, msg)| msg)
            .ok_or_else(|| BrokerError::UnknownDelivery(delivery.id.clone()))
    }

    /// Hand this connection's outstanding deliveries back to the queue.
    fn return_outstanding(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut state = self.shared.lock();
        let mine: Vec<String> = state
            .outstanding
            .iter()
            .filter(|(_, (owner, _))| *owner == self.id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in mine {
            if let Some((_, mut msg)) = state.outstanding.remove(&id) {
                msg.redeliveries += 1;
                state.ready.push_front(msg);
            }
        }
        drop(state);
        self.shared.notify.notify_waiters();
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        self.return_outstanding();
    }
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    async fn declare_work_queue(&mut self) -> Result<(), BrokerError> {
        self.shared.lock().work_queue_declared = true;
        Ok(())
    }

    async fn declare_result_exchange(&mut self) -> Result<(), BrokerError> {
        self.shared.lock().exchange_declared = true;
        Ok(())
    }

    async fn set_prefetch(&mut self, count: u16) -> Result<(), BrokerError> {
        self.prefetch = if count == 0 { None } else { Some(count) };
        Ok(())
    }

    async fn publish_job(&mut self, job: &JobMessage) -> Result<(), BrokerError> {
        let body = job.to_bytes()?;
        {
            let mut state = self.shared.lock();
            if !state.work_queue_declared {
                return Err(BrokerError::NotDeclared(
                    self.shared.topology.work_queue.clone(),
                ));
            }
            state.ready.push_back(QueuedMessage {
                body,
                redeliveries: 0,
            });
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn publish_result(&mut self, result: &ResultMessage) -> Result<(), BrokerError> {
        {
            let state = self.shared.lock();
            if !state.exchange_declared {
                return Err(BrokerError::NotDeclared(
                    self.shared.topology.result_exchange.clone(),
                ));
            }
            if state.fanout_failing {
                return Err(BrokerError::Command("fan-out publish refused".to_string()));
            }
        }
        self.shared
            .fanout
            .publish(result.clone())
            .map_err(|e| BrokerError::Command(format!("{e:?}")))
    }

    async fn next_delivery(&mut self, wait: Duration) -> Result<Option<Delivery>, BrokerError> {
        // A wait too large to represent blocks until something arrives.
        let deadline = Instant::now().checked_add(wait);

        loop {
            // Registered before the queue check so a publish in between is not missed.
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.lock();
                let held = state
                    .outstanding
                    .values()
                    .filter(|(owner, _)| *owner == self.id)
                    .count();
                if self.prefetch.is_some_and(|p| held >= usize::from(p)) {
                    return Ok(None);
                }

                if let Some(msg) = state.ready.pop_front() {
                    state.next_delivery_id += 1;
                    let id = state.next_delivery_id.to_string();
                    let delivery = Delivery {
                        id: id.clone(),
                        body: msg.body.clone(),
                        redeliveries: msg.redeliveries,
                    };
                    state.outstanding.insert(id, (self.id, msg));
                    return Ok(Some(delivery));
                }
            }

            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    if tokio::time::timeout(deadline - now, notified).await.is_err() {
                        return Ok(None);
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.settle(delivery)?;
        self.shared.lock().acked += 1;
        Ok(())
    }

    async fn reject(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.settle(delivery)?;
        self.shared.lock().rejected += 1;
        Ok(())
    }

    async fn requeue(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut msg = self.settle(delivery)?;
        msg.redeliveries += 1;
        self.shared.lock().ready.push_back(msg);
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn dead_letter(&mut self, delivery: &Delivery, reason: &str) -> Result<(), BrokerError> {
        let msg = self.settle(delivery)?;
        let mut state = self.shared.lock();
        state.dead_letters.push(DeadLetter {
            body: msg.body,
            redeliveries: msg.redeliveries,
            reason: reason.to_string(),
        });
        state.acked += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.return_outstanding();
        Ok(())
    }
}
