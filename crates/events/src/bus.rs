//! Fan-out channel abstraction (mechanics only).
//!
//! The fan-out channel is the broker's broadcast side: every subscriber bound at
//! publish time receives a copy, a subscriber that is not bound receives nothing.
//! It carries result notifications only. The durable result store is the source of
//! truth; a lost notification is never a lost result.
//!
//! ```text
//! Worker → Result Store (upsert) → Fan-out channel (publish) → Subscribers
//!                                                                ├─ SSE clients
//!                                                                └─ dashboards / logs
//! ```

use std::sync::{Arc, Weak};
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to a fan-out channel.
///
/// ## Usage Pattern
///
/// ```ignore
/// let subscription = channel.subscribe();
///
/// loop {
///     match subscription.recv_timeout(Duration::from_secs(1)) {
///         Ok(msg) => forward(msg),
///         Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,  // Check for shutdown
///         Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,  // Channel closed
///     }
/// }
/// ```
///
/// Subscriptions are designed for single-threaded consumption. Each one should be
/// drained by one thread (or task via `spawn_blocking`).
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
    alive: Arc<()>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self {
            receiver,
            alive: Arc::new(()),
        }
    }

    /// Lets a producer that rarely sends notice that this subscription is gone.
    pub fn liveness(&self) -> SubscriberLiveness {
        SubscriberLiveness(Arc::downgrade(&self.alive))
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Producer-side view of whether a [`Subscription`] still exists.
#[derive(Debug, Clone)]
pub struct SubscriberLiveness(Weak<()>);

impl SubscriberLiveness {
    pub fn is_dropped(&self) -> bool {
        self.0.strong_count() == 0
    }
}

/// Broadcast publish/subscribe channel.
///
/// ## Delivery Guarantees
///
/// None beyond best effort:
/// - a message published while nobody is subscribed is dropped
/// - a slow or disconnected subscriber may miss messages
///
/// `publish()` failures are surfaced to the caller, which decides whether they
/// matter (for result notifications they never abort the job).
pub trait FanoutChannel<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> FanoutChannel<M> for Arc<B>
where
    B: FanoutChannel<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
