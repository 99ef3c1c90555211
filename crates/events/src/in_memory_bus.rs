//! In-memory fan-out channel for tests/dev.

use std::sync::{Mutex, mpsc};

use crate::bus::{FanoutChannel, Subscription};

#[derive(Debug)]
pub enum InMemoryFanoutError {
    /// Publish failed due to internal lock poisoning.
    Poisoned,
}

/// In-memory broadcast channel.
///
/// - No IO / no async
/// - Subscribers bound after a publish never see it
#[derive(Debug)]
pub struct InMemoryFanout<M> {
    subscribers: Mutex<Vec<mpsc::Sender<M>>>,
}

impl<M> InMemoryFanout<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscribers (as of the last publish).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl<M> Default for InMemoryFanout<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<M> FanoutChannel<M> for InMemoryFanout<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryFanoutError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut subs = self
            .subscribers
            .lock()
            .map_err(|_| InMemoryFanoutError::Poisoned)?;

        // Drop any dead subscribers while publishing.
        subs.retain(|tx| tx.send(message.clone()).is_ok());

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        Subscription::new(rx)
    }
}
