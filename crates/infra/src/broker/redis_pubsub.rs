//! Redis pub/sub reader for result notifications.
//!
//! Pub/sub is not durable: a subscriber that is offline when a result is
//! published never sees it. That matches the fan-out contract; the result store
//! is the source of truth. Workers publish through their broker connection, so
//! this side only subscribes.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use hhrec_events::{ResultMessage, SubscriberLiveness, Subscription};

/// How long a subscription thread blocks on the socket before checking whether
/// its reader is still there.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Fan-out side of the broker, seen from readers (SSE relays, dashboards).
#[derive(Debug, Clone)]
pub struct RedisResultChannel {
    client: redis::Client,
    channel: String,
}

impl RedisResultChannel {
    pub fn from_client(client: redis::Client, channel: impl Into<String>) -> Self {
        Self {
            client,
            channel: channel.into(),
        }
    }

    /// Subscribe on a dedicated connection. The background thread ends when
    /// the returned subscription is dropped or the connection fails.
    pub fn subscribe(&self) -> Subscription<ResultMessage> {
        let (tx, rx) = mpsc::channel();
        let subscription = Subscription::new(rx);
        let liveness = subscription.liveness();

        let client = self.client.clone();
        let channel = self.channel.clone();

        thread::spawn(move || {
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "result subscription could not connect");
                    return;
                }
            };

            let mut pubsub = conn.as_pubsub();
            if let Err(e) = pubsub.subscribe(&channel) {
                warn!(error = %e, channel = %channel, "result subscription failed");
                return;
            }
            if let Err(e) = pubsub.set_read_timeout(Some(READ_TIMEOUT)) {
                warn!(error = %e, "result subscription could not set a read timeout");
                return;
            }

            loop {
                let msg = match pubsub.get_message() {
                    Ok(m) => m,
                    Err(e) if keep_listening(&e, &liveness) => continue,
                    Err(e) => {
                        if !liveness.is_dropped() {
                            warn!(error = %e, channel = %channel, "result subscription lost");
                        }
                        return;
                    }
                };

                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };

                let result: ResultMessage = match serde_json::from_str(&payload) {
                    Ok(r) => r,
                    Err(e) => {
                        debug!(error = %e, "skipping undecodable result message");
                        continue;
                    }
                };

                if tx.send(result).is_err() {
                    return;
                }
            }
        });

        subscription
    }
}

/// A read that merely timed out keeps the thread going while someone listens.
fn keep_listening(err: &redis::RedisError, liveness: &SubscriberLiveness) -> bool {
    err.is_timeout() && !liveness.is_dropped()
}
