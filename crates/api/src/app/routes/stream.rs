//! Server-sent events relaying the fan-out result channel.
//!
//! Same guarantees as the channel itself: a client only sees results published
//! while it is connected, and a slow client may miss some. The result API stays the
//! source of truth.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use axum::{
    extract::Extension,
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use tokio::sync::mpsc::unbounded_channel;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use crate::app::services::AppServices;

/// GET /api/v1/stream/results
pub async fn stream_results(Extension(services): Extension<Arc<AppServices>>) -> Response {
    let (tx, rx) = unbounded_channel::<Result<SseEvent, Infallible>>();
    let subscription = services.feed.subscribe();

    // The subscription is a blocking receiver; drain it off the async workers.
    tokio::task::spawn_blocking(move || {
        loop {
            match subscription.recv_timeout(Duration::from_millis(500)) {
                Ok(message) => {
                    let data = match serde_json::to_string(&message) {
                        Ok(s) => s,
                        Err(e) => {
                            warn!(error = %e, "result notification could not be encoded");
                            continue;
                        }
                    };
                    let event = SseEvent::default().event("result").data(data);
                    if tx.send(Ok(event)).is_err() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if tx.is_closed() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("result stream subscriber gone");
    });

    Sse::new(UnboundedReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}
