//! Client-side wait for a processed result.
//!
//! The poller asks a [`ResultSource`] for the record every `interval` until it
//! shows up or the wall-clock `timeout` elapses. A timeout is an outcome, not an
//! error; a transport failure is an error and ends the poll at once.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use hhrec_core::{HouseholdKey, ResultRecord};

use crate::error::ClientError;

/// Where the poller looks for results.
#[async_trait]
pub trait ResultSource: Send + Sync {
    /// `Ok(None)` while the result is not available yet.
    async fn fetch(&self, household_key: HouseholdKey) -> Result<Option<ResultRecord>, ClientError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Ready(ResultRecord),
    TimedOut,
}

impl PollOutcome {
    pub fn into_ready(self) -> Option<ResultRecord> {
        match self {
            PollOutcome::Ready(record) => Some(record),
            PollOutcome::TimedOut => None,
        }
    }
}

/// Poll `source` for `household_key`.
///
/// The first attempt is immediate. A final attempt is made at the deadline, so
/// a result that lands during the last sleep is still returned; the last sleep is
/// clipped to the remaining budget.
pub async fn poll<S>(
    source: &S,
    household_key: HouseholdKey,
    timeout: Duration,
    interval: Duration,
) -> Result<PollOutcome, ClientError>
where
    S: ResultSource + ?Sized,
{
    // A timeout too large to represent means no deadline.
    let deadline = Instant::now().checked_add(timeout);
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if let Some(record) = source.fetch(household_key).await? {
            debug!(%household_key, attempts, "result ready");
            return Ok(PollOutcome::Ready(record));
        }

        let pause = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    debug!(%household_key, attempts, "poll timed out");
                    return Ok(PollOutcome::TimedOut);
                }
                interval.min(deadline - now)
            }
            None => interval,
        };
        tokio::time::sleep(pause).await;
    }
}
