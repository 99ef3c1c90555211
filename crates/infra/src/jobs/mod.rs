//! Job submission and connection retry policy.
//!
//! - `JobEnqueuer`: validated key → durable job message on the work queue
//! - `RetryPolicy`: bounded fixed-delay retry used when connecting to the broker
//!   and the database

pub mod enqueue;
pub mod retry;

pub use enqueue::{EnqueueError, EnqueueReceipt, JobEnqueuer, JobSubmitter};
pub use retry::{RetryExhausted, RetryPolicy, retry_fixed};
