//! Background worker that consumes recommendation jobs.
//!
//! - One broker connection per worker, prefetch 1: jobs are strictly sequential
//! - At-least-once delivery; processing is idempotent (upsert keyed by household)
//! - Graceful shutdown between deliveries

pub mod processor;
pub mod recommendation_worker;

pub use processor::{Disposition, JobProcessor, ProcessingError, WorkerStats};
pub use recommendation_worker::{
    RecommendationWorker, WorkerConfig, WorkerError, WorkerHandle, connect_with_retry, open_consumer,
};
