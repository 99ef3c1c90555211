//! Infrastructure layer: Postgres stores, Redis broker, config, the worker.

pub mod broker;
pub mod config;
pub mod items;
pub mod jobs;
pub mod store;
pub mod workers;

pub use config::{ConfigError, Settings};
pub use jobs::{EnqueueError, EnqueueReceipt, JobEnqueuer, JobSubmitter, RetryPolicy};
pub use store::{CatalogStore, RequestLog, ResultStore, StoreError};
pub use workers::{JobProcessor, RecommendationWorker, WorkerConfig, WorkerError, WorkerHandle};
