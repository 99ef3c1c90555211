//! `hhrec-client` — HTTP client for the recommendation API and the result poller.

pub mod api_client;
pub mod error;
pub mod poller;

pub use api_client::{ApiClient, EnqueueResponse};
pub use error::ClientError;
pub use poller::{PollOutcome, ResultSource, poll};
