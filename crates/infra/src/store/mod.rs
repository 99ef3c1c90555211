//! Persistence seams: catalog (read-only), result store, request log.
//!
//! Each store is an async trait with an in-memory implementation for tests/dev
//! and a Postgres implementation for production.

use std::sync::Arc;

use async_trait::async_trait;

use hhrec_core::{CatalogRecord, HouseholdKey, RequestLogEntry, ResultRecord};

pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryCatalogStore, InMemoryRequestLog, InMemoryResultStore};
pub use postgres::{PostgresCatalogStore, PostgresRequestLog, PostgresResultStore};

/// Number of entries returned by [`RequestLog::recent`] when the caller does not
/// ask for a specific limit.
pub const RECENT_REQUESTS_LIMIT: usize = 5;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("stored row could not be decoded: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(e.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => StoreError::Decode(e.to_string()),
            other => StoreError::Query(other.to_string()),
        }
    }
}

/// Key → precomputed record lookup.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// `Ok(None)` when the household is unknown.
    async fn get(&self, household_key: HouseholdKey) -> Result<Option<CatalogRecord>, StoreError>;
}

/// Durable, idempotently-writable rendered results.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert or replace the record for its key.
    async fn upsert(&self, record: &ResultRecord) -> Result<(), StoreError>;

    async fn get(&self, household_key: HouseholdKey) -> Result<Option<ResultRecord>, StoreError>;
}

/// Append-only audit log of lookups.
#[async_trait]
pub trait RequestLog: Send + Sync {
    async fn append(&self, entry: &RequestLogEntry) -> Result<(), StoreError>;

    /// Most recent entries for `requester`, newest first.
    async fn recent(&self, requester: &str, limit: usize) -> Result<Vec<RequestLogEntry>, StoreError>;
}

#[async_trait]
impl<S> CatalogStore for Arc<S>
where
    S: CatalogStore + ?Sized,
{
    async fn get(&self, household_key: HouseholdKey) -> Result<Option<CatalogRecord>, StoreError> {
        (**self).get(household_key).await
    }
}

#[async_trait]
impl<S> ResultStore for Arc<S>
where
    S: ResultStore + ?Sized,
{
    async fn upsert(&self, record: &ResultRecord) -> Result<(), StoreError> {
        (**self).upsert(record).await
    }

    async fn get(&self, household_key: HouseholdKey) -> Result<Option<ResultRecord>, StoreError> {
        (**self).get(household_key).await
    }
}

#[async_trait]
impl<S> RequestLog for Arc<S>
where
    S: RequestLog + ?Sized,
{
    async fn append(&self, entry: &RequestLogEntry) -> Result<(), StoreError> {
        (**self).append(entry).await
    }

    async fn recent(&self, requester: &str, limit: usize) -> Result<Vec<RequestLogEntry>, StoreError> {
        (**self).recent(requester, limit).await
    }
}
