//! Postgres-backed stores.
//!
//! ## Tables
//!
//! - `user_recommendations`: the precomputed catalog, read-only here. The key
//!   column is `INTEGER` upstream, so reads cast to `BIGINT`; a `NULL`
//!   recommendations array reads as empty.
//! - `recommendation_results`: one row per household, written with
//!   `INSERT … ON CONFLICT (household_key) DO UPDATE`. The profile is stored as
//!   `JSON` (not `JSONB`) so the display order of its keys survives the round trip.
//! - `user_requests`: append-only request audit log.
//!
//! [`ensure_schema`] creates the tables when missing. It is a bootstrap, not a
//! migration system: existing tables are never altered.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{info, instrument};

use hhrec_core::{
    CatalogRecord, HouseholdKey, HouseholdProfile, RenderedProfile, RequestId, RequestKind,
    RequestLogEntry, ResultRecord,
};

use crate::jobs::{RetryPolicy, retry_fixed};

use super::{CatalogStore, RequestLog, ResultStore, StoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS user_recommendations (
        household_key INTEGER PRIMARY KEY,
        age_desc TEXT,
        income_desc TEXT,
        marital_status_code TEXT,
        homeowner_desc TEXT,
        hh_comp_desc TEXT,
        household_size_desc TEXT,
        kid_category_desc TEXT,
        recommendations INTEGER[]
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS recommendation_results (
        household_key BIGINT PRIMARY KEY,
        profile JSON NOT NULL,
        recommendations TEXT[] NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_requests (
        id UUID PRIMARY KEY,
        requester TEXT NOT NULL,
        household_key BIGINT NOT NULL,
        request_kind TEXT NOT NULL,
        requested_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS user_requests_requester_idx
        ON user_requests (requester, requested_at DESC)
    "#,
];

/// Open a connection pool, waiting for the database under `retry`.
pub async fn connect_pool(database_url: &str, retry: &RetryPolicy) -> Result<PgPool, StoreError> {
    let pool = retry_fixed(retry, "postgres", || {
        PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
    })
    .await
    .map_err(|e| {
        StoreError::Unavailable(format!(
            "database not reachable after {} attempts: {}",
            e.attempts, e.last_error
        ))
    })?;

    Ok(pool)
}

/// Create the pipeline's tables if they do not exist yet.
#[instrument(skip(pool), err)]
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    for statement in SCHEMA {
        sqlx::query(*statement).execute(pool).await?;
    }
    info!("database schema ready");
    Ok(())
}

fn decode_key(raw: i64) -> Result<HouseholdKey, StoreError> {
    HouseholdKey::new(raw).map_err(|e| StoreError::Decode(e.to_string()))
}

/// Catalog reads from `user_recommendations`.
#[derive(Debug, Clone)]
pub struct PostgresCatalogStore {
    pool: PgPool,
}

impl PostgresCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn catalog_from_row(row: &PgRow) -> Result<CatalogRecord, StoreError> {
    let profile = HouseholdProfile {
        age_desc: row.try_get("age_desc")?,
        income_desc: row.try_get("income_desc")?,
        marital_status_code: row.try_get("marital_status_code")?,
        homeowner_desc: row.try_get("homeowner_desc")?,
        hh_comp_desc: row.try_get("hh_comp_desc")?,
        household_size_desc: row.try_get("household_size_desc")?,
        kid_category_desc: row.try_get("kid_category_desc")?,
    };
    Ok(CatalogRecord::new(
        decode_key(row.try_get("household_key")?)?,
        profile,
        row.try_get("recommendations")?,
    ))
}

#[async_trait]
impl CatalogStore for PostgresCatalogStore {
    #[instrument(skip(self), err)]
    async fn get(&self, household_key: HouseholdKey) -> Result<Option<CatalogRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                household_key::BIGINT AS household_key,
                age_desc,
                income_desc,
                marital_status_code,
                homeowner_desc,
                hh_comp_desc,
                household_size_desc,
                kid_category_desc,
                COALESCE(recommendations::BIGINT[], '{}'::BIGINT[]) AS recommendations
            FROM user_recommendations
            WHERE household_key = $1::BIGINT
            "#,
        )
        .bind(household_key.get())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(catalog_from_row).transpose()
    }
}

/// Rendered results in `recommendation_results`.
#[derive(Debug, Clone)]
pub struct PostgresResultStore {
    pool: PgPool,
}

impl PostgresResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultStore for PostgresResultStore {
    #[instrument(skip(self, record), fields(household_key = %record.household_key), err)]
    async fn upsert(&self, record: &ResultRecord) -> Result<(), StoreError> {
        let profile = serde_json::to_string(&record.profile)
            .map_err(|e| StoreError::Query(format!("profile serialization failed: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO recommendation_results (household_key, profile, recommendations)
            VALUES ($1, $2::JSON, $3)
            ON CONFLICT (household_key)
            DO UPDATE SET
                profile = EXCLUDED.profile,
                recommendations = EXCLUDED.recommendations,
                updated_at = NOW()
            "#,
        )
        .bind(record.household_key.get())
        .bind(profile)
        .bind(record.recommendations.as_slice())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get(&self, household_key: HouseholdKey) -> Result<Option<ResultRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT household_key, profile::TEXT AS profile, recommendations
            FROM recommendation_results
            WHERE household_key = $1
            "#,
        )
        .bind(household_key.get())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let profile_json: String = row.try_get("profile")?;
        let profile: RenderedProfile = serde_json::from_str(&profile_json)
            .map_err(|e| StoreError::Decode(format!("profile: {e}")))?;

        Ok(Some(ResultRecord {
            household_key: decode_key(row.try_get("household_key")?)?,
            profile,
            recommendations: row.try_get("recommendations")?,
        }))
    }
}

/// Request audit log in `user_requests`.
#[derive(Debug, Clone)]
pub struct PostgresRequestLog {
    pool: PgPool,
}

impl PostgresRequestLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn request_from_row(row: &PgRow) -> Result<RequestLogEntry, StoreError> {
    let kind: String = row.try_get("request_kind")?;
    let timestamp: DateTime<Utc> = row.try_get("requested_at")?;
    Ok(RequestLogEntry {
        id: RequestId::from_uuid(row.try_get("id")?),
        requester: row.try_get("requester")?,
        household_key: decode_key(row.try_get("household_key")?)?,
        request_kind: RequestKind::from_str(&kind).map_err(|e| StoreError::Decode(e.to_string()))?,
        timestamp,
    })
}

#[async_trait]
impl RequestLog for PostgresRequestLog {
    #[instrument(skip(self, entry), fields(requester = %entry.requester), err)]
    async fn append(&self, entry: &RequestLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_requests (id, requester, household_key, request_kind, requested_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(*entry.id.as_uuid())
        .bind(&entry.requester)
        .bind(entry.household_key.get())
        .bind(entry.request_kind.as_str())
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn recent(&self, requester: &str, limit: usize) -> Result<Vec<RequestLogEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, requester, household_key, request_kind, requested_at
            FROM user_requests
            WHERE requester = $1
            ORDER BY requested_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(requester)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(request_from_row).collect()
    }
}
