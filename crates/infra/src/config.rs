//! Process configuration, read from environment variables.
//!
//! Every binary in the workspace reads the same variables; unset optional values
//! fall back to the defaults below, unparsable values are a [`ConfigError`].

use std::path::PathBuf;
use std::time::Duration;

use hhrec_events::QueueTopology;

use crate::jobs::RetryPolicy;

pub const DEFAULT_CONSUMER_GROUP: &str = "model_workers";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_CONNECT_RETRIES: u32 = 10;
pub const DEFAULT_CONNECT_DELAY_MS: u64 = 5_000;
pub const DEFAULT_MAX_REDELIVERIES: u32 = 5;
pub const DEFAULT_CLAIM_IDLE_MS: u64 = 60_000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Broker endpoint and object names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// `None` selects the in-memory broker (dev mode).
    pub redis_url: Option<String>,
    pub topology: QueueTopology,
    pub consumer_group: String,
    pub consumer_name: String,
    /// Pending entries idle for longer than this are claimed from dead consumers.
    pub claim_idle: Duration,
}

/// Worker connection and redelivery policy.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub connect_retry: RetryPolicy,
    pub max_redeliveries: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// `None` selects the in-memory stores (dev mode).
    pub database_url: Option<String>,
    pub broker: BrokerSettings,
    pub worker: WorkerSettings,
    pub items_path: Option<PathBuf>,
    pub bind_addr: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let defaults = QueueTopology::default();
        let topology = QueueTopology {
            work_queue: var("HHREC_WORK_QUEUE").unwrap_or(defaults.work_queue),
            dead_letter_queue: var("HHREC_DEAD_LETTER_QUEUE").unwrap_or(defaults.dead_letter_queue),
            result_exchange: var("HHREC_RESULT_EXCHANGE").unwrap_or(defaults.result_exchange),
        };

        let broker = BrokerSettings {
            redis_url: var("REDIS_URL"),
            topology,
            consumer_group: var("HHREC_CONSUMER_GROUP")
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            consumer_name: var("HHREC_CONSUMER_NAME")
                .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::now_v7())),
            claim_idle: Duration::from_millis(parse_or(
                "HHREC_CLAIM_IDLE_MS",
                var("HHREC_CLAIM_IDLE_MS"),
                DEFAULT_CLAIM_IDLE_MS,
            )?),
        };

        let retries = parse_or(
            "HHREC_CONNECT_RETRIES",
            var("HHREC_CONNECT_RETRIES"),
            DEFAULT_CONNECT_RETRIES,
        )?;
        if retries == 0 {
            return Err(ConfigError::Invalid {
                name: "HHREC_CONNECT_RETRIES",
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }
        let delay_ms = parse_or(
            "HHREC_CONNECT_DELAY_MS",
            var("HHREC_CONNECT_DELAY_MS"),
            DEFAULT_CONNECT_DELAY_MS,
        )?;

        let worker = WorkerSettings {
            connect_retry: RetryPolicy::fixed(retries, Duration::from_millis(delay_ms)),
            max_redeliveries: parse_or(
                "HHREC_MAX_REDELIVERIES",
                var("HHREC_MAX_REDELIVERIES"),
                DEFAULT_MAX_REDELIVERIES,
            )?,
        };

        Ok(Self {
            database_url: var("DATABASE_URL"),
            broker,
            worker,
            items_path: var("HHREC_ITEMS_PATH").map(PathBuf::from),
            bind_addr: var("HHREC_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        })
    }

    /// True when neither a database nor a broker endpoint is configured.
    pub fn is_dev_mode(&self) -> bool {
        self.database_url.is_none() && self.broker.redis_url.is_none()
    }
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|e| ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            })
        }
    }
}
