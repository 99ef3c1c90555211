//! Append-only audit log of completed lookups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::{HouseholdKey, RequestId};

/// How the requester picked the household.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Manual,
    Random,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Manual => "manual",
            RequestKind::Random => "random",
        }
    }
}

impl core::str::FromStr for RequestKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(RequestKind::Manual),
            "random" => Ok(RequestKind::Random),
            other => Err(DomainError::validation(format!(
                "request_kind must be one of: manual, random (got {other})"
            ))),
        }
    }
}

/// One audit record. Created once per completed lookup, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    pub id: RequestId,
    pub requester: String,
    pub household_key: HouseholdKey,
    pub request_kind: RequestKind,
    pub timestamp: DateTime<Utc>,
}

impl RequestLogEntry {
    pub fn new(
        requester: impl Into<String>,
        household_key: HouseholdKey,
        request_kind: RequestKind,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let requester = requester.into();
        if requester.trim().is_empty() {
            return Err(DomainError::validation("requester must not be empty"));
        }
        Ok(Self {
            id: RequestId::new(),
            requester,
            household_key,
            request_kind,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_kind_round_trips_as_snake_case() {
        assert_eq!(serde_json::to_string(&RequestKind::Random).unwrap(), "\"random\"");
        assert_eq!("manual".parse::<RequestKind>().unwrap(), RequestKind::Manual);
        assert!("auto".parse::<RequestKind>().is_err());
    }

    #[test]
    fn blank_requester_is_rejected() {
        let key = HouseholdKey::new(1).unwrap();
        assert!(RequestLogEntry::new("  ", key, RequestKind::Manual, Utc::now()).is_err());
        assert!(RequestLogEntry::new("alice", key, RequestKind::Manual, Utc::now()).is_ok());
    }
}
