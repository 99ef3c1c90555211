//! Strongly-typed identifiers used across the pipeline.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Household identifier: the lookup key of the catalog and result stores.
///
/// Always strictly positive. Construct through [`HouseholdKey::new`] or the
/// `TryFrom`/`FromStr` impls; deserialization runs the same check.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct HouseholdKey(i64);

impl HouseholdKey {
    pub fn new(value: i64) -> Result<Self, DomainError> {
        if value <= 0 {
            return Err(DomainError::validation(format!(
                "household_key must be a positive integer, got {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for HouseholdKey {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<HouseholdKey> for i64 {
    fn from(value: HouseholdKey) -> Self {
        value.0
    }
}

impl FromStr for HouseholdKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<i64>()
            .map_err(|e| DomainError::invalid_id(format!("HouseholdKey: {e}")))?;
        Self::new(value)
    }
}

impl core::fmt::Display for HouseholdKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Identifier of a request log entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Uses UUIDv7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RequestId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for RequestId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::from_str(s).map_err(|e| DomainError::invalid_id(format!("RequestId: {e}")))?;
        Ok(Self(uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_and_negative_keys_are_rejected() {
        assert!(HouseholdKey::new(0).is_err());
        assert!(HouseholdKey::new(-7).is_err());
        assert_eq!(HouseholdKey::new(42).unwrap().get(), 42);
    }

    #[test]
    fn parses_from_trimmed_text() {
        let key: HouseholdKey = " 2500 ".parse().unwrap();
        assert_eq!(key.get(), 2500);
        assert!("abc".parse::<HouseholdKey>().is_err());
        assert!("-1".parse::<HouseholdKey>().is_err());
    }

    #[test]
    fn deserialization_validates() {
        let ok: HouseholdKey = serde_json::from_str("42").unwrap();
        assert_eq!(ok.get(), 42);
        assert!(serde_json::from_str::<HouseholdKey>("0").is_err());
        assert!(serde_json::from_str::<HouseholdKey>("\"42\"").is_err());
    }

    proptest! {
        #[test]
        fn every_positive_value_is_a_key(v in 1i64..i64::MAX) {
            prop_assert_eq!(HouseholdKey::new(v).unwrap().get(), v);
        }

        #[test]
        fn no_non_positive_value_is_a_key(v in i64::MIN..=0i64) {
            prop_assert!(HouseholdKey::new(v).is_err());
        }
    }
}
