//! Wire messages carried by the broker.
//!
//! - [`JobMessage`] travels on the durable work queue: `{"user_id": <int>}`.
//! - [`ResultMessage`] is broadcast on the fan-out result channel:
//!   `{"user_id", "profile", "recommendations"}`.

use serde::{Deserialize, Serialize};

use hhrec_core::{HouseholdKey, RenderedProfile, ResultRecord};

use crate::error::BrokerError;

/// A lookup job. No identity beyond its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    #[serde(rename = "user_id")]
    pub household_key: HouseholdKey,
}

impl JobMessage {
    pub fn new(household_key: HouseholdKey) -> Self {
        Self { household_key }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BrokerError> {
        serde_json::to_vec(self).map_err(|e| BrokerError::Serialization(e.to_string()))
    }

    /// Parse a delivery body. Fails for non-JSON bodies, a missing `user_id`, and
    /// non-positive keys alike: none of them can ever be processed.
    pub fn from_bytes(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

/// Best-effort notification that a result is available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub user_id: HouseholdKey,
    pub profile: RenderedProfile,
    pub recommendations: Vec<String>,
}

impl From<&ResultRecord> for ResultMessage {
    fn from(record: &ResultRecord) -> Self {
        Self {
            user_id: record.household_key,
            profile: record.profile.clone(),
            recommendations: record.recommendations.clone(),
        }
    }
}

impl From<ResultMessage> for ResultRecord {
    fn from(msg: ResultMessage) -> Self {
        Self {
            household_key: msg.user_id,
            profile: msg.profile,
            recommendations: msg.recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_wire_format_uses_user_id() {
        let job = JobMessage::new(HouseholdKey::new(42).unwrap());
        assert_eq!(job.to_bytes().unwrap(), br#"{"user_id":42}"#);
    }

    #[test]
    fn unprocessable_bodies_fail_to_parse() {
        assert!(JobMessage::from_bytes(b"not json").is_err());
        assert!(JobMessage::from_bytes(br#"{"household":1}"#).is_err());
        assert!(JobMessage::from_bytes(br#"{"user_id":0}"#).is_err());
        assert!(JobMessage::from_bytes(br#"{"user_id":"7"}"#).is_err());
        assert_eq!(
            JobMessage::from_bytes(br#"{"user_id":7}"#).unwrap().household_key.get(),
            7
        );
    }

    #[test]
    fn result_message_mirrors_record() {
        let record = ResultRecord {
            household_key: HouseholdKey::new(3).unwrap(),
            profile: RenderedProfile::new(vec![("Age".into(), "19-24".into())]),
            recommendations: vec!["❓ 1 (Unknown)".into()],
        };
        let msg = ResultMessage::from(&record);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["user_id"], 3);
        assert_eq!(json["profile"]["Age"], "19-24");
        assert_eq!(ResultRecord::from(msg), record);
    }
}
