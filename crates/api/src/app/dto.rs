//! Request/response bodies that are not domain types themselves.

use serde::{Deserialize, Serialize};

use hhrec_core::{RequestKind, RequestLogEntry};

/// `POST /recommendations:enqueue`. The key is taken as a plain integer so that a
/// non-positive key is a validation error (400) rather than a body rejection (422).
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    #[serde(alias = "user_id")]
    pub household_key: i64,
}

#[derive(Debug, Deserialize)]
pub struct LogRequestBody {
    pub requester: String,
    pub household_key: i64,
    /// Defaults to `manual`.
    #[serde(default)]
    pub request_kind: Option<RequestKind>,
}

#[derive(Debug, Serialize)]
pub struct RecentRequestsResponse {
    pub requests: Vec<RequestLogEntry>,
}

#[derive(Debug, Serialize)]
pub struct ReloadItemsResponse {
    pub items: usize,
}
