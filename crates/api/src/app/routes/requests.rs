use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;

use hhrec_core::{HouseholdKey, RequestKind, RequestLogEntry};
use hhrec_infra::store::RECENT_REQUESTS_LIMIT;

use crate::app::dto::{LogRequestBody, RecentRequestsResponse};
use crate::app::errors::{domain_error_to_response, json_error, store_error_to_response};
use crate::app::services::AppServices;

/// POST /api/v1/requests
pub async fn log_request(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<LogRequestBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return json_error(rejection.status(), "invalid_body", rejection.body_text()),
    };

    let entry = HouseholdKey::new(body.household_key).and_then(|key| {
        RequestLogEntry::new(
            body.requester,
            key,
            body.request_kind.unwrap_or(RequestKind::Manual),
            Utc::now(),
        )
    });
    let entry = match entry {
        Ok(e) => e,
        Err(e) => return domain_error_to_response(e),
    };

    match services.requests.append(&entry).await {
        Ok(()) => (StatusCode::CREATED, Json(entry)).into_response(),
        Err(e) => store_error_to_response(e),
    }
}

/// GET /api/v1/requests/{requester}
///
/// The requester's last lookups, newest first. An unknown requester gets an empty list.
pub async fn recent_requests(
    Extension(services): Extension<Arc<AppServices>>,
    Path(requester): Path<String>,
) -> Response {
    match services.requests.recent(&requester, RECENT_REQUESTS_LIMIT).await {
        Ok(requests) => (StatusCode::OK, Json(RecentRequestsResponse { requests })).into_response(),
        Err(e) => store_error_to_response(e),
    }
}
