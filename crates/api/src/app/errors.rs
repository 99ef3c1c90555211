use axum::extract::Path;
use axum::extract::rejection::PathRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use hhrec_core::{DomainError, HouseholdKey};
use hhrec_infra::items::ItemsError;
use hhrec_infra::{EnqueueError, StoreError};

pub fn enqueue_error_to_response(err: EnqueueError) -> Response {
    match err {
        EnqueueError::BrokerUnavailable(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "broker_unavailable", msg)
        }
        EnqueueError::Publish(e) => json_error(StatusCode::BAD_GATEWAY, "publish_error", e.to_string()),
    }
}

pub fn store_error_to_response(err: StoreError) -> Response {
    match err {
        StoreError::Unavailable(msg) => json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg),
        other => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", other.to_string()),
    }
}

pub fn domain_error_to_response(err: DomainError) -> Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string())
}

pub fn items_error_to_response(err: ItemsError) -> Response {
    match err {
        ItemsError::Io { .. } => json_error(StatusCode::INTERNAL_SERVER_ERROR, "items_unreadable", err.to_string()),
        ItemsError::Parse { .. } => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "items_invalid", err.to_string())
        }
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Validate a `{household_key}` path segment: non-numeric text and non-positive
/// numbers are both a 400 with the JSON error body.
pub fn household_key_from_path(path: Result<Path<i64>, PathRejection>) -> Result<HouseholdKey, Response> {
    let Path(raw) = path.map_err(|rejection| {
        json_error(StatusCode::BAD_REQUEST, "invalid_household_key", rejection.body_text())
    })?;
    HouseholdKey::new(raw).map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_household_key", e.to_string()))
}
