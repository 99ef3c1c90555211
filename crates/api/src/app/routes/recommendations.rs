use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Extension, Path,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::info;

use hhrec_core::{HouseholdKey, ResultRecord};

use crate::app::dto::EnqueueRequest;
use crate::app::errors::{
    domain_error_to_response, enqueue_error_to_response, household_key_from_path, json_error,
    store_error_to_response,
};
use crate::app::services::AppServices;

/// POST /api/v1/recommendations:enqueue
///
/// Body `{"household_key": <int>}` (or `{"user_id": <int>}`). Answers `202` once the
/// job is on the work queue; the result shows up later under `/results/{key}`.
pub async fn enqueue(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<EnqueueRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return json_error(rejection.status(), "invalid_body", rejection.body_text()),
    };

    let household_key = match HouseholdKey::new(body.household_key) {
        Ok(k) => k,
        Err(e) => return domain_error_to_response(e),
    };

    match services.enqueuer.enqueue(household_key).await {
        Ok(receipt) => {
            info!(%household_key, "lookup job queued");
            (StatusCode::ACCEPTED, Json(receipt)).into_response()
        }
        Err(e) => enqueue_error_to_response(e),
    }
}

/// GET /api/v1/recommendations/{household_key}
///
/// Synchronous path: read the catalog and render on the spot, bypassing the queue.
pub async fn get_recommendations(
    Extension(services): Extension<Arc<AppServices>>,
    household_key: Result<Path<i64>, PathRejection>,
) -> Response {
    let household_key = match household_key_from_path(household_key) {
        Ok(k) => k,
        Err(resp) => return resp,
    };

    match services.catalog.get(household_key).await {
        Ok(Some(record)) => {
            let items = services.items.snapshot();
            (StatusCode::OK, Json(ResultRecord::render(&record, &items))).into_response()
        }
        Ok(None) => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("household {household_key} is not in the catalog"),
        ),
        Err(e) => store_error_to_response(e),
    }
}
