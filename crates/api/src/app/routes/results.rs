use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, rejection::PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::app::errors::{household_key_from_path, json_error, store_error_to_response};
use crate::app::services::AppServices;

/// GET /api/v1/results/{household_key}
///
/// 404 until a worker has stored the result; the poller relies on exactly that.
pub async fn get_result(
    Extension(services): Extension<Arc<AppServices>>,
    household_key: Result<Path<i64>, PathRejection>,
) -> Response {
    let household_key = match household_key_from_path(household_key) {
        Ok(k) => k,
        Err(resp) => return resp,
    };

    match services.results.get(household_key).await {
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no result for household {household_key} yet"),
        ),
        Err(e) => store_error_to_response(e),
    }
}
