use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::{IntoResponse, Response}};

use hhrec_infra::items::reload_directory;

use crate::app::dto::ReloadItemsResponse;
use crate::app::errors::{items_error_to_response, json_error};
use crate::app::services::AppServices;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// POST /api/v1/admin/items:reload
///
/// Re-read the item directory file and swap it in. Renders already in flight keep
/// the snapshot they started with.
pub async fn reload_items(Extension(services): Extension<Arc<AppServices>>) -> Response {
    let Some(path) = services.items_path.as_deref() else {
        return json_error(
            StatusCode::CONFLICT,
            "not_configured",
            "no item directory file configured (HHREC_ITEMS_PATH)",
        );
    };

    match reload_directory(&services.items, path).await {
        Ok(items) => (StatusCode::OK, Json(ReloadItemsResponse { items })).into_response(),
        Err(e) => items_error_to_response(e),
    }
}
