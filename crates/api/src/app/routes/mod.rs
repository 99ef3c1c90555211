use axum::{
    Router,
    routing::{get, post},
};

pub mod recommendations;
pub mod requests;
pub mod results;
pub mod stream;
pub mod system;

/// Router for everything under `/api/v1`.
pub fn router() -> Router {
    Router::new()
        .route("/recommendations:enqueue", post(recommendations::enqueue))
        .route("/recommendations/{household_key}", get(recommendations::get_recommendations))
        .route("/results/{household_key}", get(results::get_result))
        .route("/requests", post(requests::log_request))
        .route("/requests/{requester}", get(requests::recent_requests))
        .route("/stream/results", get(stream::stream_results))
        .route("/admin/items:reload", post(system::reload_items))
}
