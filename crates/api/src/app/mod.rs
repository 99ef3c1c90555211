//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, broker, result feed and the optional in-process worker
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs` and the tests).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api/v1", routes::router())
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::trace_requests))
                .layer(Extension(services)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use hhrec_core::ItemDirectory;

    use services::{InMemoryBackends, build_in_memory_services};

    async fn app() -> (Router, Arc<AppServices>) {
        let services = build_in_memory_services(InMemoryBackends::default(), ItemDirectory::default(), None, 5)
            .await
            .unwrap();
        let services = Arc::new(services);
        (build_app(services.clone()), services)
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (app, services) = app().await;
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        services.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (app, services) = app().await;
        let resp = app
            .oneshot(Request::builder().uri("/api/v1/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        services.shutdown().await;
    }

    #[tokio::test]
    async fn enqueue_rejects_non_positive_key() {
        let (app, services) = app().await;
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/recommendations:enqueue")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"household_key": 0}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        services.shutdown().await;
    }

    #[tokio::test]
    async fn reload_without_items_path_is_a_conflict() {
        let (app, services) = app().await;
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/admin/items:reload")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        services.shutdown().await;
    }
}
