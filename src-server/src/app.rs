//! Router assembly.

use crate::handlers;
use crate::state::AppState;
use axum::http::{header, HeaderName, Method};
use axum::routing::{get, post};
use axum::Router;
use cloakscope_auth::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use tower_http::cors::{Any, CorsLayer};

/// Cross-origin policy applied to every response, errors included.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
            HeaderName::from_static(SIGNATURE_HEADER),
            HeaderName::from_static(TIMESTAMP_HEADER),
        ])
}

/// Build the service router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/divergence-test", post(handlers::divergence_test))
        .route("/v1/worker/run", post(handlers::worker_run))
        .with_state(state)
        .layer(cors_layer())
}
