use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use conveyor_core::DispatchService;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::handlers;

#[derive(Clone)]
pub struct AppState {
    pub service: DispatchService,
    /// Bound for reading an enqueue body.
    pub read_timeout: Duration,
}

impl AppState {
    pub fn new(service: DispatchService, read_timeout: Duration) -> Self {
        Self {
            service,
            read_timeout,
        }
    }
}

/// `POST /enqueue` and `GET /healthz`, with tracing, permissive CORS and a
/// whole-request timeout.
pub fn build_router(state: AppState, write_timeout: Duration) -> Router {
    Router::new()
        .route("/enqueue", post(handlers::enqueue))
        .route("/healthz", get(handlers::healthz))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(write_timeout)),
        )
        .with_state(state)
}
