pub mod health;
pub mod routes;
pub mod sse;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::daemon::coordinator::JobCoordinator;
use crate::models::CoordinatorConfig;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared application state for the Axum server.
pub struct AppState {
    pub coordinator: Arc<JobCoordinator>,
    pub config: Arc<CoordinatorConfig>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(coordinator: Arc<JobCoordinator>, config: Arc<CoordinatorConfig>) -> Self {
        Self {
            coordinator,
            config,
            start_time: Instant::now(),
        }
    }
}

/// Tag every request with an id, echo it back, and run the handler inside a
/// span carrying it. A caller-supplied `x-request-id` is kept.
async fn request_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::now_v7().to_string());

    let span = tracing::info_span!(
        "request",
        request_id = %id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    if let Ok(value) = HeaderValue::from_str(&id) {
        request.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Create the Axum router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let timeout = state.config.request_timeout();

    Router::new()
        .route("/health", get(health::health_check))
        .route("/jobs", get(routes::list_jobs).post(routes::create_job))
        .route("/job", put(routes::upload_job))
        .route("/jobs/{id}", get(routes::get_job).delete(routes::delete_job))
        .route("/jobs/{id}/progress", get(routes::get_progress))
        .route("/jobs/{id}/cancel", post(routes::cancel_job))
        .route(
            "/internal/jobs/{id}/progress",
            post(routes::report_progress),
        )
        .route("/events", get(sse::sse_handler))
        .fallback(routes::not_found)
        .with_state(state)
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(middleware::from_fn(request_id))
}
