use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub total_jobs: usize,
    pub waiting_jobs: usize,
    pub running_jobs: usize,
    pub finished_jobs: usize,
    pub version: String,
    /// `file` or `memory`.
    pub storage: String,
    pub data_dir: Option<String>,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Health check");

    let counts = state.coordinator.status_counts().await;
    let data_dir = state
        .config
        .data_dir
        .as_ref()
        .map(|p| p.display().to_string());

    let response = HealthResponse {
        status: "ok".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        total_jobs: counts.waiting + counts.running + counts.finished,
        waiting_jobs: counts.waiting,
        running_jobs: counts.running,
        finished_jobs: counts.finished,
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage: if data_dir.is_some() { "file" } else { "memory" }.to_string(),
        data_dir,
    };

    (StatusCode::OK, Json(response))
}
