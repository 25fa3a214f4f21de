use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::AppState;
use crate::errors::{CoordinatorError, FieldError};
use crate::models::{JobId, ProgressEvent, UploadJobRequest};

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

fn error_response(status: StatusCode, error: &str, message: String) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message,
            fields: Vec::new(),
        }),
    )
        .into_response()
}

/// Map a coordinator error onto its status code. Transient and fatal details
/// stay in the log; the caller gets an opaque message and the request id.
fn coordinator_error(err: CoordinatorError) -> Response {
    match err {
        CoordinatorError::Validation(fields) => {
            tracing::debug!("Rejected request: {}", fields);
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "validation_error".to_string(),
                    message: fields.to_string(),
                    fields: fields.0,
                }),
            )
                .into_response()
        }
        CoordinatorError::NotFound(msg) => {
            tracing::debug!("{}", msg);
            error_response(StatusCode::NOT_FOUND, "not_found", msg)
        }
        CoordinatorError::Conflict(msg) => {
            tracing::info!("Conflict: {}", msg);
            error_response(StatusCode::CONFLICT, "conflict", msg)
        }
        CoordinatorError::Transient(msg) => {
            tracing::warn!("Transient failure: {}", msg);
            let mut response = error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                "Storage is temporarily unavailable; retry shortly".to_string(),
            );
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from_static("1"));
            response
        }
        CoordinatorError::Fatal(msg) => {
            tracing::error!("Internal error: {}", msg);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal error; quote the x-request-id header when reporting it".to_string(),
            )
        }
    }
}

fn parse_id(raw: &str) -> Result<JobId, Response> {
    raw.parse::<JobId>().map_err(coordinator_error)
}

fn body_error(rejection: JsonRejection) -> Response {
    coordinator_error(CoordinatorError::invalid("body", rejection.body_text()))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.coordinator.list().await {
        Ok(jobs) => (StatusCode::OK, Json(jobs)).into_response(),
        Err(e) => coordinator_error(e),
    }
}

/// PUT /job
pub async fn upload_job(
    State(state): State<Arc<AppState>>,
    body: Result<Json<UploadJobRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return body_error(rejection),
    };

    match state.coordinator.submit(request).await {
        Ok(record) => (
            StatusCode::CREATED,
            [(header::LOCATION, format!("/jobs/{}", record.id))],
            format!("Job {} accepted", record.id),
        )
            .into_response(),
        Err(e) => coordinator_error(e),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedJob {
    pub job_id: JobId,
}

/// POST /jobs: same as `PUT /job`, answered with JSON.
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    body: Result<Json<UploadJobRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return body_error(rejection),
    };

    match state.coordinator.submit(request).await {
        Ok(record) => (
            StatusCode::CREATED,
            [(header::LOCATION, format!("/jobs/{}", record.id))],
            Json(CreatedJob { job_id: record.id }),
        )
            .into_response(),
        Err(e) => coordinator_error(e),
    }
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.coordinator.info(id).await {
        Ok(info) => (StatusCode::OK, Json(info)).into_response(),
        Err(e) => coordinator_error(e),
    }
}

/// GET /jobs/{id}/progress
pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.coordinator.progress(id).await {
        Ok(progress) => (StatusCode::OK, Json(progress)).into_response(),
        Err(e) => coordinator_error(e),
    }
}

/// DELETE /jobs/{id}
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.coordinator.remove(id).await {
        Ok(()) => (StatusCode::OK, format!("Job {} deleted", id)).into_response(),
        Err(e) => coordinator_error(e),
    }
}

/// POST /jobs/{id}/cancel
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.coordinator.cancel(id).await {
        Ok(_) => (StatusCode::ACCEPTED, format!("Job {} cancelled", id)).into_response(),
        Err(e) => coordinator_error(e),
    }
}

/// POST /internal/jobs/{id}/progress: worker reports.
pub async fn report_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<ProgressEvent>, JsonRejection>,
) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let Json(event) = match body {
        Ok(body) => body,
        Err(rejection) => return body_error(rejection),
    };

    match state.coordinator.report(id, event).await {
        Ok(progress) => (StatusCode::OK, Json(progress)).into_response(),
        Err(e) => coordinator_error(e),
    }
}

pub async fn not_found() -> impl IntoResponse {
    error_response(
        StatusCode::NOT_FOUND,
        "not_found",
        "No such route".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_transient_maps_to_503_with_retry_after() {
        let response =
            coordinator_error(CoordinatorError::Transient("disk full at /var".to_string()));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
        let json = response_json(response).await;
        assert_eq!(json["error"], "unavailable");
        assert!(!json["message"].as_str().unwrap().contains("/var"));
    }

    #[tokio::test]
    async fn test_fatal_message_is_opaque() {
        let response = coordinator_error(CoordinatorError::Fatal(
            "progress file /data/progress/3.json corrupted".to_string(),
        ));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = response_json(response).await;
        assert_eq!(json["error"], "internal_error");
        assert!(!json["message"].as_str().unwrap().contains("/data"));
        assert!(json.get("fields").is_none());
    }

    #[tokio::test]
    async fn test_validation_lists_every_field() {
        let mut errors = crate::errors::FieldErrors::default();
        errors.push("name", "is required");
        errors.push("mappersCount", "must be at least 1 (got 0)");
        let response = coordinator_error(CoordinatorError::Validation(errors));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_json(response).await;
        assert_eq!(json["fields"].as_array().unwrap().len(), 2);
        assert_eq!(json["fields"][1]["field"], "mappersCount");
    }

    #[test]
    fn test_parse_id_rejects_negative() {
        let response = parse_id("-4").unwrap_err();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
