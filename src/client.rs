// Typed HTTP client of the coordination API.

use std::time::Duration;

use reqwest::header::{HeaderMap, LOCATION};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::errors::FieldError;
use crate::models::{JobId, JobInfo, JobSummary, ProgressEvent, ProgressState, UploadJobRequest};

/// Environment variable the CLI reads when `--coordinator-url` is not given.
pub const COORDINATOR_URL_ENV: &str = "MR_COORDINATOR_URL";

const REQUEST_ID_HEADER: &str = "x-request-id";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Attempts for idempotent reads answered with 503.
const READ_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Coordinator URL is not set; pass --coordinator-url or set MR_COORDINATOR_URL")]
    MissingBaseUrl,

    #[error("Invalid coordinator URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Could not connect to coordinator at {0}. Is it running? (try: mrc serve)")]
    Unreachable(String),

    #[error("{message}{}", request_suffix(.request_id))]
    Api {
        status: StatusCode,
        code: String,
        message: String,
        fields: Vec<FieldError>,
        request_id: Option<String>,
    },

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response from coordinator: {0}")]
    Protocol(String),
}

fn request_suffix(request_id: &Option<String>) -> String {
    match request_id {
        Some(id) => format!(" (request id {})", id),
        None => String::new(),
    }
}

impl ClientError {
    /// HTTP status of an API error.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    fields: Vec<FieldError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedJob {
    job_id: JobId,
}

#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    base_url: String,
    http: Client,
}

impl CoordinatorClient {
    /// Build a client for `base_url`. A missing or blank URL is rejected
    /// before any network call.
    pub fn new(base_url: Option<&str>) -> Result<Self, ClientError> {
        let raw = base_url
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ClientError::MissingBaseUrl)?;
        let trimmed = raw.trim_end_matches('/');

        let parsed = reqwest::Url::parse(trimmed).map_err(|e| ClientError::InvalidBaseUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ClientError::InvalidBaseUrl {
                url: raw.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        let http = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;

        Ok(Self {
            base_url: trimmed.to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(path))
            .timeout(REQUEST_TIMEOUT)
    }

    fn send_error(&self, err: reqwest::Error) -> ClientError {
        if err.is_connect() || err.is_timeout() {
            ClientError::Unreachable(self.base_url.clone())
        } else {
            ClientError::Http(err)
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ClientError> {
        let response = builder.send().await.map_err(|e| self.send_error(e))?;
        check(response).await
    }

    /// GET with a bounded retry when the coordinator reports 503.
    async fn get(&self, path: &str) -> Result<Response, ClientError> {
        let mut attempt = 1;
        loop {
            match self.send(self.request(Method::GET, path)).await {
                Err(ClientError::Api { status, .. })
                    if status == StatusCode::SERVICE_UNAVAILABLE && attempt < READ_ATTEMPTS =>
                {
                    let delay = Duration::from_millis(200 * u64::from(attempt));
                    tracing::debug!("GET {} unavailable, retrying in {:?}", path, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        Ok(self.get(path).await?.json().await?)
    }

    /// `GET /jobs`
    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>, ClientError> {
        self.get_json("/jobs").await
    }

    /// `PUT /job`; the id comes from the `Location` header.
    pub async fn upload_job(&self, request: &UploadJobRequest) -> Result<JobId, ClientError> {
        let response = self
            .send(self.request(Method::PUT, "/job").json(request))
            .await?;
        let from_header = location_id(response.headers());
        let body = response.text().await?;
        from_header
            .or_else(|| accepted_id(&body))
            .ok_or_else(|| ClientError::Protocol(format!("no job id in '{}'", body)))
    }

    /// `POST /jobs`
    pub async fn submit_job(&self, request: &UploadJobRequest) -> Result<JobId, ClientError> {
        let created: CreatedJob = self
            .send(self.request(Method::POST, "/jobs").json(request))
            .await?
            .json()
            .await?;
        Ok(created.job_id)
    }

    /// `GET /jobs/{id}`
    pub async fn job_info(&self, id: JobId) -> Result<JobInfo, ClientError> {
        self.get_json(&format!("/jobs/{}", id)).await
    }

    /// `GET /jobs/{id}/progress`
    pub async fn job_progress(&self, id: JobId) -> Result<ProgressState, ClientError> {
        self.get_json(&format!("/jobs/{}/progress", id)).await
    }

    /// `DELETE /jobs/{id}`; returns the confirmation text.
    pub async fn delete_job(&self, id: JobId) -> Result<String, ClientError> {
        let response = self
            .send(self.request(Method::DELETE, &format!("/jobs/{}", id)))
            .await?;
        Ok(response.text().await?)
    }

    /// `POST /jobs/{id}/cancel`
    pub async fn cancel_job(&self, id: JobId) -> Result<String, ClientError> {
        let response = self
            .send(self.request(Method::POST, &format!("/jobs/{}/cancel", id)))
            .await?;
        Ok(response.text().await?)
    }

    /// `POST /internal/jobs/{id}/progress`
    pub async fn report_progress(
        &self,
        id: JobId,
        event: &ProgressEvent,
    ) -> Result<ProgressState, ClientError> {
        Ok(self
            .send(
                self.request(Method::POST, &format!("/internal/jobs/{}/progress", id))
                    .json(event),
            )
            .await?
            .json()
            .await?)
    }

    /// `GET /health`
    pub async fn health(&self) -> Result<serde_json::Value, ClientError> {
        self.get_json("/health").await
    }

    /// Open `GET /events`. No request timeout: the stream stays open.
    pub async fn events(&self, job_id: Option<JobId>) -> Result<Response, ClientError> {
        let mut builder = self.http.get(self.url("/events"));
        if let Some(id) = job_id {
            builder = builder.query(&[("job_id", id.0)]);
        }
        self.send(builder).await
    }
}

/// Turn a non-2xx response into `ClientError::Api`.
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let request_id = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let text = response.text().await.unwrap_or_default();

    let (code, message, fields) = match serde_json::from_str::<ApiErrorBody>(&text) {
        Ok(body) => (body.error, body.message, body.fields),
        Err(_) if text.trim().is_empty() => (
            String::new(),
            status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string(),
            Vec::new(),
        ),
        Err(_) => (String::new(), text.trim().to_string(), Vec::new()),
    };

    Err(ClientError::Api {
        status,
        code,
        message,
        fields,
        request_id,
    })
}

fn location_id(headers: &HeaderMap) -> Option<JobId> {
    headers
        .get(LOCATION)?
        .to_str()
        .ok()?
        .rsplit('/')
        .next()?
        .parse()
        .ok()
}

/// Parse `Job <id> accepted`.
fn accepted_id(body: &str) -> Option<JobId> {
    body.split_whitespace().nth(1)?.parse().ok()
}
