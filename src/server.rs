//! JSON API over the enrichment service

use crate::client::ApiKey;
use crate::error::Error;
use crate::history::HistoryEntry;
use crate::jobs::{JobId, JobPoll, JobSnapshot, LogLine};
use crate::service::EnrichmentService;
use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// HTTP front for an [`EnrichmentService`].
pub struct ApiServer {
    service: Arc<EnrichmentService>,
    bind: String,
}

impl ApiServer {
    pub fn new(service: Arc<EnrichmentService>, bind: impl Into<String>) -> Self {
        Self {
            service,
            bind: bind.into(),
        }
    }

    /// Bind and serve until the process is stopped.
    pub async fn start(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.bind).await?;
        info!("Starting enrichment API server on {}", listener.local_addr()?);
        axum::serve(listener, router(self.service)).await?;
        Ok(())
    }
}

pub fn router(service: Arc<EnrichmentService>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/jobs", get(list_jobs).post(submit_job))
        .route("/api/jobs/{id}", get(job_status))
        .route("/api/jobs/{id}/logs", get(job_logs))
        .route("/api/jobs/{id}/cancel", post(cancel_job))
        .route("/api/history", get(list_history))
        .route("/api/download/{file}", get(download))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    input_path: PathBuf,
    original_filename: Option<String>,
    api_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogsResponse {
    pub logs: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorBody { error: self.1 })).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::JobNotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidFileName(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, err.to_string())
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy"}))
}

async fn submit_job(
    State(service): State<Arc<EnrichmentService>>,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    if request.api_key.trim().is_empty() {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            "API key is required".to_string(),
        ));
    }
    if !request.input_path.is_file() {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            format!("Input file not found: {}", request.input_path.display()),
        ));
    }

    let original_name = request.original_filename.unwrap_or_else(|| {
        request
            .input_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    let job_id = service
        .submit(request.input_path, original_name, ApiKey::new(request.api_key))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id })))
}

async fn list_jobs(State(service): State<Arc<EnrichmentService>>) -> Json<Vec<JobSnapshot>> {
    Json(service.jobs().await)
}

async fn job_status(
    State(service): State<Arc<EnrichmentService>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobPoll>> {
    let id = JobId::parse(&id)?;
    match service.poll(id).await {
        JobPoll::NotFound => Err(Error::JobNotFound(id.to_string()).into()),
        poll => Ok(Json(poll)),
    }
}

async fn job_logs(
    State(service): State<Arc<EnrichmentService>>,
    Path(id): Path<String>,
) -> ApiResult<Json<LogsResponse>> {
    let id = JobId::parse(&id)?;
    let logs = service
        .logs(id)
        .await
        .ok_or_else(|| Error::JobNotFound(id.to_string()))?;
    Ok(Json(LogsResponse {
        logs: logs.iter().map(LogLine::to_string).collect(),
    }))
}

async fn cancel_job(
    State(service): State<Arc<EnrichmentService>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let id = JobId::parse(&id)?;
    Ok(Json(CancelResponse {
        cancelled: service.cancel(id).await,
    }))
}

async fn list_history(
    State(service): State<Arc<EnrichmentService>>,
) -> ApiResult<Json<Vec<HistoryEntry>>> {
    Ok(Json(service.history().await?))
}

async fn download(
    State(service): State<Arc<EnrichmentService>>,
    Path(file): Path<String>,
) -> ApiResult<Response> {
    let path = service.output_path(&file)?;
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok((
            [
                (header::CONTENT_TYPE, "text/csv".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", file),
                ),
            ],
            bytes,
        )
            .into_response()),
        Err(e) => {
            warn!("Download of {} failed: {}", file, e);
            Err(ApiError(StatusCode::NOT_FOUND, "File not found".to_string()))
        }
    }
}
