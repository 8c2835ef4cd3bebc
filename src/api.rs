use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::info;

use crate::{
    error::JobError,
    jobs::validate_request,
    models::{ApiErrorPayload, CreateJobRequest},
    AppState,
};

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(20);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/jobs", get(list_jobs).post(create_job))
        .route("/api/jobs/{job_id}", get(get_job).delete(cancel_job))
        .route("/api/jobs/{job_id}/stream", get(stream_job))
        .with_state(state)
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "mock": state.jobs.is_mock(),
        "navidromeMusicPath": state.config.music_path,
        "timestamp": Utc::now(),
    }))
}

pub async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.jobs.list().await)
}

pub async fn create_job(
    State(state): State<AppState>,
    Json(payload): Json<CreateJobRequest>,
) -> Response {
    if let Err(err) = validate_request(&payload.artist, &payload.url) {
        return job_error_response(err);
    }
    if state.config.music_path.is_none() && !state.jobs.is_mock() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "MUSIC_PATH_REQUIRED",
            "NAVIDROME_MUSIC_PATH environment variable is required",
        );
    }

    match state
        .jobs
        .create(
            &payload.artist,
            &payload.url,
            payload.dry_run,
            payload.keep_temp,
        )
        .await
    {
        Ok(snapshot) => (StatusCode::ACCEPTED, Json(snapshot)).into_response(),
        Err(err) => job_error_response(err),
    }
}

pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match state.jobs.get(&job_id).await {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => job_error_response(JobError::NotFound),
    }
}

pub async fn cancel_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match state.jobs.cancel(&job_id).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(err) => job_error_response(err),
    }
}

/// Current snapshot first, then one event per change until the job is done
/// or the client goes away.
pub async fn stream_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    let Some(subscription) = state.jobs.subscribe(&job_id).await else {
        return job_error_response(JobError::NotFound);
    };
    info!(job_id = %job_id, "Job stream opened");

    let stream = subscription
        .into_stream()
        .map(|snapshot| Event::default().json_data(snapshot));

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE).text("keep-alive"))
        .into_response()
}

fn job_error_response(err: JobError) -> Response {
    let status = match &err {
        JobError::Validation(_) => StatusCode::BAD_REQUEST,
        JobError::ImportInProgress | JobError::JobFinished(_) => StatusCode::CONFLICT,
        JobError::NotFound => StatusCode::NOT_FOUND,
    };
    error_response(status, err.code(), &err.to_string())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let payload = ApiErrorPayload {
        code: code.to_string(),
        message: message.to_string(),
    };
    (status, Json(json!({ "error": payload }))).into_response()
}
