//! HTTP surface for the mastering pipeline.
//!
//! Submission, progress polling, result fetch and static downloads; all of
//! the actual work happens in `mastro-core`.

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use mastro_core::{JobStatus, MasteringPipeline, PipelineError};

const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: MasteringPipeline,
}

pub fn build_router(pipeline: MasteringPipeline) -> Router {
    let downloads = ServeDir::new(pipeline.config().output_dir());
    Router::new()
        .route("/health", get(health))
        .route("/api/master", post(submit))
        .route("/api/master/:id/progress", get(progress))
        .route("/api/master/:id/result", get(result))
        .nest_service("/downloads", downloads)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { pipeline })
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn submit(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut audio: Option<(String, Vec<u8>)> = None;
    let mut preset: Option<String> = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let name = field.name().map(str::to_string);
                match name.as_deref() {
                    Some("audio") => {
                        let file_name = field
                            .file_name()
                            .unwrap_or("upload.wav")
                            .to_string();
                        match field.bytes().await {
                            Ok(bytes) => audio = Some((file_name, bytes.to_vec())),
                            Err(err) => {
                                return bad_request(&format!("unreadable audio part: {err}"))
                            }
                        }
                    }
                    Some("preset") => preset = field.text().await.ok(),
                    _ => {}
                }
            }
            Ok(None) => break,
            Err(err) => return bad_request(&format!("malformed multipart payload: {err}")),
        }
    }
    let Some((file_name, payload)) = audio else {
        return bad_request("missing audio file part");
    };

    match state
        .pipeline
        .submit(&file_name, &payload, preset.as_deref())
        .await
    {
        Ok(id) => Json(json!({ "jobId": id })).into_response(),
        Err(PipelineError::Validation(message)) => bad_request(&message),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn progress(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    // A malformed id is indistinguishable from one that expired.
    let Some(job) = Uuid::parse_str(&id)
        .ok()
        .and_then(|id| state.pipeline.registry().get(id))
    else {
        return not_found();
    };
    Json(json!({
        "status": job.status,
        "progressPercent": job.progress_percent,
        "stage": job.stage,
        "message": job.message,
    }))
    .into_response()
}

async fn result(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(job) = Uuid::parse_str(&id)
        .ok()
        .and_then(|id| state.pipeline.registry().get(id))
    else {
        return not_found();
    };
    match (job.status, job.result) {
        (JobStatus::Complete, Some(result)) => Json(result).into_response(),
        (JobStatus::Failed, _) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": job.message })),
        )
            .into_response(),
        _ => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "job still processing" })),
        )
            .into_response(),
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "job not found" })),
    )
        .into_response()
}
