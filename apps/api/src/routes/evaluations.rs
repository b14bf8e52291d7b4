//! Evaluation endpoints: submit a resume for grading, fetch a stored
//! grading, and cancel an in-flight run.

use axum::extract::{Multipart, Path, State};
use axum::http::HeaderMap;
use axum::Json;
use bytes::Bytes;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::auth::verify_bearer;
use crate::errors::AppError;
use crate::models::evaluation::EvaluationOutcome;
use crate::pipeline::orchestrator::EvaluationRequest;
use crate::state::AppState;

/// POST /api/v1/evaluations
///
/// Multipart form: `file` (the resume), `job_description`, `job_title`.
/// Runs the full pipeline and returns the structured outcome; progress is
/// streamed in parallel on the caller's event channel. The response always
/// has `success` set — a failed evaluation is a 200 with `success: false`
/// and a human-readable `error`, mirroring the terminal status event.
pub async fn handle_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<EvaluationOutcome>, AppError> {
    let user_id = verify_bearer(&headers, &state.config.channel_secret)?;

    let mut file_bytes: Option<Bytes> = None;
    let mut file_name = String::new();
    let mut job_description = String::new();
    let mut job_title = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or("") {
            "file" => {
                file_name = field.file_name().unwrap_or("resume").to_string();
                file_bytes = Some(field.bytes().await.map_err(|e| {
                    AppError::Validation(format!("Failed to read uploaded file: {e}"))
                })?);
            }
            "job_description" => {
                job_description = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Invalid job_description: {e}")))?;
            }
            "job_title" => {
                job_title = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Invalid job_title: {e}")))?;
            }
            // Unknown fields are drained and ignored.
            _ => {
                let _ = field.bytes().await;
            }
        }
    }

    let file_bytes = file_bytes
        .ok_or_else(|| AppError::Validation("Missing 'file' field in form data".to_string()))?;

    let outcome = state
        .orchestrator
        .run(EvaluationRequest {
            file_bytes,
            file_name,
            user_id,
            job_description,
            job_title,
        })
        .await;

    Ok(Json(outcome))
}

/// GET /api/v1/evaluations/:id
///
/// Authoritative lookup of a persisted grading, for clients that missed the
/// terminal event. Only the owning user may read it.
pub async fn handle_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(evaluation_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let user_id = verify_bearer(&headers, &state.config.channel_secret)?;

    let row = state
        .gateway
        .load_grading(evaluation_id)
        .await
        .map_err(|e| AppError::Storage(e.to_string()))?
        .ok_or_else(|| AppError::NotFound("Evaluation not found".to_string()))?;

    if row.user_id != user_id {
        return Err(AppError::Forbidden);
    }

    let file = state
        .gateway
        .load_file(evaluation_id)
        .await
        .map_err(|e| AppError::Storage(e.to_string()))?;

    Ok(Json(json!({
        "evaluation_id": row.evaluation_id,
        "grading_id": row.id,
        "file": file.map(|f| json!({
            "file_id": f.id,
            "url": f.url,
            "original_filename": f.original_filename,
            "size_bytes": f.size_bytes,
        })),
        "job_title": row.job_title,
        "scores": {
            "overall": row.overall_score,
            "ats": row.ats_score,
            "keyword": row.keyword_score,
            "format": row.format_score,
        },
        "suggestions": row.suggestions,
        "resume_data": row.resume_json,
        "review": row.review,
        "created_at": row.created_at,
    })))
}

/// POST /api/v1/evaluations/:id/cancel
///
/// Requests cancellation of an in-flight evaluation. The pipeline honors it
/// at the next stage boundary; the channel then sees a `cancelled` event.
pub async fn handle_cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(evaluation_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let user_id = verify_bearer(&headers, &state.config.channel_secret)?;

    if !state.broadcaster.request_cancel(evaluation_id, user_id).await {
        return Err(AppError::NotFound(
            "Evaluation not found or already finished".to_string(),
        ));
    }

    info!(%evaluation_id, "Cancellation requested");
    Ok(Json(json!({ "evaluation_id": evaluation_id, "cancelled": true })))
}
