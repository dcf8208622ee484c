//! Submission API
//!
//! A submission is mounted by `POST /api/submissions/:id` and unmounted by
//! `DELETE`. Progress is also streamed on `/events`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::draft::SessionId;
use crate::error::{ApiError, ApiResult};
use crate::submission::SubmissionStatus;
use crate::AppState;

/// POST /api/submissions/:id
///
/// Mounts and starts the submission. Repeated calls return the current
/// status without starting a second pipeline.
pub async fn start_submission(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<(StatusCode, Json<SubmissionStatus>)> {
    let mounted = state.orchestrator.get(session_id).await.is_some();
    if !mounted && !state.drafts.exists(session_id).await {
        return Err(ApiError::NotFound(format!("Draft session {}", session_id)));
    }

    let submission = state.orchestrator.start(session_id).await;
    Ok((StatusCode::ACCEPTED, Json(submission.status())))
}

/// GET /api/submissions/:id
pub async fn get_submission(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Json<SubmissionStatus>> {
    let submission = state
        .orchestrator
        .get(session_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Submission {}", session_id)))?;
    Ok(Json(submission.status()))
}

/// POST /api/submissions/:id/retry
pub async fn retry_submission(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<(StatusCode, Json<SubmissionStatus>)> {
    let submission = state.orchestrator.retry(session_id).await?;
    Ok((StatusCode::ACCEPTED, Json(submission.status())))
}

/// DELETE /api/submissions/:id
pub async fn cancel_submission(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<StatusCode> {
    if state.orchestrator.cancel(session_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Submission {}", session_id)))
    }
}

pub fn submission_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/submissions/:id",
            post(start_submission)
                .get(get_submission)
                .delete(cancel_submission),
        )
        .route("/api/submissions/:id/retry", post(retry_submission))
}
