//! Draft session API
//!
//! Form screens write their entries here:
//! POST /api/drafts, GET|DELETE /api/drafts/:id,
//! PUT /api/drafts/:id/details, /photo, /rating

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use reboot_common::db::ShoeDetails;

use crate::draft::{DraftSummary, SessionId};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct CreateDraftResponse {
    pub session_id: SessionId,
}

#[derive(Debug, Deserialize)]
pub struct PhotoRequest {
    /// Encoded image as a data URI
    pub data_uri: String,
}

#[derive(Debug, Deserialize)]
pub struct RatingRequest {
    /// 1-10, or null to clear
    pub rating: Option<u8>,
}

/// POST /api/drafts
pub async fn create_draft(
    State(state): State<AppState>,
) -> (StatusCode, Json<CreateDraftResponse>) {
    let session_id = state.drafts.create().await;
    (StatusCode::CREATED, Json(CreateDraftResponse { session_id }))
}

/// GET /api/drafts/:id
pub async fn get_draft(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Json<DraftSummary>> {
    let draft = state
        .drafts
        .get(session_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Draft session {}", session_id)))?;
    Ok(Json(draft.summary(session_id)))
}

/// PUT /api/drafts/:id/details
pub async fn put_details(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(details): Json<ShoeDetails>,
) -> ApiResult<StatusCode> {
    state.drafts.set_details(session_id, details).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/drafts/:id/photo
pub async fn put_photo(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(request): Json<PhotoRequest>,
) -> ApiResult<StatusCode> {
    state.drafts.set_photo(session_id, request.data_uri).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/drafts/:id/rating
pub async fn put_rating(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(request): Json<RatingRequest>,
) -> ApiResult<StatusCode> {
    state.drafts.set_rating(session_id, request.rating).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/drafts/:id
pub async fn delete_draft(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<StatusCode> {
    if state.drafts.clear(session_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Draft session {}", session_id)))
    }
}

/// Draft routes; `body_limit` replaces axum's 2 MB default so full-size photos fit
pub fn draft_routes(body_limit: usize) -> Router<AppState> {
    Router::new()
        .route("/api/drafts", post(create_draft))
        .route("/api/drafts/:id", get(get_draft).delete(delete_draft))
        .route("/api/drafts/:id/details", put(put_details))
        .route("/api/drafts/:id/photo", put(put_photo))
        .route("/api/drafts/:id/rating", put(put_rating))
        .layer(DefaultBodyLimit::max(body_limit))
}
