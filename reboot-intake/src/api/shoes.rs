//! Shoe record API

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use reboot_common::db::{ShoeId, ShoeRecord};

use crate::error::{ApiError, ApiResult};
use crate::qr::parse_shoe_qr_data;
use crate::AppState;

const DEFAULT_LIST_LIMIT: u32 = 20;
const MAX_LIST_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    /// Decoded QR text, e.g. `SHOE:<uuid>`
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct QrResponse {
    pub shoe_id: ShoeId,
    pub qr_code: String,
}

/// GET /api/shoes?limit=N
pub async fn list_shoes(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<ShoeRecord>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    Ok(Json(state.records.list_recent(limit).await?))
}

/// GET /api/shoes/count
pub async fn count_shoes(State(state): State<AppState>) -> ApiResult<Json<CountResponse>> {
    let count = state.records.count().await?;
    Ok(Json(CountResponse { count }))
}

/// GET /api/shoes/:id
pub async fn get_shoe(
    State(state): State<AppState>,
    Path(id): Path<ShoeId>,
) -> ApiResult<Json<ShoeRecord>> {
    state
        .records
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Shoe {}", id)))
}

/// GET /api/shoes/lookup?code=SHOE:<uuid>
pub async fn lookup_shoe(
    State(state): State<AppState>,
    Query(query): Query<LookupQuery>,
) -> ApiResult<Json<ShoeRecord>> {
    let id = parse_shoe_qr_data(&query.code)
        .ok_or_else(|| ApiError::BadRequest(format!("Not a shoe QR code: {}", query.code)))?;
    get_shoe(State(state), Path(id)).await
}

/// POST /api/shoes/:id/qr
///
/// Regenerates the QR for a record, e.g. after a soft failure at submit time.
pub async fn issue_qr(
    State(state): State<AppState>,
    Path(id): Path<ShoeId>,
) -> ApiResult<Json<QrResponse>> {
    let qr_code = state.qr.issue(id).await?;
    Ok(Json(QrResponse {
        shoe_id: id,
        qr_code,
    }))
}

pub fn shoe_routes() -> Router<AppState> {
    // Literal segments take precedence over `:id`
    Router::new()
        .route("/api/shoes", get(list_shoes))
        .route("/api/shoes/count", get(count_shoes))
        .route("/api/shoes/lookup", get(lookup_shoe))
        .route("/api/shoes/:id", get(get_shoe))
        .route("/api/shoes/:id/qr", post(issue_qr))
}
