//! reboot-intake library
//!
//! Shoe intake service: draft sessions collect shoe details, a sole photo
//! and a rating; the submission orchestrator normalizes the photo, uploads
//! it, writes the shoe record and issues its QR code.

pub mod api;
pub mod backoff;
pub mod db;
pub mod draft;
pub mod error;
pub mod photo;
pub mod qr;
pub mod records;
pub mod storage;
pub mod submission;
pub mod sweeper;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use reboot_common::config::ImageConfig;
use reboot_common::events::EventBus;

use crate::draft::DraftStore;
use crate::qr::QrIssuer;
use crate::records::RecordStore;
use crate::submission::SubmissionOrchestrator;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub drafts: DraftStore,
    pub records: Arc<dyn RecordStore>,
    pub orchestrator: Arc<SubmissionOrchestrator>,
    pub qr: QrIssuer,
    pub event_bus: EventBus,
    pub startup_time: DateTime<Utc>,
    /// Root of the local object store, served at `/storage`
    pub local_storage_dir: Option<PathBuf>,
    /// Largest decoded photo a draft accepts
    pub max_photo_bytes: usize,
}

impl AppState {
    pub fn new(
        drafts: DraftStore,
        records: Arc<dyn RecordStore>,
        orchestrator: Arc<SubmissionOrchestrator>,
        qr: QrIssuer,
        event_bus: EventBus,
    ) -> Self {
        Self {
            drafts,
            records,
            orchestrator,
            qr,
            event_bus,
            startup_time: Utc::now(),
            local_storage_dir: None,
            max_photo_bytes: ImageConfig::default().max_bytes,
        }
    }

    pub fn with_local_storage(mut self, dir: PathBuf) -> Self {
        self.local_storage_dir = Some(dir);
        self
    }

    pub fn with_max_photo_bytes(mut self, max_bytes: usize) -> Self {
        self.max_photo_bytes = max_bytes;
        self
    }

    /// Request body limit for draft writes: a base64 data URI of the largest
    /// accepted photo plus room for the JSON envelope
    pub fn draft_body_limit(&self) -> usize {
        self.max_photo_bytes
            .saturating_mul(4)
            .div_ceil(3)
            .saturating_add(DRAFT_BODY_HEADROOM)
    }
}

const DRAFT_BODY_HEADROOM: usize = 64 * 1024;

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let local_storage_dir = state.local_storage_dir.clone();
    let draft_body_limit = state.draft_body_limit();

    let mut router = Router::new()
        .merge(api::health_routes())
        .merge(api::draft_routes(draft_body_limit))
        .merge(api::submission_routes())
        .merge(api::shoe_routes())
        .merge(api::event_routes())
        .with_state(state);

    if let Some(dir) = local_storage_dir {
        router = router.nest_service("/storage", ServeDir::new(dir));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
