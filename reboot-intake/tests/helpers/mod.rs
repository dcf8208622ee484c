//! Shared fixtures for reboot-intake integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{DynamicImage, ImageFormat, RgbImage};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use reboot_common::db::{create_schema, Condition, NewShoe, ShoeDetails, ShoeId, ShoeRecord, SizeUnit};
use reboot_common::events::EventBus;

use reboot_intake::backoff::RetryPolicy;
use reboot_intake::draft::{DraftStore, SessionId};
use reboot_intake::photo::{ImageNormalizer, NormalizedImage};
use reboot_intake::qr::QrIssuer;
use reboot_intake::records::{RecordStore, SqliteRecordStore};
use reboot_intake::storage::{PhotoUploader, UploadError};
use reboot_intake::submission::{OrchestratorDeps, Submission, SubmissionOrchestrator, SubmissionStatus};

/// In-memory SQLite with the shoes schema; one connection so all queries share it
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    create_schema(&pool).await.expect("Failed to create schema");
    pool
}

/// Solid-colour PNG as a data URI
pub fn png_data_uri(width: u32, height: u32) -> String {
    let img = RgbImage::from_pixel(width, height, image::Rgb([120, 80, 40]));
    let mut png = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut png, ImageFormat::Png)
        .expect("Failed to encode PNG");
    format!("data:image/png;base64,{}", BASE64.encode(png.into_inner()))
}

pub fn shoe_details(brand: &str) -> ShoeDetails {
    ShoeDetails {
        brand: brand.to_string(),
        model: Some("Gel-Kayano".to_string()),
        size: "9".to_string(),
        size_unit: SizeUnit::UK,
        condition: Condition::Fair,
        barcode: None,
    }
}

/// Draft with details, photo and rating filled in
pub async fn complete_draft(drafts: &DraftStore) -> SessionId {
    let session_id = drafts.create().await;
    drafts
        .set_details(session_id, shoe_details("Asics"))
        .await
        .unwrap();
    drafts
        .set_photo(session_id, png_data_uri(64, 32))
        .await
        .unwrap();
    drafts.set_rating(session_id, Some(6)).await.unwrap();
    session_id
}

/// Photo uploader that replays scripted failures, then succeeds
#[derive(Default)]
pub struct FakeUploader {
    script: Mutex<VecDeque<UploadError>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeUploader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first calls with `errors`, in order
    pub fn failing_with(errors: Vec<UploadError>) -> Self {
        Self {
            script: Mutex::new(errors.into()),
            ..Self::default()
        }
    }

    /// Fail the first `n` calls with a network error
    pub fn failing_times(n: usize) -> Self {
        Self::failing_with(vec![UploadError::Network("connection reset".to_string()); n])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PhotoUploader for FakeUploader {
    async fn upload(&self, image: &NormalizedImage, _cancel: &CancellationToken) -> Result<String, UploadError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.script.lock().unwrap().pop_front() {
            return Err(err);
        }
        assert_eq!(image.content_type, "image/jpeg");
        Ok(format!("https://cdn.test/shoe-photos/sole-{}.jpg", call))
    }
}

/// Record store wrapper with injectable failures
pub struct FlakyRecordStore {
    inner: SqliteRecordStore,
    insert_failures: AtomicUsize,
    insert_delay: Option<Duration>,
    fail_qr: bool,
    inserts: AtomicUsize,
}

impl FlakyRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            inner: SqliteRecordStore::new(pool),
            insert_failures: AtomicUsize::new(0),
            insert_delay: None,
            fail_qr: false,
            inserts: AtomicUsize::new(0),
        }
    }

    pub fn failing_inserts(self, n: usize) -> Self {
        self.insert_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Hold every insert for `delay` before writing
    pub fn with_insert_delay(mut self, delay: Duration) -> Self {
        self.insert_delay = Some(delay);
        self
    }

    pub fn failing_qr(mut self) -> Self {
        self.fail_qr = true;
        self
    }

    pub fn insert_calls(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for FlakyRecordStore {
    async fn insert(&self, shoe: &NewShoe) -> reboot_common::Result<ShoeId> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.insert_delay {
            tokio::time::sleep(delay).await;
        }
        let remaining = self.insert_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.insert_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(reboot_common::Error::Internal("database is locked".to_string()));
        }
        self.inner.insert(shoe).await
    }

    async fn get(&self, id: ShoeId) -> reboot_common::Result<Option<ShoeRecord>> {
        self.inner.get(id).await
    }

    async fn set_qr_code(&self, id: ShoeId, qr_code: &str) -> reboot_common::Result<()> {
        if self.fail_qr {
            return Err(reboot_common::Error::Internal("qr column unavailable".to_string()));
        }
        self.inner.set_qr_code(id, qr_code).await
    }

    async fn count(&self) -> reboot_common::Result<i64> {
        self.inner.count().await
    }

    async fn list_recent(&self, limit: u32) -> reboot_common::Result<Vec<ShoeRecord>> {
        self.inner.list_recent(limit).await
    }
}

/// Orchestrator wired to fakes
pub struct Harness {
    pub orchestrator: Arc<SubmissionOrchestrator>,
    pub drafts: DraftStore,
    pub uploader: Arc<FakeUploader>,
    pub records: Arc<FlakyRecordStore>,
    pub event_bus: EventBus,
}

/// Millisecond-scale policy so retries finish quickly
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(5))
}

impl Harness {
    pub async fn new(uploader: FakeUploader) -> Self {
        let records = FlakyRecordStore::new(memory_pool().await);
        Self::with(uploader, records, fast_policy())
    }

    pub fn with(uploader: FakeUploader, records: FlakyRecordStore, policy: RetryPolicy) -> Self {
        let drafts = DraftStore::new();
        let uploader = Arc::new(uploader);
        let records = Arc::new(records);
        let event_bus = EventBus::new(256);
        let qr = QrIssuer::new(records.clone(), event_bus.clone());

        let orchestrator = SubmissionOrchestrator::new(OrchestratorDeps {
            drafts: drafts.clone(),
            normalizer: ImageNormalizer::default(),
            uploader: uploader.clone(),
            records: records.clone(),
            qr,
            policy,
            event_bus: event_bus.clone(),
        });

        Self {
            orchestrator,
            drafts,
            uploader,
            records,
            event_bus,
        }
    }
}

/// Wait for the submission to settle, failing the test after 5 seconds
pub async fn settle(submission: &Submission) -> SubmissionStatus {
    tokio::time::timeout(Duration::from_secs(5), submission.settled())
        .await
        .expect("Submission did not settle")
}

/// Poll until `predicate` holds for the submission's status
pub async fn wait_until(submission: &Submission, predicate: impl Fn(&SubmissionStatus) -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !predicate(&submission.status()) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "Condition not reached, last status: {:?}",
            submission.status()
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
