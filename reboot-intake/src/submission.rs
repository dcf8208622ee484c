//! Submission orchestrator
//!
//! Drives one draft session through
//! `Idle → Validating → UploadingImage → WritingRecord → IssuingQr → Submitted`.
//!
//! Failure handling:
//! - **UserData** (missing fields, bad photo, rejected upload): terminal
//!   `Error`, never retried automatically.
//! - **Transient** (network, storage or database failure): `Error` with a retry
//!   scheduled after `base * 2^retry_count`; after `max_retries` the error is
//!   terminal and waits for a manual [`SubmissionOrchestrator::retry`].
//! - **Soft** (QR issuance): recorded as a warning, submission still succeeds.
//!
//! A single [`SubmissionState`] per session guards against duplicate starts:
//! `start` only proceeds from `Idle`, and the transition is a compare-and-set
//! on the state channel. Each attempt also claims the draft, so a run left over
//! from an earlier mount cannot race a new one into writing a second record.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use reboot_common::db::{NewShoe, ShoeId};
use reboot_common::events::{EventBus, ReBootEvent, SubmissionPhase};

use crate::backoff::{sleep_or_cancel, RetryPolicy};
use crate::draft::{Draft, DraftStore, SessionId};
use crate::photo::{ImageError, ImageNormalizer};
use crate::qr::QrIssuer;
use crate::records::RecordStore;
use crate::storage::{PhotoUploader, UploadError};

/// How a failed stage is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Bad input; shown to the user, never retried automatically
    UserData,
    /// Network/server failure; retried with backoff
    Transient,
}

/// Authoritative state of one submission
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SubmissionState {
    Idle,
    Validating,
    UploadingImage,
    WritingRecord,
    IssuingQr {
        shoe_id: ShoeId,
    },
    Submitted {
        shoe_id: ShoeId,
        qr_issued: bool,
        /// Soft failure recorded during QR issuance
        warning: Option<String>,
    },
    Error {
        kind: FailureKind,
        message: String,
        /// An automatic retry is pending
        retry_scheduled: bool,
    },
    Cancelled,
}

impl SubmissionState {
    pub fn phase(&self) -> SubmissionPhase {
        match self {
            SubmissionState::Idle => SubmissionPhase::Idle,
            SubmissionState::Validating => SubmissionPhase::Validating,
            SubmissionState::UploadingImage => SubmissionPhase::UploadingImage,
            SubmissionState::WritingRecord => SubmissionPhase::WritingRecord,
            SubmissionState::IssuingQr { .. } => SubmissionPhase::IssuingQr,
            SubmissionState::Submitted { .. } => SubmissionPhase::Submitted,
            SubmissionState::Error { .. } => SubmissionPhase::Error,
            SubmissionState::Cancelled => SubmissionPhase::Cancelled,
        }
    }

    /// Nothing will happen without outside action
    pub fn is_settled(&self) -> bool {
        match self {
            SubmissionState::Submitted { .. } | SubmissionState::Cancelled => true,
            SubmissionState::Error {
                retry_scheduled, ..
            } => !retry_scheduled,
            _ => false,
        }
    }

    /// Terminal error waiting for a manual retry
    pub fn awaits_manual_retry(&self) -> bool {
        matches!(
            self,
            SubmissionState::Error {
                retry_scheduled: false,
                ..
            }
        )
    }
}

/// Snapshot returned to clients
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionStatus {
    pub session_id: SessionId,
    pub state: SubmissionState,
    /// Automatic retries consumed in the current run
    pub retry_count: u32,
    pub mounted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Why [`SubmissionOrchestrator::retry`] refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryRejected {
    #[error("No submission for session {0}")]
    NotMounted(SessionId),
    #[error("Submission is {0:?}, not awaiting retry")]
    NotRetryable(SubmissionPhase),
}

/// Photo URL from an earlier attempt, tied to the photo it was uploaded from
struct CachedPhoto {
    fingerprint: u64,
    url: String,
}

fn photo_fingerprint(data_uri: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    data_uri.hash(&mut hasher);
    hasher.finish()
}

/// One submission screen instance
pub struct Submission {
    session_id: SessionId,
    state_tx: watch::Sender<SubmissionStatus>,
    cancel: CancellationToken,
    /// Reused so retries of an unchanged photo skip the upload
    uploaded_photo: Mutex<Option<CachedPhoto>>,
}

impl Submission {
    fn new(session_id: SessionId) -> Self {
        let now = Utc::now();
        let (state_tx, _) = watch::channel(SubmissionStatus {
            session_id,
            state: SubmissionState::Idle,
            retry_count: 0,
            mounted_at: now,
            updated_at: now,
        });

        Self {
            session_id,
            state_tx,
            cancel: CancellationToken::new(),
            uploaded_photo: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn status(&self) -> SubmissionStatus {
        self.state_tx.borrow().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until the submission needs no further work or outside action
    pub async fn settled(&self) -> SubmissionStatus {
        let mut rx = self.state_tx.subscribe();
        let result = rx.wait_for(|status| status.state.is_settled()).await;
        match result {
            Ok(status) => status.clone(),
            // Sender lives in self, so the channel cannot close while borrowed
            Err(_) => self.status(),
        }
    }

    /// Compare-and-set into `Validating` when `accept` holds for the current state.
    fn begin_from(&self, accept: impl Fn(&SubmissionState) -> bool, reset_retries: bool) -> bool {
        let cancel = &self.cancel;
        self.state_tx.send_if_modified(|status| {
            if cancel.is_cancelled() || !accept(&status.state) {
                return false;
            }
            status.state = SubmissionState::Validating;
            if reset_retries {
                status.retry_count = 0;
            }
            status.updated_at = Utc::now();
            true
        })
    }

    /// Apply `apply` unless the submission was cancelled.
    ///
    /// Returns the (old, new) phases and retry count when applied.
    fn update(
        &self,
        apply: impl FnOnce(&mut SubmissionStatus),
    ) -> Option<(SubmissionPhase, SubmissionPhase, u32)> {
        let mut change = None;
        let cancel = &self.cancel;
        self.state_tx.send_if_modified(|status| {
            if cancel.is_cancelled() || status.state == SubmissionState::Cancelled {
                return false;
            }
            let old = status.state.phase();
            apply(status);
            status.updated_at = Utc::now();
            change = Some((old, status.state.phase(), status.retry_count));
            true
        });
        change
    }

    /// URL of an earlier upload of exactly this photo
    async fn cached_photo_url(&self, fingerprint: u64) -> Option<String> {
        self.uploaded_photo
            .lock()
            .await
            .as_ref()
            .filter(|cached| cached.fingerprint == fingerprint)
            .map(|cached| cached.url.clone())
    }

    async fn cache_photo_url(&self, fingerprint: u64, url: &str) {
        *self.uploaded_photo.lock().await = Some(CachedPhoto {
            fingerprint,
            url: url.to_string(),
        });
    }
}

/// A stage failure, already classified
#[derive(Debug)]
enum AttemptError {
    Failed(FailureKind, String),
    Cancelled,
}

impl AttemptError {
    fn user(message: impl Into<String>) -> Self {
        AttemptError::Failed(FailureKind::UserData, message.into())
    }

    fn transient(message: impl Into<String>) -> Self {
        AttemptError::Failed(FailureKind::Transient, message.into())
    }
}

impl From<ImageError> for AttemptError {
    fn from(err: ImageError) -> Self {
        // Retrying the same bytes cannot help, whatever the cause
        AttemptError::user(err.to_string())
    }
}

impl From<UploadError> for AttemptError {
    fn from(err: UploadError) -> Self {
        if matches!(err, UploadError::Cancelled) {
            AttemptError::Cancelled
        } else if err.is_retryable() {
            AttemptError::transient(err.to_string())
        } else {
            AttemptError::user(err.to_string())
        }
    }
}

fn classify_record_error(err: reboot_common::Error) -> AttemptError {
    match err {
        reboot_common::Error::InvalidInput(msg) => AttemptError::user(msg),
        other => AttemptError::transient(other.to_string()),
    }
}

/// Collaborators of the orchestrator
pub struct OrchestratorDeps {
    pub drafts: DraftStore,
    pub normalizer: ImageNormalizer,
    pub uploader: Arc<dyn PhotoUploader>,
    pub records: Arc<dyn RecordStore>,
    pub qr: QrIssuer,
    pub policy: RetryPolicy,
    pub event_bus: EventBus,
}

/// Owns every mounted submission and runs their pipelines
pub struct SubmissionOrchestrator {
    deps: OrchestratorDeps,
    submissions: RwLock<HashMap<SessionId, Arc<Submission>>>,
}

impl SubmissionOrchestrator {
    pub fn new(deps: OrchestratorDeps) -> Arc<Self> {
        Arc::new(Self {
            deps,
            submissions: RwLock::new(HashMap::new()),
        })
    }

    /// Get or create the submission instance for `session_id`
    pub async fn mount(&self, session_id: SessionId) -> Arc<Submission> {
        let mut submissions = self.submissions.write().await;
        submissions
            .entry(session_id)
            .or_insert_with(|| {
                debug!(session_id = %session_id, "Submission mounted");
                Arc::new(Submission::new(session_id))
            })
            .clone()
    }

    pub async fn get(&self, session_id: SessionId) -> Option<Arc<Submission>> {
        self.submissions.read().await.get(&session_id).cloned()
    }

    /// Mount and start the pipeline. Calls after the first are no-ops.
    pub async fn start(self: &Arc<Self>, session_id: SessionId) -> Arc<Submission> {
        let submission = self.mount(session_id).await;

        if submission.begin_from(|state| *state == SubmissionState::Idle, false) {
            info!(session_id = %session_id, "Submission started");
            self.emit_transition(&submission, SubmissionPhase::Idle, SubmissionPhase::Validating, 0);
            self.spawn_run(submission.clone());
        } else {
            debug!(
                session_id = %session_id,
                phase = ?submission.status().state.phase(),
                "Submission already started, ignoring"
            );
        }

        submission
    }

    /// Re-run a submission that ended in a terminal error
    pub async fn retry(self: &Arc<Self>, session_id: SessionId) -> Result<Arc<Submission>, RetryRejected> {
        let submission = self
            .get(session_id)
            .await
            .ok_or(RetryRejected::NotMounted(session_id))?;

        if !submission.begin_from(SubmissionState::awaits_manual_retry, true) {
            return Err(RetryRejected::NotRetryable(submission.status().state.phase()));
        }

        info!(session_id = %session_id, "Manual retry requested");
        self.emit_transition(&submission, SubmissionPhase::Error, SubmissionPhase::Validating, 0);
        self.spawn_run(submission.clone());
        Ok(submission)
    }

    /// Unmount: cancel pending retries and suppress later state updates.
    ///
    /// Returns false if nothing was mounted.
    pub async fn cancel(&self, session_id: SessionId) -> bool {
        let Some(submission) = self.submissions.write().await.remove(&session_id) else {
            return false;
        };

        submission.cancel.cancel();
        let old = submission.status().state.phase();
        submission.state_tx.send_modify(|status| {
            if !matches!(status.state, SubmissionState::Submitted { .. }) {
                status.state = SubmissionState::Cancelled;
                status.updated_at = Utc::now();
            }
        });
        let new = submission.status().state.phase();
        if old != new {
            self.emit_transition(&submission, old, new, submission.status().retry_count);
        }

        info!(session_id = %session_id, "Submission unmounted");
        true
    }

    /// Forget settled submissions not updated for `max_age`. Returns how many went.
    pub async fn prune_settled(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let mut submissions = self.submissions.write().await;
        let before = submissions.len();
        submissions.retain(|session_id, submission| {
            let status = submission.status();
            let age = (now - status.updated_at).to_std().unwrap_or_default();
            let keep = !status.state.is_settled() || age < max_age;
            if !keep {
                debug!(session_id = %session_id, phase = ?status.state.phase(), "Settled submission evicted");
            }
            keep
        });
        before - submissions.len()
    }

    pub async fn len(&self) -> usize {
        self.submissions.read().await.len()
    }

    fn spawn_run(self: &Arc<Self>, submission: Arc<Submission>) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.run(submission).await;
        });
    }

    /// Attempt until success, a user-data error, the retry budget, or cancellation
    async fn run(&self, submission: Arc<Submission>) {
        let session_id = submission.session_id;

        loop {
            let (kind, message) = match self.attempt(&submission).await {
                Ok(()) => return,
                Err(AttemptError::Cancelled) => {
                    debug!(session_id = %session_id, "Submission cancelled mid-flight");
                    return;
                }
                Err(AttemptError::Failed(kind, message)) => (kind, message),
            };

            let retry_count = submission.status().retry_count;
            let will_retry =
                kind == FailureKind::Transient && retry_count < self.deps.policy.max_retries;

            let next_retry_count = if will_retry { retry_count + 1 } else { retry_count };
            let error_state = SubmissionState::Error {
                kind,
                message: message.clone(),
                retry_scheduled: will_retry,
            };
            self.transition(&submission, |status| {
                status.state = error_state;
                status.retry_count = next_retry_count;
            });

            if !will_retry {
                warn!(
                    session_id = %session_id,
                    kind = ?kind,
                    retry_count,
                    error = %message,
                    "Submission failed"
                );
                return;
            }

            let delay = self.deps.policy.delay_for(retry_count);
            warn!(
                session_id = %session_id,
                retry = next_retry_count,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "Submission failed, retry scheduled"
            );

            if !sleep_or_cancel(delay, &submission.cancel).await {
                return;
            }
            self.transition(&submission, |status| status.state = SubmissionState::Validating);
        }
    }

    /// One pass through the pipeline, holding the draft claim throughout
    async fn attempt(&self, submission: &Submission) -> Result<(), AttemptError> {
        let session_id = submission.session_id;

        // Validating
        let draft = self
            .deps
            .drafts
            .claim(session_id)
            .await
            .map_err(|e| AttemptError::user(e.to_string()))?;

        let result = self.attempt_claimed(submission, draft).await;
        if result.is_err() {
            // Every failure happens before the record exists
            self.deps.drafts.release(session_id).await;
        }
        result
    }

    async fn attempt_claimed(&self, submission: &Submission, draft: Draft) -> Result<(), AttemptError> {
        let session_id = submission.session_id;

        let details = draft
            .shoe_details
            .ok_or_else(|| AttemptError::user("Shoe details are missing"))?;
        details
            .validate()
            .map_err(|e| AttemptError::user(e.to_string()))?;
        let rating = draft.rating;

        let photo = draft
            .sole_photo
            .ok_or_else(|| AttemptError::user("Sole photo is missing"))?;
        let fingerprint = photo_fingerprint(&photo);

        let photo_url = match submission.cached_photo_url(fingerprint).await {
            Some(url) => url,
            None => {
                let image = self.deps.normalizer.normalize(&photo)?;

                self.enter(submission, SubmissionState::UploadingImage)?;
                let url = self.deps.uploader.upload(&image, &submission.cancel).await?;
                submission.cache_photo_url(fingerprint, &url).await;
                url
            }
        };

        self.enter(submission, SubmissionState::WritingRecord)?;
        let new_shoe =
            NewShoe::new(details, rating, photo_url).map_err(|e| AttemptError::user(e.to_string()))?;
        let shoe_id = self
            .deps
            .records
            .insert(&new_shoe)
            .await
            .map_err(classify_record_error)?;

        self.deps.event_bus.emit_lossy(ReBootEvent::ShoeCreated {
            shoe_id,
            brand: new_shoe.details.brand.clone(),
            timestamp: Utc::now(),
        });

        // The record exists from here on; cancellation only silences updates
        self.transition(submission, |status| {
            status.state = SubmissionState::IssuingQr { shoe_id }
        });
        let warning = match self.deps.qr.issue(shoe_id).await {
            Ok(_) => None,
            Err(err) => {
                warn!(session_id = %session_id, shoe_id = %shoe_id, error = %err, "QR issuance failed");
                self.deps.event_bus.emit_lossy(ReBootEvent::SubmissionWarning {
                    session_id,
                    shoe_id,
                    message: err.to_string(),
                    timestamp: Utc::now(),
                });
                Some(err.to_string())
            }
        };

        self.deps.drafts.clear(session_id).await;
        let qr_issued = warning.is_none();
        self.transition(submission, |status| {
            status.state = SubmissionState::Submitted {
                shoe_id,
                qr_issued,
                warning,
            }
        });

        info!(session_id = %session_id, shoe_id = %shoe_id, qr_issued, "Submission complete");
        Ok(())
    }

    /// Transition before starting a remote stage; refuses once cancelled
    fn enter(&self, submission: &Submission, state: SubmissionState) -> Result<(), AttemptError> {
        if submission.is_cancelled() {
            return Err(AttemptError::Cancelled);
        }
        self.transition(submission, |status| status.state = state);
        Ok(())
    }

    fn transition(&self, submission: &Submission, update: impl FnOnce(&mut SubmissionStatus)) {
        if let Some((old, new, retry_count)) = submission.update(update) {
            self.emit_transition(submission, old, new, retry_count);
        }
    }

    fn emit_transition(
        &self,
        submission: &Submission,
        old_phase: SubmissionPhase,
        new_phase: SubmissionPhase,
        retry_count: u32,
    ) {
        debug!(
            session_id = %submission.session_id,
            from = ?old_phase,
            to = ?new_phase,
            retry_count,
            "Submission transition"
        );
        self.deps.event_bus.emit_lossy(ReBootEvent::SubmissionStateChanged {
            session_id: submission.session_id,
            old_phase,
            new_phase,
            retry_count,
            timestamp: Utc::now(),
        });
    }
}
