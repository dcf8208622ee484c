//! Event types for the ReBOOT change stream
//!
//! Events are broadcast on an [`EventBus`] and forwarded to SSE clients. They
//! replace the hosted backend's realtime change subscription: a client that
//! wants to refresh a shoe count or a submission screen listens here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Phase of a submission, as reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionPhase {
    Idle,
    Validating,
    UploadingImage,
    WritingRecord,
    IssuingQr,
    Submitted,
    Error,
    /// Submission screen went away; later completions are discarded
    Cancelled,
}

/// ReBOOT event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReBootEvent {
    /// A submission moved between phases
    SubmissionStateChanged {
        session_id: Uuid,
        old_phase: SubmissionPhase,
        new_phase: SubmissionPhase,
        /// Automatic retries consumed so far
        retry_count: u32,
        timestamp: DateTime<Utc>,
    },

    /// A submission finished but something non-fatal went wrong (QR issuance)
    SubmissionWarning {
        session_id: Uuid,
        shoe_id: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A new shoe record was written
    ShoeCreated {
        shoe_id: Uuid,
        brand: String,
        timestamp: DateTime<Utc>,
    },

    /// A QR code was stored on a shoe record
    ShoeQrIssued {
        shoe_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl ReBootEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            ReBootEvent::SubmissionStateChanged { .. } => "SubmissionStateChanged",
            ReBootEvent::SubmissionWarning { .. } => "SubmissionWarning",
            ReBootEvent::ShoeCreated { .. } => "ShoeCreated",
            ReBootEvent::ShoeQrIssued { .. } => "ShoeQrIssued",
        }
    }
}

/// Broadcast channel for [`ReBootEvent`]s
///
/// Cloning shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ReBootEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ReBootEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ReBootEvent,
    ) -> Result<usize, broadcast::error::SendError<ReBootEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ReBootEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
