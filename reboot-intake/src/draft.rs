//! Session draft store
//!
//! Holds the in-progress submission for each draft session: shoe details,
//! sole photo (data URI) and optional rating. Form screens write entries; a
//! submission run claims the session, and a successful one clears it exactly
//! once. Sessions left idle are pruned by the sweeper.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use reboot_common::db::{Rating, ShoeDetails};
use reboot_common::{Error, Result};

/// Identifier of one draft session (one browser tab)
pub type SessionId = Uuid;

/// The three draft entries of a session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Draft {
    pub shoe_details: Option<ShoeDetails>,
    /// Encoded image as a data URI
    pub sole_photo: Option<String>,
    pub rating: Option<Rating>,
}

impl Draft {
    /// Details and photo are both present (they may still fail validation)
    pub fn is_plausibly_complete(&self) -> bool {
        self.shoe_details.is_some() && self.sole_photo.is_some()
    }

    pub fn summary(&self, session_id: SessionId) -> DraftSummary {
        DraftSummary {
            session_id,
            shoe_details: self.shoe_details.clone(),
            has_photo: self.sole_photo.is_some(),
            photo_length: self.sole_photo.as_ref().map(String::len),
            rating: self.rating,
            complete: self.is_plausibly_complete(),
        }
    }
}

/// Client-facing view of a draft; omits the photo payload
#[derive(Debug, Clone, Serialize)]
pub struct DraftSummary {
    pub session_id: SessionId,
    pub shoe_details: Option<ShoeDetails>,
    pub has_photo: bool,
    pub photo_length: Option<usize>,
    pub rating: Option<Rating>,
    pub complete: bool,
}

/// Why [`DraftStore::claim`] refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClaimRejected {
    #[error("No draft found for this session")]
    Missing,
    #[error("Draft is already being submitted")]
    InUse,
}

struct Session {
    draft: Draft,
    /// A submission run holds the draft; a second run must not read it
    claimed: bool,
    touched_at: Instant,
}

impl Session {
    fn new() -> Self {
        Self {
            draft: Draft::default(),
            claimed: false,
            touched_at: Instant::now(),
        }
    }
}

/// Process-wide draft store
///
/// Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct DraftStore {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl DraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new, empty draft session
    pub async fn create(&self) -> SessionId {
        let session_id = Uuid::new_v4();
        self.sessions.write().await.insert(session_id, Session::new());
        tracing::debug!(session_id = %session_id, "Draft session created");
        session_id
    }

    pub async fn get(&self, session_id: SessionId) -> Option<Draft> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .map(|session| session.draft.clone())
    }

    pub async fn exists(&self, session_id: SessionId) -> bool {
        self.sessions.read().await.contains_key(&session_id)
    }

    pub async fn set_details(&self, session_id: SessionId, details: ShoeDetails) -> Result<()> {
        details.validate()?;
        self.update(session_id, |draft| draft.shoe_details = Some(details))
            .await
    }

    pub async fn set_photo(&self, session_id: SessionId, data_uri: String) -> Result<()> {
        if data_uri.trim().is_empty() {
            return Err(Error::InvalidInput("Photo is empty".to_string()));
        }
        self.update(session_id, |draft| draft.sole_photo = Some(data_uri))
            .await
    }

    /// Set or clear the rating; values outside 1-10 are rejected
    pub async fn set_rating(&self, session_id: SessionId, rating: Option<u8>) -> Result<()> {
        let rating = rating.map(Rating::new).transpose()?;
        self.update(session_id, |draft| draft.rating = rating).await
    }

    /// Take exclusive hold of the draft for one submission run.
    ///
    /// Returns a snapshot; the entries stay in place until [`Self::clear`] or
    /// [`Self::release`].
    pub async fn claim(&self, session_id: SessionId) -> std::result::Result<Draft, ClaimRejected> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&session_id).ok_or(ClaimRejected::Missing)?;
        if session.claimed {
            return Err(ClaimRejected::InUse);
        }
        session.claimed = true;
        session.touched_at = Instant::now();
        Ok(session.draft.clone())
    }

    /// Give the draft back after a run that created no record
    pub async fn release(&self, session_id: SessionId) {
        if let Some(session) = self.sessions.write().await.get_mut(&session_id) {
            session.claimed = false;
            session.touched_at = Instant::now();
        }
    }

    /// Remove every entry of the session. Returns whether it existed.
    pub async fn clear(&self, session_id: SessionId) -> bool {
        let removed = self.sessions.write().await.remove(&session_id).is_some();
        if removed {
            tracing::debug!(session_id = %session_id, "Draft session cleared");
        }
        removed
    }

    /// Drop unclaimed drafts untouched for `max_idle`. Returns how many went.
    pub async fn prune_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|session_id, session| {
            let keep = session.claimed || session.touched_at.elapsed() < max_idle;
            if !keep {
                tracing::debug!(session_id = %session_id, "Idle draft session evicted");
            }
            keep
        });
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn update<F>(&self, session_id: SessionId, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Draft),
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| Error::NotFound(format!("Draft session {}", session_id)))?;
        apply(&mut session.draft);
        session.touched_at = Instant::now();
        Ok(())
    }
}
