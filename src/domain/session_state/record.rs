//! The stored session document.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::Timestamp;

use super::ids::SessionKey;
use super::lock::{LockId, SessionStateActions};
use super::payload::{SessionPayload, SessionStateData};

/// One stored session, keyed by `(application_path, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub key: SessionKey,
    pub payload: SessionPayload,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub lock_acquired_at: Timestamp,
    pub locked: bool,
    pub lock_id: LockId,
    pub pending_action: SessionStateActions,
    pub timeout_minutes: u32,
}

impl SessionRecord {
    /// An unlocked record holding freshly written session data.
    pub fn new_item(key: SessionKey, data: SessionStateData, now: Timestamp) -> Self {
        Self {
            key,
            payload: data.payload,
            created_at: now,
            expires_at: now.plus_minutes(data.timeout_minutes),
            lock_acquired_at: now,
            locked: false,
            lock_id: LockId::initial(),
            pending_action: SessionStateActions::None,
            timeout_minutes: data.timeout_minutes,
        }
    }

    /// An empty record whose next reader is told to initialize a new session.
    pub fn uninitialized(key: SessionKey, timeout_minutes: u32, now: Timestamp) -> Self {
        Self {
            pending_action: SessionStateActions::InitializeItem,
            ..Self::new_item(key, SessionStateData::new_empty(timeout_minutes), now)
        }
    }

    /// Expired records count as absent.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    /// Time the current lock has been held, as of `now`.
    pub fn lock_age(&self, now: Timestamp) -> Duration {
        now.duration_since(&self.lock_acquired_at)
    }

    /// The data a reader receives for the given resolved action.
    pub fn data_for(&self, action: SessionStateActions) -> SessionStateData {
        match action {
            SessionStateActions::InitializeItem => SessionStateData::new_empty(self.timeout_minutes),
            SessionStateActions::None => {
                SessionStateData::new(self.payload.clone(), self.timeout_minutes)
            }
        }
    }
}
