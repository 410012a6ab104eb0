//! Query filters and mutations over session records.
//!
//! These are the reference semantics for every collection adapter: an
//! adapter must select exactly the records [`RecordFilter::matches`] accepts
//! and change them exactly as [`RecordUpdate::apply`] does.

use crate::domain::foundation::Timestamp;

use super::ids::SessionKey;
use super::lock::{LockId, SessionStateActions};
use super::payload::SessionPayload;
use super::record::SessionRecord;

/// Selects the record for one key, optionally narrowed by lock and expiry state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter {
    pub key: SessionKey,
    pub lock_id: Option<LockId>,
    pub unlocked_only: bool,
    /// Only records with `expires_at > t`.
    pub live_at: Option<Timestamp>,
    /// Only records with `expires_at <= t`.
    pub expired_at: Option<Timestamp>,
}

impl RecordFilter {
    /// Matches the record for `key` in any state.
    pub fn for_key(key: &SessionKey) -> Self {
        Self {
            key: key.clone(),
            lock_id: None,
            unlocked_only: false,
            live_at: None,
            expired_at: None,
        }
    }

    pub fn with_lock_id(mut self, lock_id: LockId) -> Self {
        self.lock_id = Some(lock_id);
        self
    }

    pub fn unlocked(mut self) -> Self {
        self.unlocked_only = true;
        self
    }

    pub fn live_at(mut self, now: Timestamp) -> Self {
        self.live_at = Some(now);
        self
    }

    pub fn expired_at(mut self, now: Timestamp) -> Self {
        self.expired_at = Some(now);
        self
    }

    pub fn matches(&self, record: &SessionRecord) -> bool {
        if record.key != self.key {
            return false;
        }
        if let Some(lock_id) = self.lock_id {
            if record.lock_id != lock_id {
                return false;
            }
        }
        if self.unlocked_only && record.locked {
            return false;
        }
        if let Some(now) = self.live_at {
            if record.is_expired(now) {
                return false;
            }
        }
        if let Some(now) = self.expired_at {
            if !record.is_expired(now) {
                return false;
            }
        }
        true
    }
}

/// Field assignments applied atomically to one matched record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    pub locked: Option<bool>,
    pub lock_acquired_at: Option<Timestamp>,
    pub increment_lock_id: bool,
    pub pending_action: Option<SessionStateActions>,
    pub payload: Option<SessionPayload>,
    pub expires_at: Option<Timestamp>,
}

impl RecordUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive acquisition: lock, stamp, bump the fencing token, clear the marker.
    pub fn acquire(now: Timestamp) -> Self {
        Self {
            locked: Some(true),
            lock_acquired_at: Some(now),
            increment_lock_id: true,
            pending_action: Some(SessionStateActions::None),
            ..Self::default()
        }
    }

    pub fn set_locked(mut self, locked: bool) -> Self {
        self.locked = Some(locked);
        self
    }

    pub fn set_payload(mut self, payload: SessionPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn set_expires_at(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply(&self, record: &mut SessionRecord) {
        if let Some(locked) = self.locked {
            record.locked = locked;
        }
        if let Some(at) = self.lock_acquired_at {
            record.lock_acquired_at = at;
        }
        if self.increment_lock_id {
            record.lock_id = record.lock_id.next();
        }
        if let Some(action) = self.pending_action {
            record.pending_action = action;
        }
        if let Some(payload) = &self.payload {
            record.payload = payload.clone();
        }
        if let Some(at) = self.expires_at {
            record.expires_at = at;
        }
    }
}

/// Which version of a document an atomic update hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnDocument {
    Before,
    After,
}
