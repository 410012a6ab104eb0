//! Session state domain module.
//!
//! Models a stored web session: an opaque payload keyed by application path
//! and session id, guarded by a cooperative exclusive lock whose fencing
//! token (`LockId`) lets stale holders be ignored without coordination.
//!
//! # Record lifecycle
//!
//! ```text
//! Absent -> Unlocked(lock_id = 0) -> Locked(k) -> Unlocked(k) -> ... -> Absent
//! ```
//!
//! Expiry wins over lock state: a locked record past `expires_at` is
//! treated as absent by the next reader, which deletes it.

mod errors;
mod filter;
mod ids;
mod lock;
mod payload;
mod record;

pub use errors::SessionStateError;
pub use filter::{RecordFilter, RecordUpdate, ReturnDocument};
pub use ids::{ApplicationPath, SessionKey, SessionStateId, MAX_SESSION_ID_LEN};
pub use lock::{LockId, SessionStateActions};
pub use payload::{SessionItems, SessionPayload, SessionStateData};
pub use record::SessionRecord;
