//! Session state use cases.

mod store;

pub use store::{SessionLookup, SessionStateStore, MAX_ACQUIRE_ATTEMPTS};
