//! Application layer - Use cases coordinating domain types and ports.
//!
//! The session state store is the only use case: it drives the lock
//! protocol against whatever `SessionCollection` it is given.

pub mod session_state;

pub use session_state::{SessionLookup, SessionStateStore};
