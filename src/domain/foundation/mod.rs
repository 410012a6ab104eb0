//! Foundation module - Shared domain primitives.
//!
//! Contains the timestamp value object and the error vocabulary
//! shared by the session state domain, ports and adapters.

mod errors;
mod timestamp;

pub use errors::{DomainError, ErrorCode, ValidationError};
pub use timestamp::Timestamp;
