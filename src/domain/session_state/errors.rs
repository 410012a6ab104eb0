//! Session state error types.
//!
//! Not-found and lock contention are ordinary lookup results and stale lock
//! ids are silently ignored, so the only errors left are bad input, payloads
//! that cannot be decoded, and an unavailable backing store.

use crate::domain::foundation::{DomainError, ErrorCode, ValidationError};
use crate::ports::CollectionError;

/// Session state store errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionStateError {
    /// Caller supplied an invalid value.
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// Session variables could not be encoded or decoded.
    #[error("Session payload error: {0}")]
    Payload(String),

    /// The backing collection failed.
    #[error("Session storage error: {0}")]
    Storage(#[from] CollectionError),
}

impl SessionStateError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        SessionStateError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn payload(message: impl Into<String>) -> Self {
        SessionStateError::Payload(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            SessionStateError::Validation { .. } => ErrorCode::ValidationFailed,
            SessionStateError::Payload(_) => ErrorCode::PayloadCorrupt,
            SessionStateError::Storage(CollectionError::Unavailable(_)) => ErrorCode::DatabaseError,
            SessionStateError::Storage(_) => ErrorCode::InternalError,
        }
    }
}

impl From<ValidationError> for SessionStateError {
    fn from(err: ValidationError) -> Self {
        SessionStateError::Validation {
            field: err.field().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<SessionStateError> for DomainError {
    fn from(err: SessionStateError) -> Self {
        let code = err.code();
        match &err {
            SessionStateError::Validation { field, .. } => {
                let field = field.clone();
                DomainError::new(code, err.to_string()).with_detail("field", field)
            }
            _ => DomainError::new(code, err.to_string()),
        }
    }
}
