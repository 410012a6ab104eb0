//! Identifiers addressing a session record.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::foundation::ValidationError;

/// Longest session id accepted, matching the host pipeline's limit.
pub const MAX_SESSION_ID_LEN: usize = 80;

/// Logical partition key: the hosted application owning a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationPath(String);

impl ApplicationPath {
    /// Creates a new ApplicationPath, returning error if empty.
    pub fn new(path: impl Into<String>) -> Result<Self, ValidationError> {
        let path = path.into();
        if path.is_empty() {
            return Err(ValidationError::empty_field("application_path"));
        }
        Ok(Self(path))
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApplicationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session identifier, unique within an [`ApplicationPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionStateId(String);

impl SessionStateId {
    /// Creates a new SessionStateId, returning error if empty or too long.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValidationError::empty_field("session_id"));
        }
        let len = id.chars().count();
        if len > MAX_SESSION_ID_LEN {
            return Err(ValidationError::too_long("session_id", MAX_SESSION_ID_LEN, len));
        }
        Ok(Self(id))
    }

    /// Generates a fresh random id for a newly issued session.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionStateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite key `(application_path, id)` identifying one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub application_path: ApplicationPath,
    pub id: SessionStateId,
}

impl SessionKey {
    pub fn new(application_path: ApplicationPath, id: SessionStateId) -> Self {
        Self {
            application_path,
            id,
        }
    }

    /// Validates both parts and builds the key.
    pub fn parse(
        application_path: impl Into<String>,
        id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Ok(Self::new(
            ApplicationPath::new(application_path)?,
            SessionStateId::new(id)?,
        ))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.application_path, self.id)
    }
}
