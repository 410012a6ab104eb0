//! Fencing token and pending-action marker stored on each record.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::ValidationError;

/// Fencing token for exclusive access to a record.
///
/// Incremented on every exclusive acquisition. A holder proves ownership on
/// release by presenting the value it was handed; any other value is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockId(u64);

impl LockId {
    /// Lock id of a freshly inserted record.
    pub const fn initial() -> Self {
        Self(0)
    }

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The token the next exclusive acquisition hands out.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for LockId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Action the next reader of a record must take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStateActions {
    /// Hand back the stored payload.
    #[default]
    None,
    /// Hand back a fresh empty session instead of the stored payload.
    InitializeItem,
}

impl SessionStateActions {
    /// Numeric code used by stores without an enum column type.
    pub fn as_code(self) -> i16 {
        match self {
            SessionStateActions::None => 0,
            SessionStateActions::InitializeItem => 1,
        }
    }

    pub fn from_code(code: i16) -> Result<Self, ValidationError> {
        match code {
            0 => Ok(SessionStateActions::None),
            1 => Ok(SessionStateActions::InitializeItem),
            other => Err(ValidationError::invalid_format(
                "pending_action",
                format!("unknown action code {}", other),
            )),
        }
    }
}
