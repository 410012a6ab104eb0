//! Domain layer containing session state types and rules.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (timestamp, errors)
//! - `session_state` - Session records, fencing lock ids, filters and mutations

pub mod foundation;
pub mod session_state;
