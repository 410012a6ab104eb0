//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! ## Storage Ports
//!
//! - `SessionCollection` - Document collection holding session records

mod session_collection;

pub use crate::domain::session_state::ReturnDocument;
pub use session_collection::{CollectionError, IndexSpec, RecordField, SessionCollection};
