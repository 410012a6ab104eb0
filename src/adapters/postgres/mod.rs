//! PostgreSQL adapters - Database implementations for storage ports.
//!
//! - `PostgresSessionCollection` - Session records as rows of one table

mod session_collection;

pub use session_collection::PostgresSessionCollection;
