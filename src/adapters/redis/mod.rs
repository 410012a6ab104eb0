//! Redis adapters - Shared-cache implementations for storage ports.
//!
//! - `RedisSessionCollection` - Session records as JSON documents, one key each

mod session_collection;

pub use session_collection::RedisSessionCollection;
