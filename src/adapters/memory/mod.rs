//! In-memory collection adapter for tests and single-process hosts.

mod in_memory_session_collection;

pub use in_memory_session_collection::InMemorySessionCollection;
