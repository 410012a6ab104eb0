//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the domain to external systems:
//! - `memory` - Process-local collection (tests, single server)
//! - `postgres` - PostgreSQL table
//! - `redis` - Redis documents with server-side conditional updates

pub mod memory;
pub mod postgres;
pub mod redis;

pub use memory::InMemorySessionCollection;
pub use postgres::PostgresSessionCollection;
pub use redis::RedisSessionCollection;

use secrecy::ExposeSecret;
use std::sync::Arc;

use crate::config::{BackendKind, StoreConfig};
use crate::ports::{CollectionError, SessionCollection};

/// Build the collection selected by `config.backend`.
///
/// # Errors
///
/// `Unavailable` when the configuration is invalid, the connection string
/// cannot be resolved, or the backend cannot be reached.
pub async fn connect_collection(
    config: &StoreConfig,
) -> Result<Arc<dyn SessionCollection>, CollectionError> {
    config
        .validate()
        .map_err(|e| CollectionError::Unavailable(format!("Invalid store configuration: {}", e)))?;

    let resolve = || {
        config
            .resolve_connection_string()
            .map_err(|e| CollectionError::Unavailable(e.to_string()))
    };

    tracing::info!(backend = %config.backend, collection = %config.collection, "Connecting session collection");

    let collection: Arc<dyn SessionCollection> = match config.backend {
        BackendKind::Memory => Arc::new(InMemorySessionCollection::new()),
        BackendKind::Postgres => {
            let url = resolve()?;
            Arc::new(PostgresSessionCollection::connect(config, url.expose_secret()).await?)
        }
        BackendKind::Redis => {
            let url = resolve()?;
            Arc::new(
                RedisSessionCollection::connect(url.expose_secret(), config.collection.clone())
                    .await?,
            )
        }
    };
    Ok(collection)
}
