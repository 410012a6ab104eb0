//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(String),

    #[error("Invalid PostgreSQL URL format")]
    InvalidDatabaseUrl,

    #[error("Invalid Redis URL format")]
    InvalidRedisUrl,

    #[error("Invalid database name: {0}")]
    InvalidDatabaseName(String),

    #[error("Invalid collection name: {0}")]
    InvalidCollectionName(String),

    #[error("Session timeout must be between 1 and {max} minutes")]
    InvalidTimeout { max: u32 },

    #[error("Pool size must be between 1 and 100")]
    InvalidPoolSize,

    #[error("Invalid log filter: {0}")]
    InvalidLogFilter(String),
}
