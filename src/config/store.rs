//! Session store configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use super::error::ValidationError;

/// One year, the longest idle timeout the host pipeline accepts.
pub const MAX_TIMEOUT_MINUTES: u32 = 525_600;

const MAX_COLLECTION_NAME_LEN: usize = 30;

/// Which collection backend holds the session records.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Postgres,
    Redis,
}

impl BackendKind {
    /// Connection string used when none is configured.
    pub fn default_connection_string(&self) -> &'static str {
        match self {
            BackendKind::Memory => "",
            BackendKind::Postgres => "postgres://localhost",
            BackendKind::Redis => "redis://localhost:6379",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendKind::Memory => "memory",
            BackendKind::Postgres => "postgres",
            BackendKind::Redis => "redis",
        };
        write!(f, "{}", s)
    }
}

/// Session store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Collection backend
    #[serde(default)]
    pub backend: BackendKind,

    /// Backend connection URL; may carry credentials
    #[serde(default)]
    pub connection_string: Option<SecretString>,

    /// Name of an environment variable holding the connection URL,
    /// consulted when `connection_string` is unset
    #[serde(default)]
    pub connection_string_env: Option<String>,

    /// Database used when the PostgreSQL URL names none
    #[serde(default = "default_database")]
    pub database: String,

    /// Table name (PostgreSQL) or key prefix (Redis)
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Idle timeout applied when a session is touched or released
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u32,

    /// PostgreSQL pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

impl StoreConfig {
    /// Get acquire timeout as Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Resolve the connection URL the backend should use.
    ///
    /// Order: `connection_string`, then the environment variable named by
    /// `connection_string_env`, then the backend default. A PostgreSQL URL
    /// without a database path gets `database` appended.
    pub fn resolve_connection_string(&self) -> Result<SecretString, ValidationError> {
        let raw = match self
            .connection_string
            .as_ref()
            .map(|s| s.expose_secret().trim().to_string())
            .filter(|s| !s.is_empty())
        {
            Some(url) => url,
            None => match self
                .connection_string_env
                .as_deref()
                .filter(|name| !name.trim().is_empty())
            {
                Some(name) => std::env::var(name)
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .ok_or_else(|| ValidationError::MissingRequired(name.to_string()))?,
                None => self.backend.default_connection_string().to_string(),
            },
        };

        let resolved = match self.backend {
            BackendKind::Postgres => with_database(&raw, &self.database),
            _ => raw,
        };
        Ok(SecretString::new(resolved))
    }

    /// Validate store configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !is_identifier(&self.collection) || self.collection.len() > MAX_COLLECTION_NAME_LEN {
            return Err(ValidationError::InvalidCollectionName(self.collection.clone()));
        }
        if self.timeout_minutes == 0 || self.timeout_minutes > MAX_TIMEOUT_MINUTES {
            return Err(ValidationError::InvalidTimeout {
                max: MAX_TIMEOUT_MINUTES,
            });
        }

        match self.backend {
            BackendKind::Memory => Ok(()),
            BackendKind::Postgres => {
                if !is_identifier(&self.database) {
                    return Err(ValidationError::InvalidDatabaseName(self.database.clone()));
                }
                if self.max_connections == 0 || self.max_connections > 100 {
                    return Err(ValidationError::InvalidPoolSize);
                }
                let url = self.resolve_connection_string()?;
                let url = url.expose_secret();
                if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                    return Err(ValidationError::InvalidDatabaseUrl);
                }
                Ok(())
            }
            BackendKind::Redis => {
                let url = self.resolve_connection_string()?;
                let url = url.expose_secret();
                if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                    return Err(ValidationError::InvalidRedisUrl);
                }
                Ok(())
            }
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            connection_string: None,
            connection_string_env: None,
            database: default_database(),
            collection: default_collection(),
            timeout_minutes: default_timeout_minutes(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

/// Append `/database` to a URL whose path is empty, keeping any query string.
fn with_database(url: &str, database: &str) -> String {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (url, None),
    };
    let authority_start = base.find("://").map(|i| i + 3).unwrap_or(0);
    let has_database = base[authority_start..]
        .split_once('/')
        .map(|(_, path)| !path.is_empty())
        .unwrap_or(false);

    if has_database {
        return url.to_string();
    }

    let mut resolved = format!("{}/{}", base.trim_end_matches('/'), database);
    if let Some(query) = query {
        resolved.push('?');
        resolved.push_str(query);
    }
    resolved
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn default_database() -> String {
    "aspnetdb".to_string()
}

fn default_collection() -> String {
    "session_state".to_string()
}

fn default_timeout_minutes() -> u32 {
    20
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    5
}
