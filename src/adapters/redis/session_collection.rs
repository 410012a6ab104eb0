//! Redis-backed session collection for multi-server deployments.
//!
//! Each record is a JSON document under its own key. Filters and updates
//! are evaluated inside a Lua script, so matching and writing a record is
//! one atomic step on the server.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::MultiplexedConnection;
use redis::Script;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::Timestamp;
use crate::domain::session_state::{
    ApplicationPath, LockId, RecordFilter, RecordUpdate, ReturnDocument, SessionKey,
    SessionPayload, SessionRecord, SessionStateActions, SessionStateId,
};
use crate::ports::{CollectionError, IndexSpec, SessionCollection};

/// Match the document at KEYS[1] against the filter in ARGV[1], then act
/// according to the mode in ARGV[2]:
///
/// - `match`: return the document
/// - `delete`: delete it and return the deleted document
/// - `before` / `after`: apply the update in ARGV[3] and return the old or new document
///
/// Returns nil when nothing matched.
static FIND_AND_MODIFY: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return false end
local doc = cjson.decode(raw)
local filter = cjson.decode(ARGV[1])
if filter.lock_id ~= nil and doc.lock_id ~= filter.lock_id then return false end
if filter.unlocked_only and doc.locked then return false end
if filter.live_at ~= nil and doc.expires_at <= filter.live_at then return false end
if filter.expired_at ~= nil and doc.expires_at > filter.expired_at then return false end

local mode = ARGV[2]
if mode == 'match' then return raw end
if mode == 'delete' then
  redis.call('DEL', KEYS[1])
  return raw
end

local update = cjson.decode(ARGV[3])
if update.locked ~= nil then doc.locked = update.locked end
if update.lock_acquired_at ~= nil then doc.lock_acquired_at = update.lock_acquired_at end
if update.increment_lock_id then doc.lock_id = doc.lock_id + 1 end
if update.pending_action ~= nil then doc.pending_action = update.pending_action end
if update.payload ~= nil then
  doc.payload = update.payload
  doc.item_count = update.item_count
end
if update.expires_at ~= nil then doc.expires_at = update.expires_at end

local written = cjson.encode(doc)
redis.call('SET', KEYS[1], written)
if mode == 'after' then return written end
return raw
"#,
    )
});

/// Stored shape of a record. Timestamps are Unix milliseconds and the
/// payload is hex so the script can compare and copy them as plain values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RedisDocument {
    application_path: String,
    id: String,
    payload: String,
    item_count: u32,
    created_at: i64,
    expires_at: i64,
    lock_acquired_at: i64,
    locked: bool,
    lock_id: u64,
    pending_action: i16,
    timeout_minutes: u32,
}

impl From<&SessionRecord> for RedisDocument {
    fn from(record: &SessionRecord) -> Self {
        Self {
            application_path: record.key.application_path.as_str().to_string(),
            id: record.key.id.as_str().to_string(),
            payload: hex::encode(record.payload.bytes()),
            item_count: record.payload.item_count(),
            created_at: record.created_at.as_unix_millis(),
            expires_at: record.expires_at.as_unix_millis(),
            lock_acquired_at: record.lock_acquired_at.as_unix_millis(),
            locked: record.locked,
            lock_id: record.lock_id.value(),
            pending_action: record.pending_action.as_code(),
            timeout_minutes: record.timeout_minutes,
        }
    }
}

impl TryFrom<RedisDocument> for SessionRecord {
    type Error = CollectionError;

    fn try_from(doc: RedisDocument) -> Result<Self, Self::Error> {
        let invalid = |e: crate::domain::foundation::ValidationError| {
            CollectionError::Serialization(format!("Invalid stored record: {}", e))
        };
        let bytes = hex::decode(&doc.payload)
            .map_err(|e| CollectionError::Serialization(format!("Invalid payload: {}", e)))?;

        Ok(SessionRecord {
            key: SessionKey::new(
                ApplicationPath::new(doc.application_path).map_err(invalid)?,
                SessionStateId::new(doc.id).map_err(invalid)?,
            ),
            payload: SessionPayload::new(bytes, doc.item_count),
            created_at: Timestamp::from_unix_millis(doc.created_at),
            expires_at: Timestamp::from_unix_millis(doc.expires_at),
            lock_acquired_at: Timestamp::from_unix_millis(doc.lock_acquired_at),
            locked: doc.locked,
            lock_id: LockId::new(doc.lock_id),
            pending_action: SessionStateActions::from_code(doc.pending_action)
                .map_err(invalid)?,
            timeout_minutes: doc.timeout_minutes,
        })
    }
}

/// Filter conditions beyond the key, as the script reads them.
#[derive(Debug, Default, Serialize)]
struct FilterArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    lock_id: Option<u64>,
    unlocked_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    live_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expired_at: Option<i64>,
}

impl From<&RecordFilter> for FilterArgs {
    fn from(filter: &RecordFilter) -> Self {
        Self {
            lock_id: filter.lock_id.map(LockId::value),
            unlocked_only: filter.unlocked_only,
            live_at: filter.live_at.map(|t| t.as_unix_millis()),
            expired_at: filter.expired_at.map(|t| t.as_unix_millis()),
        }
    }
}

/// Field assignments, as the script reads them. Absent fields are left alone.
#[derive(Debug, Default, Serialize)]
struct UpdateArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    locked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lock_acquired_at: Option<i64>,
    increment_lock_id: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pending_action: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    item_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
}

impl From<&RecordUpdate> for UpdateArgs {
    fn from(update: &RecordUpdate) -> Self {
        Self {
            locked: update.locked,
            lock_acquired_at: update.lock_acquired_at.map(|t| t.as_unix_millis()),
            increment_lock_id: update.increment_lock_id,
            pending_action: update.pending_action.map(SessionStateActions::as_code),
            payload: update.payload.as_ref().map(|p| hex::encode(p.bytes())),
            item_count: update.payload.as_ref().map(SessionPayload::item_count),
            expires_at: update.expires_at.map(|t| t.as_unix_millis()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ScriptMode {
    Match,
    Delete,
    Before,
    After,
}

impl ScriptMode {
    fn as_str(&self) -> &'static str {
        match self {
            ScriptMode::Match => "match",
            ScriptMode::Delete => "delete",
            ScriptMode::Before => "before",
            ScriptMode::After => "after",
        }
    }
}

impl From<ReturnDocument> for ScriptMode {
    fn from(value: ReturnDocument) -> Self {
        match value {
            ReturnDocument::Before => ScriptMode::Before,
            ReturnDocument::After => ScriptMode::After,
        }
    }
}

/// Redis-backed session collection.
#[derive(Clone)]
pub struct RedisSessionCollection {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisSessionCollection {
    /// Create a collection storing records under `prefix`.
    pub fn new(conn: MultiplexedConnection, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    /// Open a multiplexed connection to `url`.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, CollectionError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(unavailable)?;
        Ok(Self::new(conn, prefix))
    }

    fn redis_key(&self, key: &SessionKey) -> String {
        document_key(&self.prefix, key)
    }

    async fn run_script(
        &self,
        filter: &RecordFilter,
        mode: ScriptMode,
        update: Option<&RecordUpdate>,
    ) -> Result<Option<SessionRecord>, CollectionError> {
        let filter_json = serde_json::to_string(&FilterArgs::from(filter))
            .map_err(|e| CollectionError::Serialization(e.to_string()))?;
        let update_json = match update {
            Some(update) => serde_json::to_string(&UpdateArgs::from(update))
                .map_err(|e| CollectionError::Serialization(e.to_string()))?,
            None => "{}".to_string(),
        };

        let mut conn = self.conn.clone();
        let raw: Option<String> = FIND_AND_MODIFY
            .key(self.redis_key(&filter.key))
            .arg(filter_json)
            .arg(mode.as_str())
            .arg(update_json)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        raw.map(|raw| decode_document(&raw)).transpose()
    }
}

#[async_trait]
impl SessionCollection for RedisSessionCollection {
    async fn find_one(&self, filter: &RecordFilter) -> Result<Option<SessionRecord>, CollectionError> {
        self.run_script(filter, ScriptMode::Match, None).await
    }

    async fn find_one_and_update(
        &self,
        filter: &RecordFilter,
        update: &RecordUpdate,
        return_document: ReturnDocument,
    ) -> Result<Option<SessionRecord>, CollectionError> {
        self.run_script(filter, return_document.into(), Some(update))
            .await
    }

    async fn update_one(
        &self,
        filter: &RecordFilter,
        update: &RecordUpdate,
    ) -> Result<u64, CollectionError> {
        let matched = self
            .run_script(filter, ScriptMode::Before, Some(update))
            .await?;
        Ok(u64::from(matched.is_some()))
    }

    async fn insert_one(&self, record: &SessionRecord) -> Result<(), CollectionError> {
        let json = serde_json::to_string(&RedisDocument::from(record))
            .map_err(|e| CollectionError::Serialization(e.to_string()))?;

        let mut conn = self.conn.clone();
        let stored: Option<String> = redis::cmd("SET")
            .arg(self.redis_key(&record.key))
            .arg(json)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        match stored {
            Some(_) => Ok(()),
            None => Err(CollectionError::Duplicate(record.key.to_string())),
        }
    }

    async fn replace_one(&self, record: &SessionRecord) -> Result<(), CollectionError> {
        let json = serde_json::to_string(&RedisDocument::from(record))
            .map_err(|e| CollectionError::Serialization(e.to_string()))?;

        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(self.redis_key(&record.key))
            .arg(json)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn delete_many(&self, filter: &RecordFilter) -> Result<u64, CollectionError> {
        let deleted = self.run_script(filter, ScriptMode::Delete, None).await?;
        Ok(u64::from(deleted.is_some()))
    }

    async fn ensure_index(&self, index: &IndexSpec) -> Result<(), CollectionError> {
        // Records are addressed by key; lock id checks run inside the script.
        tracing::debug!(index = %index.name(), prefix = %self.prefix, "Redis needs no secondary index");
        Ok(())
    }
}

impl std::fmt::Debug for RedisSessionCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSessionCollection")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

fn unavailable(e: redis::RedisError) -> CollectionError {
    tracing::warn!(error = %e, "Redis session collection call failed");
    CollectionError::Unavailable(e.to_string())
}

/// `{prefix}:{len}:{application_path}:{id}`; the length keeps keys
/// unambiguous when the application path itself contains `:`.
fn document_key(prefix: &str, key: &SessionKey) -> String {
    let path = key.application_path.as_str();
    format!("{}:{}:{}:{}", prefix, path.len(), path, key.id)
}

fn decode_document(raw: &str) -> Result<SessionRecord, CollectionError> {
    let doc: RedisDocument = serde_json::from_str(raw)
        .map_err(|e| CollectionError::Serialization(format!("Invalid session document: {}", e)))?;
    doc.try_into()
}
