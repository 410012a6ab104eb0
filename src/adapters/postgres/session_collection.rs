//! PostgreSQL implementation of SessionCollection.
//!
//! Each record is one row keyed by `(application_path, id)`. The atomic
//! read-modify-write the lock protocol needs maps onto a single `UPDATE`:
//! row locks taken by the statement serialize concurrent acquirers, and a
//! waiter re-checks the filter against the committed row before updating.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};

use crate::config::StoreConfig;
use crate::domain::foundation::Timestamp;
use crate::domain::session_state::{
    ApplicationPath, LockId, RecordFilter, RecordUpdate, ReturnDocument, SessionKey,
    SessionPayload, SessionRecord, SessionStateActions, SessionStateId,
};
use crate::ports::{CollectionError, IndexSpec, SessionCollection};

const COLUMNS: [&str; 11] = [
    "application_path",
    "id",
    "payload",
    "item_count",
    "created_at",
    "expires_at",
    "lock_acquired_at",
    "locked",
    "lock_id",
    "pending_action",
    "timeout_minutes",
];

/// PostgreSQL implementation of SessionCollection.
#[derive(Clone)]
pub struct PostgresSessionCollection {
    pool: PgPool,
    table: String,
}

impl PostgresSessionCollection {
    /// Creates a collection over `table`.
    ///
    /// `table` is interpolated into SQL and must be a plain identifier;
    /// [`StoreConfig::validate`] enforces that for configured names.
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    /// Opens a pool for `config` and makes sure the table exists.
    pub async fn connect(config: &StoreConfig, url: &str) -> Result<Self, CollectionError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(url)
            .await
            .map_err(|e| unavailable("connect", e))?;

        let collection = Self::new(pool, config.collection.clone());
        collection.create_table_if_missing().await?;
        Ok(collection)
    }

    /// Creates the backing table when it does not exist yet.
    pub async fn create_table_if_missing(&self) -> Result<(), CollectionError> {
        sqlx::query(&create_table_sql(&self.table))
            .execute(&self.pool)
            .await
            .map_err(|e| unavailable("create table", e))?;
        Ok(())
    }

    async fn update_returning(
        &self,
        filter: &RecordFilter,
        update: &RecordUpdate,
        return_document: ReturnDocument,
    ) -> Result<Option<SessionRecord>, CollectionError> {
        let mut qb = QueryBuilder::<Postgres>::new("");
        match return_document {
            ReturnDocument::After => {
                qb.push(format!("UPDATE {} AS s", self.table));
                push_set(&mut qb, update);
                push_filter(&mut qb, filter);
                qb.push(format!(" RETURNING {}", column_list("s.")));
            }
            ReturnDocument::Before => {
                qb.push(format!("UPDATE {} AS s", self.table));
                push_set(&mut qb, update);
                qb.push(format!(
                    " FROM (SELECT {} FROM {}",
                    column_list(""),
                    self.table
                ));
                push_filter(&mut qb, filter);
                qb.push(" FOR UPDATE) AS prev");
                qb.push(" WHERE s.application_path = prev.application_path AND s.id = prev.id");
                qb.push(format!(" RETURNING {}", column_list("prev.")));
            }
        }

        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| unavailable("find and update", e))?;

        row.map(row_to_record).transpose()
    }
}

#[async_trait]
impl SessionCollection for PostgresSessionCollection {
    async fn find_one(&self, filter: &RecordFilter) -> Result<Option<SessionRecord>, CollectionError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM {}",
            column_list(""),
            self.table
        ));
        push_filter(&mut qb, filter);

        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| unavailable("find", e))?;

        row.map(row_to_record).transpose()
    }

    async fn find_one_and_update(
        &self,
        filter: &RecordFilter,
        update: &RecordUpdate,
        return_document: ReturnDocument,
    ) -> Result<Option<SessionRecord>, CollectionError> {
        if update.is_empty() {
            return self.find_one(filter).await;
        }
        self.update_returning(filter, update, return_document).await
    }

    async fn update_one(
        &self,
        filter: &RecordFilter,
        update: &RecordUpdate,
    ) -> Result<u64, CollectionError> {
        if update.is_empty() {
            return Ok(u64::from(self.find_one(filter).await?.is_some()));
        }

        let mut qb = QueryBuilder::<Postgres>::new(format!("UPDATE {} AS s", self.table));
        push_set(&mut qb, update);
        push_filter(&mut qb, filter);

        let result = qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| unavailable("update", e))?;

        Ok(result.rows_affected())
    }

    async fn insert_one(&self, record: &SessionRecord) -> Result<(), CollectionError> {
        let mut qb = insert_query(&self.table, record);

        match qb.build().execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(CollectionError::Duplicate(record.key.to_string()))
            }
            Err(e) => Err(unavailable("insert", e)),
        }
    }

    async fn replace_one(&self, record: &SessionRecord) -> Result<(), CollectionError> {
        let mut qb = insert_query(&self.table, record);
        qb.push(upsert_clause());

        qb.build()
            .execute(&self.pool)
            .await
            .map_err(|e| unavailable("replace", e))?;
        Ok(())
    }

    async fn delete_many(&self, filter: &RecordFilter) -> Result<u64, CollectionError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("DELETE FROM {} AS s", self.table));
        push_filter(&mut qb, filter);

        let result = qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| unavailable("delete", e))?;

        Ok(result.rows_affected())
    }

    async fn ensure_index(&self, index: &IndexSpec) -> Result<(), CollectionError> {
        sqlx::query(&create_index_sql(&self.table, index))
            .execute(&self.pool)
            .await
            .map_err(|e| unavailable("create index", e))?;
        Ok(())
    }
}

impl std::fmt::Debug for PostgresSessionCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSessionCollection")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Helper functions
// ════════════════════════════════════════════════════════════════════════════

fn unavailable(operation: &str, e: sqlx::Error) -> CollectionError {
    tracing::warn!(operation, error = %e, "PostgreSQL session collection call failed");
    CollectionError::Unavailable(format!("Failed to {} session record: {}", operation, e))
}

fn column_list(prefix: &str) -> String {
    COLUMNS
        .iter()
        .map(|c| format!("{}{}", prefix, c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn create_table_sql(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            application_path TEXT NOT NULL,
            id TEXT NOT NULL,
            payload BYTEA NOT NULL,
            item_count INTEGER NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL,
            lock_acquired_at TIMESTAMPTZ NOT NULL,
            locked BOOLEAN NOT NULL,
            lock_id BIGINT NOT NULL,
            pending_action SMALLINT NOT NULL,
            timeout_minutes INTEGER NOT NULL,
            PRIMARY KEY (application_path, id)
        )
        "#
    )
}

fn create_index_sql(table: &str, index: &IndexSpec) -> String {
    let columns = index
        .fields
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE INDEX IF NOT EXISTS ix_{}_{} ON {} ({})",
        table,
        index.name(),
        table,
        columns
    )
}

fn insert_query<'a>(table: &str, record: &'a SessionRecord) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new(format!(
        "INSERT INTO {} ({}) ",
        table,
        column_list("")
    ));
    qb.push_values(std::iter::once(record), |mut b, r| {
        b.push_bind(r.key.application_path.as_str().to_owned())
            .push_bind(r.key.id.as_str().to_owned())
            .push_bind(r.payload.bytes().to_vec())
            .push_bind(i32_from(r.payload.item_count()))
            .push_bind(*r.created_at.as_datetime())
            .push_bind(*r.expires_at.as_datetime())
            .push_bind(*r.lock_acquired_at.as_datetime())
            .push_bind(r.locked)
            .push_bind(i64_from(r.lock_id.value()))
            .push_bind(r.pending_action.as_code())
            .push_bind(i32_from(r.timeout_minutes));
    });
    qb
}

/// Overwrites every non-key column of a conflicting row.
fn upsert_clause() -> String {
    let assignments = COLUMNS[2..]
        .iter()
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(" ON CONFLICT (application_path, id) DO UPDATE SET {}", assignments)
}

/// Appends ` WHERE ...` for `filter`; columns are unqualified.
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &RecordFilter) {
    qb.push(" WHERE application_path = ")
        .push_bind(filter.key.application_path.as_str().to_owned());
    qb.push(" AND id = ")
        .push_bind(filter.key.id.as_str().to_owned());
    if let Some(lock_id) = filter.lock_id {
        qb.push(" AND lock_id = ").push_bind(i64_from(lock_id.value()));
    }
    if filter.unlocked_only {
        qb.push(" AND locked = FALSE");
    }
    if let Some(now) = filter.live_at {
        qb.push(" AND expires_at > ").push_bind(*now.as_datetime());
    }
    if let Some(now) = filter.expired_at {
        qb.push(" AND expires_at <= ").push_bind(*now.as_datetime());
    }
}

/// Appends ` SET ...` for a non-empty `update` against the row aliased `s`.
fn push_set(qb: &mut QueryBuilder<'_, Postgres>, update: &RecordUpdate) {
    qb.push(" SET ");
    let mut set = qb.separated(", ");
    if let Some(locked) = update.locked {
        set.push("locked = ").push_bind_unseparated(locked);
    }
    if let Some(at) = update.lock_acquired_at {
        set.push("lock_acquired_at = ")
            .push_bind_unseparated(*at.as_datetime());
    }
    if update.increment_lock_id {
        set.push("lock_id = s.lock_id + 1");
    }
    if let Some(action) = update.pending_action {
        set.push("pending_action = ")
            .push_bind_unseparated(action.as_code());
    }
    if let Some(payload) = &update.payload {
        set.push("payload = ")
            .push_bind_unseparated(payload.bytes().to_vec());
        set.push("item_count = ")
            .push_bind_unseparated(i32_from(payload.item_count()));
    }
    if let Some(at) = update.expires_at {
        set.push("expires_at = ").push_bind_unseparated(*at.as_datetime());
    }
}

fn i64_from(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn i32_from(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, CollectionError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name).map_err(|e| {
        CollectionError::Serialization(format!("Failed to get {}: {}", name, e))
    })
}

fn row_to_record(row: PgRow) -> Result<SessionRecord, CollectionError> {
    let application_path: String = column(&row, "application_path")?;
    let id: String = column(&row, "id")?;
    let payload: Vec<u8> = column(&row, "payload")?;
    let item_count: i32 = column(&row, "item_count")?;
    let created_at: chrono::DateTime<chrono::Utc> = column(&row, "created_at")?;
    let expires_at: chrono::DateTime<chrono::Utc> = column(&row, "expires_at")?;
    let lock_acquired_at: chrono::DateTime<chrono::Utc> = column(&row, "lock_acquired_at")?;
    let locked: bool = column(&row, "locked")?;
    let lock_id: i64 = column(&row, "lock_id")?;
    let pending_action: i16 = column(&row, "pending_action")?;
    let timeout_minutes: i32 = column(&row, "timeout_minutes")?;

    let invalid = |e: crate::domain::foundation::ValidationError| {
        CollectionError::Serialization(format!("Invalid stored record: {}", e))
    };

    Ok(SessionRecord {
        key: SessionKey::new(
            ApplicationPath::new(application_path).map_err(invalid)?,
            SessionStateId::new(id).map_err(invalid)?,
        ),
        payload: SessionPayload::new(payload, item_count.max(0) as u32),
        created_at: Timestamp::from_datetime(created_at),
        expires_at: Timestamp::from_datetime(expires_at),
        lock_acquired_at: Timestamp::from_datetime(lock_acquired_at),
        locked,
        lock_id: LockId::new(lock_id.max(0) as u64),
        pending_action: SessionStateActions::from_code(pending_action).map_err(invalid)?,
        timeout_minutes: timeout_minutes.max(0) as u32,
    })
}
