//! Session collection port - the document store the session state store runs on.
//!
//! Each method is one round trip against a single collection. The store's
//! lock protocol relies on two guarantees from every implementation:
//!
//! - `find_one_and_update` evaluates the filter and applies the mutation as
//!   one atomic step per record; no other writer may interleave.
//! - Filters and updates behave exactly like [`RecordFilter::matches`] and
//!   [`RecordUpdate::apply`].

use async_trait::async_trait;
use std::fmt;

use crate::domain::session_state::{RecordFilter, RecordUpdate, ReturnDocument, SessionRecord};

/// Errors raised by a collection backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollectionError {
    /// The backend could not be reached or rejected the operation.
    #[error("Collection unavailable: {0}")]
    Unavailable(String),

    /// A stored document could not be mapped to or from a record.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An insert collided with an existing record.
    #[error("Duplicate record: {0}")]
    Duplicate(String),
}

/// Record fields an index can cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordField {
    ApplicationPath,
    Id,
    LockId,
}

impl RecordField {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordField::ApplicationPath => "application_path",
            RecordField::Id => "id",
            RecordField::LockId => "lock_id",
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An ordered, composite index over record fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexSpec {
    pub fields: Vec<RecordField>,
}

impl IndexSpec {
    pub fn new(fields: impl IntoIterator<Item = RecordField>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// The lookup index every read path uses.
    pub fn by_key() -> Self {
        Self::new([RecordField::ApplicationPath, RecordField::Id])
    }

    /// The index fenced writes (release, remove) use.
    pub fn by_key_and_lock() -> Self {
        Self::new([RecordField::ApplicationPath, RecordField::Id, RecordField::LockId])
    }

    /// Conventional index name, e.g. `application_path_1_id_1`.
    pub fn name(&self) -> String {
        self.fields
            .iter()
            .map(|f| format!("{}_1", f.as_str()))
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// Port for the collection holding session records.
#[async_trait]
pub trait SessionCollection: Send + Sync {
    /// Return the record matching `filter`, if any.
    async fn find_one(&self, filter: &RecordFilter) -> Result<Option<SessionRecord>, CollectionError>;

    /// Atomically apply `update` to the record matching `filter`.
    ///
    /// Returns the record as it was before or after the update, or `None`
    /// when nothing matched (in which case nothing was written).
    async fn find_one_and_update(
        &self,
        filter: &RecordFilter,
        update: &RecordUpdate,
        return_document: ReturnDocument,
    ) -> Result<Option<SessionRecord>, CollectionError>;

    /// Apply `update` to the record matching `filter`.
    ///
    /// Returns the number of records matched (0 or 1).
    async fn update_one(
        &self,
        filter: &RecordFilter,
        update: &RecordUpdate,
    ) -> Result<u64, CollectionError>;

    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// `Duplicate` if a record with the same key already exists.
    async fn insert_one(&self, record: &SessionRecord) -> Result<(), CollectionError>;

    /// Store `record`, overwriting any record with the same key.
    async fn replace_one(&self, record: &SessionRecord) -> Result<(), CollectionError>;

    /// Delete every record matching `filter`, returning how many were removed.
    async fn delete_many(&self, filter: &RecordFilter) -> Result<u64, CollectionError>;

    /// Create `index` if it does not exist yet.
    async fn ensure_index(&self, index: &IndexSpec) -> Result<(), CollectionError>;
}
