//! In-Memory Session Collection Adapter
//!
//! Stores session records in a process-local map. Every operation runs
//! under one write guard, which gives `find_one_and_update` the same
//! per-record atomicity a document database provides.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::session_state::{
    RecordFilter, RecordUpdate, ReturnDocument, SessionKey, SessionRecord,
};
use crate::ports::{CollectionError, IndexSpec, SessionCollection};

/// In-memory collection of session records.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionCollection {
    records: Arc<RwLock<HashMap<SessionKey, SessionRecord>>>,
    indexes: Arc<RwLock<HashSet<IndexSpec>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemorySessionCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all stored records (useful for tests)
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }

    /// Get the number of stored records, expired ones included.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Get a copy of the stored record for `key`, ignoring expiry.
    pub async fn snapshot(&self, key: &SessionKey) -> Option<SessionRecord> {
        self.records.read().await.get(key).cloned()
    }

    /// Indexes created so far.
    pub async fn indexes(&self) -> Vec<IndexSpec> {
        self.indexes.read().await.iter().cloned().collect()
    }

    /// Make every subsequent operation fail as if the backend were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), CollectionError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CollectionError::Unavailable(
                "in-memory collection marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionCollection for InMemorySessionCollection {
    async fn find_one(&self, filter: &RecordFilter) -> Result<Option<SessionRecord>, CollectionError> {
        self.check_available()?;
        let records = self.records.read().await;
        Ok(records
            .get(&filter.key)
            .filter(|record| filter.matches(record))
            .cloned())
    }

    async fn find_one_and_update(
        &self,
        filter: &RecordFilter,
        update: &RecordUpdate,
        return_document: ReturnDocument,
    ) -> Result<Option<SessionRecord>, CollectionError> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&filter.key) else {
            return Ok(None);
        };
        if !filter.matches(record) {
            return Ok(None);
        }

        let before = record.clone();
        update.apply(record);

        Ok(Some(match return_document {
            ReturnDocument::Before => before,
            ReturnDocument::After => record.clone(),
        }))
    }

    async fn update_one(
        &self,
        filter: &RecordFilter,
        update: &RecordUpdate,
    ) -> Result<u64, CollectionError> {
        self.check_available()?;
        let mut records = self.records.write().await;
        match records.get_mut(&filter.key) {
            Some(record) if filter.matches(record) => {
                update.apply(record);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn insert_one(&self, record: &SessionRecord) -> Result<(), CollectionError> {
        self.check_available()?;
        let mut records = self.records.write().await;
        if records.contains_key(&record.key) {
            return Err(CollectionError::Duplicate(record.key.to_string()));
        }
        records.insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn replace_one(&self, record: &SessionRecord) -> Result<(), CollectionError> {
        self.check_available()?;
        self.records
            .write()
            .await
            .insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn delete_many(&self, filter: &RecordFilter) -> Result<u64, CollectionError> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let matched = records
            .get(&filter.key)
            .map(|record| filter.matches(record))
            .unwrap_or(false);
        if matched {
            records.remove(&filter.key);
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn ensure_index(&self, index: &IndexSpec) -> Result<(), CollectionError> {
        self.check_available()?;
        self.indexes.write().await.insert(index.clone());
        Ok(())
    }
}
