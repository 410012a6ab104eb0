//! SessionStateStore - Exclusive-lock session storage over a document collection.
//!
//! Every coordination step is a single atomic operation in the collection,
//! so any number of store instances (across servers) may share one
//! collection. The store itself keeps no state besides its configuration.

use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::adapters::connect_collection;
use crate::config::StoreConfig;
use crate::domain::foundation::Timestamp;
use crate::domain::session_state::{
    LockId, RecordFilter, RecordUpdate, ReturnDocument, SessionKey, SessionRecord,
    SessionStateActions, SessionStateData, SessionStateError,
};
use crate::ports::{IndexSpec, SessionCollection};

/// Attempts at the conditional lock update before contention is reported.
pub const MAX_ACQUIRE_ATTEMPTS: usize = 3;

/// Outcome of a session lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLookup {
    /// No live record exists for the key.
    NotFound,

    /// Another request holds the lock.
    ///
    /// A zero `lock_age` may also mean the lock changed hands repeatedly
    /// while an exclusive lookup was retrying and the record was last seen
    /// unlocked; retrying right away is then likely to succeed.
    Locked { lock_age: Duration, lock_id: LockId },

    /// The record is readable. After an exclusive lookup the caller holds
    /// `lock_id` and must hand it back on release.
    Found {
        data: SessionStateData,
        lock_id: LockId,
        actions: SessionStateActions,
    },
}

impl SessionLookup {
    pub fn is_found(&self) -> bool {
        matches!(self, SessionLookup::Found { .. })
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, SessionLookup::Locked { .. })
    }

    /// The lock id observed (locked) or held (found).
    pub fn lock_id(&self) -> Option<LockId> {
        match self {
            SessionLookup::NotFound => None,
            SessionLookup::Locked { lock_id, .. } | SessionLookup::Found { lock_id, .. } => {
                Some(*lock_id)
            }
        }
    }

    /// How long the current holder has had the lock; zero unless locked.
    pub fn lock_age(&self) -> Duration {
        match self {
            SessionLookup::Locked { lock_age, .. } => *lock_age,
            _ => Duration::zero(),
        }
    }

    pub fn actions(&self) -> SessionStateActions {
        match self {
            SessionLookup::Found { actions, .. } => *actions,
            _ => SessionStateActions::None,
        }
    }

    pub fn data(&self) -> Option<&SessionStateData> {
        match self {
            SessionLookup::Found { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn into_data(self) -> Option<SessionStateData> {
        match self {
            SessionLookup::Found { data, .. } => Some(data),
            _ => None,
        }
    }
}

/// Session state store.
#[derive(Clone)]
pub struct SessionStateStore {
    collection: Arc<dyn SessionCollection>,
    timeout_minutes: u32,
}

impl SessionStateStore {
    /// Create a store over `collection`. `timeout_minutes` applies to touch
    /// and force release; releases use the timeout carried by the data.
    pub fn new(collection: Arc<dyn SessionCollection>, timeout_minutes: u32) -> Self {
        Self {
            collection,
            timeout_minutes,
        }
    }

    /// Validate `config`, connect the configured backend and create a store over it.
    pub async fn from_config(config: &StoreConfig) -> Result<Self, SessionStateError> {
        config
            .validate()
            .map_err(|e| SessionStateError::validation("store", e.to_string()))?;
        let collection = connect_collection(config).await?;
        Ok(Self::new(collection, config.timeout_minutes))
    }

    pub fn timeout_minutes(&self) -> u32 {
        self.timeout_minutes
    }

    /// Create the lookup indexes. Safe to call on every startup.
    #[instrument(level = "debug", skip(self))]
    pub async fn initialize(&self) -> Result<(), SessionStateError> {
        for index in [IndexSpec::by_key(), IndexSpec::by_key_and_lock()] {
            self.collection.ensure_index(&index).await?;
        }
        Ok(())
    }

    /// Read a session without taking the lock.
    pub async fn get_item(&self, key: &SessionKey) -> Result<SessionLookup, SessionStateError> {
        self.acquire_or_read(key, false).await
    }

    /// Read a session and take its lock.
    pub async fn get_item_exclusive(
        &self,
        key: &SessionKey,
    ) -> Result<SessionLookup, SessionStateError> {
        self.acquire_or_read(key, true).await
    }

    /// Look up a session, taking its lock when `exclusive` and it is free.
    ///
    /// A pending `InitializeItem` is reported through `actions` with fresh
    /// empty data; an exclusive lookup also clears it from the record.
    #[instrument(level = "debug", skip(self), fields(key = %key))]
    pub async fn acquire_or_read(
        &self,
        key: &SessionKey,
        exclusive: bool,
    ) -> Result<SessionLookup, SessionStateError> {
        if exclusive {
            return self.acquire(key).await;
        }

        match self.collection.find_one(&RecordFilter::for_key(key)).await? {
            Some(record) => self.inspect(record, Timestamp::now()).await,
            None => Ok(SessionLookup::NotFound),
        }
    }

    /// Write the session back and release the lock.
    ///
    /// With `new_item` any existing record is replaced by a fresh unlocked
    /// one. Otherwise the write only lands if `lock_id` is still current;
    /// a stale holder's write is dropped.
    #[instrument(level = "debug", skip(self, data), fields(key = %key, lock_id = %lock_id))]
    pub async fn set_and_release_item_exclusive(
        &self,
        key: &SessionKey,
        lock_id: LockId,
        data: SessionStateData,
        new_item: bool,
    ) -> Result<(), SessionStateError> {
        let now = Timestamp::now();

        if new_item {
            let record = SessionRecord::new_item(key.clone(), data, now);
            self.collection.replace_one(&record).await?;
            return Ok(());
        }

        let update = RecordUpdate::new()
            .set_expires_at(now.plus_minutes(data.timeout_minutes))
            .set_payload(data.payload)
            .set_locked(false);
        let matched = self
            .collection
            .update_one(&RecordFilter::for_key(key).with_lock_id(lock_id), &update)
            .await?;
        if matched == 0 {
            debug!("Lock id no longer current, release ignored");
        }
        Ok(())
    }

    /// Push the expiry out by the configured timeout.
    #[instrument(level = "debug", skip(self), fields(key = %key))]
    pub async fn reset_item_timeout(&self, key: &SessionKey) -> Result<(), SessionStateError> {
        let update = RecordUpdate::new()
            .set_expires_at(Timestamp::now().plus_minutes(self.timeout_minutes));
        self.collection
            .update_one(&RecordFilter::for_key(key), &update)
            .await?;
        Ok(())
    }

    /// Release the lock without writing the payload.
    #[instrument(level = "debug", skip(self), fields(key = %key, lock_id = %lock_id))]
    pub async fn release_item_exclusive(
        &self,
        key: &SessionKey,
        lock_id: LockId,
    ) -> Result<(), SessionStateError> {
        let update = RecordUpdate::new()
            .set_locked(false)
            .set_expires_at(Timestamp::now().plus_minutes(self.timeout_minutes));
        let matched = self
            .collection
            .update_one(&RecordFilter::for_key(key).with_lock_id(lock_id), &update)
            .await?;
        if matched == 0 {
            debug!("Lock id no longer current, force release ignored");
        }
        Ok(())
    }

    /// Delete the session if `lock_id` is still current.
    #[instrument(level = "debug", skip(self), fields(key = %key, lock_id = %lock_id))]
    pub async fn remove_item(
        &self,
        key: &SessionKey,
        lock_id: LockId,
    ) -> Result<(), SessionStateError> {
        let removed = self
            .collection
            .delete_many(&RecordFilter::for_key(key).with_lock_id(lock_id))
            .await?;
        if removed == 0 {
            debug!("Lock id no longer current, remove ignored");
        }
        Ok(())
    }

    /// Replace any record for `key` with an empty one whose next reader is
    /// asked to initialize the session.
    #[instrument(level = "debug", skip(self), fields(key = %key))]
    pub async fn create_uninitialized_item(
        &self,
        key: &SessionKey,
        timeout_minutes: u32,
    ) -> Result<(), SessionStateError> {
        let record = SessionRecord::uninitialized(key.clone(), timeout_minutes, Timestamp::now());
        self.collection.replace_one(&record).await?;
        Ok(())
    }

    async fn acquire(&self, key: &SessionKey) -> Result<SessionLookup, SessionStateError> {
        let mut observed = LockId::initial();

        for attempt in 1..=MAX_ACQUIRE_ATTEMPTS {
            let now = Timestamp::now();
            let filter = RecordFilter::for_key(key).unlocked().live_at(now);
            let previous = self
                .collection
                .find_one_and_update(&filter, &RecordUpdate::acquire(now), ReturnDocument::Before)
                .await?;

            if let Some(previous) = previous {
                let lock_id = previous.lock_id.next();
                let actions = previous.pending_action;
                debug!(lock_id = %lock_id, "Acquired session lock");
                return Ok(SessionLookup::Found {
                    data: previous.data_for(actions),
                    lock_id,
                    actions,
                });
            }

            let Some(record) = self.collection.find_one(&RecordFilter::for_key(key)).await? else {
                return Ok(SessionLookup::NotFound);
            };
            match self.inspect(record, Timestamp::now()).await? {
                SessionLookup::Found { lock_id, .. } => {
                    // Released between the update and the read
                    observed = lock_id;
                    debug!(attempt, "Session unlocked during acquisition, retrying");
                }
                other => return Ok(other),
            }
        }

        // Every miss found the record unlocked again; report contention and
        // let the caller's retry policy take over
        Ok(SessionLookup::Locked {
            lock_age: Duration::zero(),
            lock_id: observed,
        })
    }

    /// Classify a record read by key, evicting it if expired.
    async fn inspect(
        &self,
        record: SessionRecord,
        now: Timestamp,
    ) -> Result<SessionLookup, SessionStateError> {
        if record.is_expired(now) {
            // Only delete while still expired; a concurrent writer may have re-created it
            let evicted = self
                .collection
                .delete_many(&RecordFilter::for_key(&record.key).expired_at(now))
                .await?;
            debug!(evicted, expired_at = %record.expires_at.as_datetime(), "Evicted expired session");
            return Ok(SessionLookup::NotFound);
        }

        if record.locked {
            return Ok(SessionLookup::Locked {
                lock_age: record.lock_age(now).max(Duration::zero()),
                lock_id: record.lock_id,
            });
        }

        let actions = record.pending_action;
        Ok(SessionLookup::Found {
            data: record.data_for(actions),
            lock_id: record.lock_id,
            actions,
        })
    }
}

impl std::fmt::Debug for SessionStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStateStore")
            .field("timeout_minutes", &self.timeout_minutes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemorySessionCollection;
    use crate::domain::session_state::SessionPayload;
    use crate::ports::CollectionError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key() -> SessionKey {
        SessionKey::parse("/app", "S1").unwrap()
    }

    fn data(bytes: &[u8]) -> SessionStateData {
        SessionStateData::new(SessionPayload::new(bytes.to_vec(), 1), 20)
    }

    fn store() -> (SessionStateStore, InMemorySessionCollection) {
        let collection = InMemorySessionCollection::new();
        (SessionStateStore::new(Arc::new(collection.clone()), 20), collection)
    }

    /// Collection whose conditional update never matches, as if another
    /// request always grabbed the lock first.
    struct AlwaysBeatenCollection {
        inner: InMemorySessionCollection,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl SessionCollection for AlwaysBeatenCollection {
        async fn find_one(
            &self,
            filter: &RecordFilter,
        ) -> Result<Option<SessionRecord>, CollectionError> {
            self.inner.find_one(filter).await
        }

        async fn find_one_and_update(
            &self,
            _filter: &RecordFilter,
            _update: &RecordUpdate,
            _return_document: ReturnDocument,
        ) -> Result<Option<SessionRecord>, CollectionError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn update_one(
            &self,
            filter: &RecordFilter,
            update: &RecordUpdate,
        ) -> Result<u64, CollectionError> {
            self.inner.update_one(filter, update).await
        }

        async fn insert_one(&self, record: &SessionRecord) -> Result<(), CollectionError> {
            self.inner.insert_one(record).await
        }

        async fn replace_one(&self, record: &SessionRecord) -> Result<(), CollectionError> {
            self.inner.replace_one(record).await
        }

        async fn delete_many(&self, filter: &RecordFilter) -> Result<u64, CollectionError> {
            self.inner.delete_many(filter).await
        }

        async fn ensure_index(&self, index: &IndexSpec) -> Result<(), CollectionError> {
            self.inner.ensure_index(index).await
        }
    }

    /// Collection where another request writes the same key just before
    /// every whole-record write lands.
    struct RacingWriterCollection {
        inner: InMemorySessionCollection,
    }

    impl RacingWriterCollection {
        async fn competing_write(&self, key: &SessionKey) {
            let mut other = SessionRecord::new_item(key.clone(), data(b"OTHER"), Timestamp::now());
            other.locked = true;
            other.lock_id = LockId::new(7);
            let _ = self.inner.insert_one(&other).await;
        }
    }

    #[async_trait]
    impl SessionCollection for RacingWriterCollection {
        async fn find_one(
            &self,
            filter: &RecordFilter,
        ) -> Result<Option<SessionRecord>, CollectionError> {
            self.inner.find_one(filter).await
        }

        async fn find_one_and_update(
            &self,
            filter: &RecordFilter,
            update: &RecordUpdate,
            return_document: ReturnDocument,
        ) -> Result<Option<SessionRecord>, CollectionError> {
            self.inner
                .find_one_and_update(filter, update, return_document)
                .await
        }

        async fn update_one(
            &self,
            filter: &RecordFilter,
            update: &RecordUpdate,
        ) -> Result<u64, CollectionError> {
            self.inner.update_one(filter, update).await
        }

        async fn insert_one(&self, record: &SessionRecord) -> Result<(), CollectionError> {
            self.competing_write(&record.key).await;
            self.inner.insert_one(record).await
        }

        async fn replace_one(&self, record: &SessionRecord) -> Result<(), CollectionError> {
            self.competing_write(&record.key).await;
            self.inner.replace_one(record).await
        }

        async fn delete_many(&self, filter: &RecordFilter) -> Result<u64, CollectionError> {
            let deleted = self.inner.delete_many(filter).await?;
            self.competing_write(&filter.key).await;
            Ok(deleted)
        }

        async fn ensure_index(&self, index: &IndexSpec) -> Result<(), CollectionError> {
            self.inner.ensure_index(index).await
        }
    }

    #[tokio::test]
    async fn missing_session_is_not_found() {
        let (store, _) = store();

        assert_eq!(store.get_item(&key()).await.unwrap(), SessionLookup::NotFound);
        assert_eq!(
            store.get_item_exclusive(&key()).await.unwrap(),
            SessionLookup::NotFound
        );
    }

    #[tokio::test]
    async fn exclusive_read_increments_lock_id() {
        let (store, collection) = store();
        store
            .set_and_release_item_exclusive(&key(), LockId::initial(), data(b"P0"), true)
            .await
            .unwrap();

        let lookup = store.get_item_exclusive(&key()).await.unwrap();

        assert_eq!(lookup.lock_id(), Some(LockId::new(1)));
        assert_eq!(lookup.data().unwrap().payload.bytes(), b"P0");
        let stored = collection.snapshot(&key()).await.unwrap();
        assert!(stored.locked);
        assert_eq!(stored.lock_id, LockId::new(1));
    }

    #[tokio::test]
    async fn locked_session_reports_holder() {
        let (store, _) = store();
        store
            .set_and_release_item_exclusive(&key(), LockId::initial(), data(b"P0"), true)
            .await
            .unwrap();
        store.get_item_exclusive(&key()).await.unwrap();

        let lookup = store.get_item(&key()).await.unwrap();

        assert!(lookup.is_locked());
        assert_eq!(lookup.lock_id(), Some(LockId::new(1)));
        assert!(lookup.lock_age() >= Duration::zero());
        assert!(lookup.data().is_none());
    }

    #[tokio::test]
    async fn contention_is_reported_after_bounded_retries() {
        let inner = InMemorySessionCollection::new();
        let collection = Arc::new(AlwaysBeatenCollection {
            inner: inner.clone(),
            attempts: AtomicUsize::new(0),
        });
        let store = SessionStateStore::new(collection.clone(), 20);
        store
            .set_and_release_item_exclusive(&key(), LockId::initial(), data(b"P0"), true)
            .await
            .unwrap();

        let lookup = store.get_item_exclusive(&key()).await.unwrap();

        assert_eq!(
            lookup,
            SessionLookup::Locked {
                lock_age: Duration::zero(),
                lock_id: LockId::initial(),
            }
        );
        assert_eq!(collection.attempts.load(Ordering::SeqCst), MAX_ACQUIRE_ATTEMPTS);
    }

    #[tokio::test]
    async fn release_with_current_lock_id_writes_and_unlocks() {
        let (store, collection) = store();
        store
            .set_and_release_item_exclusive(&key(), LockId::initial(), data(b"P0"), true)
            .await
            .unwrap();
        let lock_id = store.get_item_exclusive(&key()).await.unwrap().lock_id().unwrap();

        store
            .set_and_release_item_exclusive(&key(), lock_id, data(b"P1"), false)
            .await
            .unwrap();

        let stored = collection.snapshot(&key()).await.unwrap();
        assert!(!stored.locked);
        assert_eq!(stored.payload.bytes(), b"P1");
        assert_eq!(stored.lock_id, lock_id);
    }

    #[tokio::test]
    async fn new_item_release_replaces_locked_record() {
        let (store, collection) = store();
        store
            .set_and_release_item_exclusive(&key(), LockId::initial(), data(b"P0"), true)
            .await
            .unwrap();
        store.get_item_exclusive(&key()).await.unwrap();

        store
            .set_and_release_item_exclusive(&key(), LockId::new(9), data(b"P1"), true)
            .await
            .unwrap();

        let stored = collection.snapshot(&key()).await.unwrap();
        assert!(!stored.locked);
        assert_eq!(stored.lock_id, LockId::initial());
        assert_eq!(stored.payload.bytes(), b"P1");
        assert_eq!(collection.record_count().await, 1);
    }

    #[tokio::test]
    async fn new_item_release_wins_over_concurrent_writer() {
        let inner = InMemorySessionCollection::new();
        let store = SessionStateStore::new(
            Arc::new(RacingWriterCollection {
                inner: inner.clone(),
            }),
            20,
        );

        store
            .set_and_release_item_exclusive(&key(), LockId::initial(), data(b"P1"), true)
            .await
            .unwrap();

        let stored = inner.snapshot(&key()).await.unwrap();
        assert_eq!(stored.payload.bytes(), b"P1");
        assert!(!stored.locked);
        assert_eq!(stored.lock_id, LockId::initial());
    }

    #[tokio::test]
    async fn uninitialized_item_wins_over_concurrent_writer() {
        let inner = InMemorySessionCollection::new();
        let store = SessionStateStore::new(
            Arc::new(RacingWriterCollection {
                inner: inner.clone(),
            }),
            20,
        );

        store.create_uninitialized_item(&key(), 5).await.unwrap();

        let stored = inner.snapshot(&key()).await.unwrap();
        assert_eq!(stored.pending_action, SessionStateActions::InitializeItem);
        assert!(stored.payload.is_empty());
        assert!(!stored.locked);
    }

    #[tokio::test]
    async fn from_config_rejects_invalid_store_config() {
        let config = StoreConfig {
            collection: "x; DROP TABLE y".to_string(),
            ..Default::default()
        };
        let err = SessionStateStore::from_config(&config).await.unwrap_err();
        assert!(matches!(err, SessionStateError::Validation { ref field, .. } if field == "store"));

        let config = StoreConfig {
            timeout_minutes: 0,
            ..Default::default()
        };
        assert!(matches!(
            SessionStateStore::from_config(&config).await,
            Err(SessionStateError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn from_config_builds_store_for_valid_config() {
        let config = StoreConfig {
            timeout_minutes: 45,
            ..Default::default()
        };

        let store = SessionStateStore::from_config(&config).await.unwrap();

        assert_eq!(store.timeout_minutes(), 45);
        assert_eq!(store.get_item(&key()).await.unwrap(), SessionLookup::NotFound);
    }

    #[tokio::test]
    async fn initialize_creates_both_indexes() {
        let (store, collection) = store();

        store.initialize().await.unwrap();
        store.initialize().await.unwrap();

        let indexes = collection.indexes().await;
        assert_eq!(indexes.len(), 2);
        assert!(indexes.contains(&IndexSpec::by_key()));
        assert!(indexes.contains(&IndexSpec::by_key_and_lock()));
    }

    #[tokio::test]
    async fn unavailable_collection_is_storage_error() {
        let (store, collection) = store();
        collection.set_unavailable(true);

        let err = store.get_item(&key()).await.unwrap_err();

        assert!(matches!(
            err,
            SessionStateError::Storage(CollectionError::Unavailable(_))
        ));
    }

    #[test]
    fn lookup_accessors_default_outside_found() {
        let lookup = SessionLookup::NotFound;

        assert!(!lookup.is_found());
        assert!(!lookup.is_locked());
        assert_eq!(lookup.lock_id(), None);
        assert_eq!(lookup.lock_age(), Duration::zero());
        assert_eq!(lookup.actions(), SessionStateActions::None);
        assert!(lookup.into_data().is_none());
    }
}
