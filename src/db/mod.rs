//! Durable storage engine for inspections, photos, settings and the sync queue.
//!
//! [`Database`] is the single owned engine handle. It is opened once (or
//! lazily through [`LazyDatabase`]) and shared by `Arc` with the record store
//! and the sync queue. Each call locks the engine for the duration of one
//! atomic operation, so concurrent callers are serialized here.

mod backend;
pub mod inspections;
pub mod memory;
pub mod photos;
pub mod queue;
mod schema;
pub mod sqlite;

use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;

pub use backend::StorageBackend;
pub use inspections::{Inspection, InspectionType};
pub use photos::{sort_newest_first, AiFinding, AiStatus, Bilingual, Photo};
pub use queue::{queue_item_id, QueueItem};

use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};
use memory::MemoryDb;
use sqlite::SqliteDb;

/// Format a timestamp for storage: fixed-width RFC 3339 with nanoseconds, so
/// values round-trip exactly and sort lexically in time order.
pub fn to_db_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn from_db_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

/// Macro to dispatch a method call to the active backend variant.
macro_rules! dispatch {
    ($self:expr, $method:ident($($arg:expr),* $(,)?)) => {{
        let mut guard = $self.lock()?;
        match &mut *guard {
            DatabaseInner::Sqlite(db) => db.$method($($arg),*),
            DatabaseInner::Memory(db) => db.$method($($arg),*),
        }
    }};
}

enum DatabaseInner {
    Sqlite(SqliteDb),
    Memory(MemoryDb),
}

pub struct Database {
    inner: Mutex<DatabaseInner>,
    degraded: bool,
    /// Set while a sync drain over this engine's queue is running.
    drain_in_flight: AtomicBool,
}

impl Database {
    /// Open and initialize the on-disk database.
    pub fn open(config: &DatabaseConfig) -> StoreResult<Self> {
        let mut db = SqliteDb::open(&config.sqlite_path)?;
        db.initialize()?;
        Ok(Self {
            inner: Mutex::new(DatabaseInner::Sqlite(db)),
            degraded: false,
            drain_in_flight: AtomicBool::new(false),
        })
    }

    /// Open the on-disk database, falling back to a memory-only engine for
    /// this session when that fails and the config allows it.
    pub fn open_or_degraded(config: &DatabaseConfig) -> StoreResult<Self> {
        match Self::open(config) {
            Ok(db) => Ok(db),
            Err(e) if config.fallback_to_memory => {
                tracing::warn!(
                    path = %config.sqlite_path.display(),
                    error = %e,
                    "Database unavailable, continuing memory-only for this session"
                );
                Ok(Self {
                    inner: Mutex::new(DatabaseInner::Memory(MemoryDb::new())),
                    degraded: true,
                    drain_in_flight: AtomicBool::new(false),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Fresh in-memory engine. Not degraded: used where persistence is not wanted.
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(DatabaseInner::Memory(MemoryDb::new())),
            degraded: false,
            drain_in_flight: AtomicBool::new(false),
        }
    }

    /// True when running memory-only because the on-disk database failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn backend_name(&self) -> &'static str {
        match self.lock() {
            Ok(guard) => match &*guard {
                DatabaseInner::Sqlite(_) => "sqlite",
                DatabaseInner::Memory(_) => "memory",
            },
            Err(_) => "unavailable",
        }
    }

    pub(crate) fn drain_flag(&self) -> &AtomicBool {
        &self.drain_in_flight
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, DatabaseInner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::StorageFailure("storage engine lock poisoned".to_string()))
    }

    /// Run a synchronous engine operation on the blocking pool.
    pub(crate) async fn call<T, F>(self: &Arc<Self>, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
    {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    // ========================================================================
    // Inspections
    // ========================================================================

    pub fn put_inspection(&self, inspection: &Inspection) -> StoreResult<()> {
        dispatch!(self, put_inspection(inspection))
    }

    pub fn get_inspection(&self, id: &str) -> StoreResult<Option<Inspection>> {
        dispatch!(self, get_inspection(id))
    }

    pub fn most_recent_inspection(&self) -> StoreResult<Option<Inspection>> {
        dispatch!(self, most_recent_inspection())
    }

    pub fn list_inspections(&self) -> StoreResult<Vec<Inspection>> {
        dispatch!(self, list_inspections())
    }

    // ========================================================================
    // Photos
    // ========================================================================

    pub fn put_photo(&self, photo: &Photo) -> StoreResult<()> {
        dispatch!(self, put_photo(photo))
    }

    pub fn get_photo(&self, id: &str) -> StoreResult<Option<Photo>> {
        dispatch!(self, get_photo(id))
    }

    pub fn delete_photo(&self, id: &str) -> StoreResult<bool> {
        dispatch!(self, delete_photo(id))
    }

    pub fn photos_by_inspection(&self, inspection_id: &str) -> StoreResult<Vec<Photo>> {
        dispatch!(self, photos_by_inspection(inspection_id))
    }

    pub fn photo_owners(&self) -> StoreResult<Vec<(String, String)>> {
        dispatch!(self, photo_owners())
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        dispatch!(self, get_setting(key))
    }

    pub fn put_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        dispatch!(self, put_setting(key, value))
    }

    // ========================================================================
    // Sync queue
    // ========================================================================

    pub fn queue_insert(&self, item: &QueueItem) -> StoreResult<bool> {
        dispatch!(self, queue_insert(item))
    }

    pub fn queue_get(&self, id: &str) -> StoreResult<Option<QueueItem>> {
        dispatch!(self, queue_get(id))
    }

    pub fn queue_list(&self) -> StoreResult<Vec<QueueItem>> {
        dispatch!(self, queue_list())
    }

    pub fn queue_remove(&self, id: &str) -> StoreResult<bool> {
        dispatch!(self, queue_remove(id))
    }

    pub fn queue_record_retry(&self, id: &str, at: DateTime<Utc>) -> StoreResult<Option<u32>> {
        dispatch!(self, queue_record_retry(id, at))
    }

    pub fn queue_len(&self) -> StoreResult<usize> {
        dispatch!(self, queue_len())
    }

    pub fn queue_clear(&self) -> StoreResult<usize> {
        dispatch!(self, queue_clear())
    }
}

/// Engine handle opened on first use and reused thereafter.
pub struct LazyDatabase {
    config: DatabaseConfig,
    cell: OnceCell<Arc<Database>>,
}

impl LazyDatabase {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            cell: OnceCell::new(),
        }
    }

    /// Open the engine if this is the first call. Concurrent first calls wait
    /// for a single open; a failed open is retried by the next call.
    pub async fn get(&self) -> StoreResult<Arc<Database>> {
        let db = self
            .cell
            .get_or_try_init(|| async {
                let config = self.config.clone();
                let db = tokio::task::spawn_blocking(move || Database::open_or_degraded(&config))
                    .await??;
                tracing::info!(
                    backend = db.backend_name(),
                    degraded = db.is_degraded(),
                    "Storage engine opened"
                );
                Ok::<_, StoreError>(Arc::new(db))
            })
            .await?;
        Ok(Arc::clone(db))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_round_trip_is_exact() {
        let now = Utc::now();
        let raw = to_db_timestamp(&now);
        assert_eq!(from_db_timestamp(&raw).unwrap(), now);
    }

    #[test]
    fn test_timestamp_text_sorts_chronologically() {
        let a = DateTime::parse_from_rfc3339("2024-01-01T09:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);
        let b = DateTime::parse_from_rfc3339("2024-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(to_db_timestamp(&a) < to_db_timestamp(&b));
    }

    #[test]
    fn test_unopenable_path_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let config = DatabaseConfig {
            sqlite_path: blocker.join("store.db"),
            fallback_to_memory: true,
        };
        let db = Database::open_or_degraded(&config).unwrap();
        assert!(db.is_degraded());
        assert_eq!(db.backend_name(), "memory");

        db.put_setting("language", "es").unwrap();
        assert_eq!(db.get_setting("language").unwrap(), Some("es".to_string()));
    }

    #[test]
    fn test_unopenable_path_without_fallback_is_storage_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let config = DatabaseConfig {
            sqlite_path: blocker.join("store.db"),
            fallback_to_memory: false,
        };
        assert!(matches!(
            Database::open_or_degraded(&config),
            Err(StoreError::StorageFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_lazy_database_opens_once() {
        let dir = tempfile::tempdir().unwrap();
        let lazy = LazyDatabase::new(DatabaseConfig {
            sqlite_path: dir.path().join("store.db"),
            fallback_to_memory: false,
        });

        let first = lazy.get().await.unwrap();
        let second = lazy.get().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.backend_name(), "sqlite");
    }
}
