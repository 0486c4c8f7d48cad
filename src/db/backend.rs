//! Storage engine abstraction.
//!
//! Both the SQLite engine and the in-memory engine implement this trait.
//! Every method is one atomic operation: it either completes fully or leaves
//! the engine unchanged. Nothing here spans more than one entity.

use chrono::{DateTime, Utc};

use super::{Inspection, Photo, QueueItem};
use crate::error::StoreResult;

pub trait StorageBackend: Send {
    // === Lifecycle ===

    /// Create tables and indexes if they do not exist yet.
    fn initialize(&mut self) -> StoreResult<()>;

    // === Inspections ===

    /// Insert or replace the inspection with the same id.
    fn put_inspection(&mut self, inspection: &Inspection) -> StoreResult<()>;

    fn get_inspection(&self, id: &str) -> StoreResult<Option<Inspection>>;

    /// Inspection with the greatest creation time, ties broken by id descending.
    fn most_recent_inspection(&self) -> StoreResult<Option<Inspection>>;

    /// All inspections, newest first.
    fn list_inspections(&self) -> StoreResult<Vec<Inspection>>;

    // === Photos ===

    fn put_photo(&mut self, photo: &Photo) -> StoreResult<()>;

    fn get_photo(&self, id: &str) -> StoreResult<Option<Photo>>;

    /// Returns true if a row was removed.
    fn delete_photo(&mut self, id: &str) -> StoreResult<bool>;

    fn photos_by_inspection(&self, inspection_id: &str) -> StoreResult<Vec<Photo>>;

    /// `(photo id, inspection id)` for every stored photo.
    fn photo_owners(&self) -> StoreResult<Vec<(String, String)>>;

    // === Settings ===

    fn get_setting(&self, key: &str) -> StoreResult<Option<String>>;

    fn put_setting(&mut self, key: &str, value: &str) -> StoreResult<()>;

    // === Sync queue ===

    /// Insert unless an item with the same id exists. Returns true if inserted.
    fn queue_insert(&mut self, item: &QueueItem) -> StoreResult<bool>;

    fn queue_get(&self, id: &str) -> StoreResult<Option<QueueItem>>;

    fn queue_list(&self) -> StoreResult<Vec<QueueItem>>;

    /// Returns true if an item was removed.
    fn queue_remove(&mut self, id: &str) -> StoreResult<bool>;

    /// Increment the retry count and stamp the retry time.
    /// Returns the new count, or `None` if the item does not exist.
    fn queue_record_retry(&mut self, id: &str, at: DateTime<Utc>) -> StoreResult<Option<u32>>;

    fn queue_len(&self) -> StoreResult<usize>;

    /// Remove every item. Returns how many were removed.
    fn queue_clear(&mut self) -> StoreResult<usize>;
}
