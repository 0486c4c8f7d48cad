//! In-memory backend.
//!
//! Backs unit tests and the degraded memory-only mode used when the on-disk
//! database cannot be opened. Nothing here survives the process.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::backend::StorageBackend;
use super::{Inspection, Photo, QueueItem};
use crate::error::StoreResult;

#[derive(Debug, Default)]
pub struct MemoryDb {
    inspections: HashMap<String, Inspection>,
    photos: HashMap<String, Photo>,
    settings: HashMap<String, String>,
    queue: HashMap<String, QueueItem>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Newest first, ties broken by id descending (matches the SQL ordering).
fn newest_first(a: &Inspection, b: &Inspection) -> std::cmp::Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

impl StorageBackend for MemoryDb {
    fn initialize(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn put_inspection(&mut self, inspection: &Inspection) -> StoreResult<()> {
        self.inspections
            .insert(inspection.id.clone(), inspection.clone());
        Ok(())
    }

    fn get_inspection(&self, id: &str) -> StoreResult<Option<Inspection>> {
        Ok(self.inspections.get(id).cloned())
    }

    fn most_recent_inspection(&self) -> StoreResult<Option<Inspection>> {
        Ok(self
            .inspections
            .values()
            .min_by(|a, b| newest_first(a, b))
            .cloned())
    }

    fn list_inspections(&self) -> StoreResult<Vec<Inspection>> {
        let mut all: Vec<Inspection> = self.inspections.values().cloned().collect();
        all.sort_by(newest_first);
        Ok(all)
    }

    fn put_photo(&mut self, photo: &Photo) -> StoreResult<()> {
        self.photos.insert(photo.id.clone(), photo.clone());
        Ok(())
    }

    fn get_photo(&self, id: &str) -> StoreResult<Option<Photo>> {
        Ok(self.photos.get(id).cloned())
    }

    fn delete_photo(&mut self, id: &str) -> StoreResult<bool> {
        Ok(self.photos.remove(id).is_some())
    }

    fn photos_by_inspection(&self, inspection_id: &str) -> StoreResult<Vec<Photo>> {
        Ok(self
            .photos
            .values()
            .filter(|p| p.inspection_id == inspection_id)
            .cloned()
            .collect())
    }

    fn photo_owners(&self) -> StoreResult<Vec<(String, String)>> {
        Ok(self
            .photos
            .values()
            .map(|p| (p.id.clone(), p.inspection_id.clone()))
            .collect())
    }

    fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.settings.get(key).cloned())
    }

    fn put_setting(&mut self, key: &str, value: &str) -> StoreResult<()> {
        self.settings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn queue_insert(&mut self, item: &QueueItem) -> StoreResult<bool> {
        if self.queue.contains_key(&item.id) {
            return Ok(false);
        }
        self.queue.insert(item.id.clone(), item.clone());
        Ok(true)
    }

    fn queue_get(&self, id: &str) -> StoreResult<Option<QueueItem>> {
        Ok(self.queue.get(id).cloned())
    }

    fn queue_list(&self) -> StoreResult<Vec<QueueItem>> {
        let mut items: Vec<QueueItem> = self.queue.values().cloned().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    fn queue_remove(&mut self, id: &str) -> StoreResult<bool> {
        Ok(self.queue.remove(id).is_some())
    }

    fn queue_record_retry(&mut self, id: &str, at: DateTime<Utc>) -> StoreResult<Option<u32>> {
        Ok(self.queue.get_mut(id).map(|item| {
            item.retries += 1;
            item.last_retry_at = Some(at);
            item.retries
        }))
    }

    fn queue_len(&self) -> StoreResult<usize> {
        Ok(self.queue.len())
    }

    fn queue_clear(&mut self) -> StoreResult<usize> {
        let removed = self.queue.len();
        self.queue.clear();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InspectionType;

    #[test]
    fn test_most_recent_tie_break_is_consistent() {
        let mut db = MemoryDb::new();
        let now = Utc::now();
        db.put_inspection(&Inspection::new("a", "1 A St", InspectionType::General, now))
            .unwrap();
        db.put_inspection(&Inspection::new("b", "2 B St", InspectionType::General, now))
            .unwrap();

        for _ in 0..5 {
            assert_eq!(db.most_recent_inspection().unwrap().unwrap().id, "b");
        }
    }

    #[test]
    fn test_queue_clear_reports_count() {
        let mut db = MemoryDb::new();
        let now = Utc::now();
        db.queue_insert(&QueueItem::new("p1", 1, now, vec![], now)).unwrap();
        db.queue_insert(&QueueItem::new("p2", 1, now, vec![], now)).unwrap();
        assert_eq!(db.queue_clear().unwrap(), 2);
        assert_eq!(db.queue_len().unwrap(), 0);
    }
}
