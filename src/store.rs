//! Asynchronous record store over the storage engine.
//!
//! Every operation runs one atomic engine call on the blocking pool and is
//! durable when the returned future resolves. Multi-entity helpers
//! (`add_photo`, `remove_photo`, `record_photo_edit`) are sequences of such
//! calls and are not transactional: if a later step fails, the earlier ones
//! stay committed and `check_consistency` will report the gap.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::db::{Database, Inspection, Photo};
use crate::error::{StoreError, StoreResult};
use crate::sync::SyncQueue;

/// A broken link between inspections and photos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyViolation {
    /// A photo whose owning inspection does not exist.
    OrphanPhoto {
        photo_id: String,
        inspection_id: String,
    },
    /// An inspection lists a photo id that is not stored, or that belongs
    /// to a different inspection.
    DanglingPhotoId {
        inspection_id: String,
        photo_id: String,
    },
}

impl std::fmt::Display for ConsistencyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsistencyViolation::OrphanPhoto { photo_id, inspection_id } => write!(
                f,
                "photo {} points at missing inspection {}",
                photo_id, inspection_id
            ),
            ConsistencyViolation::DanglingPhotoId { inspection_id, photo_id } => write!(
                f,
                "inspection {} lists photo {} it does not own",
                inspection_id, photo_id
            ),
        }
    }
}

#[derive(Clone)]
pub struct RecordStore {
    db: Arc<Database>,
    /// Serializes read-modify-write sequences issued through this store.
    edit_lock: Arc<Mutex<()>>,
}

impl RecordStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            edit_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn is_degraded(&self) -> bool {
        self.db.is_degraded()
    }

    // ========================================================================
    // Inspections
    // ========================================================================

    pub async fn put_inspection(&self, inspection: Inspection) -> StoreResult<()> {
        self.db.call(move |db| db.put_inspection(&inspection)).await
    }

    pub async fn get_inspection(&self, id: &str) -> StoreResult<Option<Inspection>> {
        let id = id.to_string();
        self.db.call(move |db| db.get_inspection(&id)).await
    }

    /// The inspection with the latest creation time, used to resume a
    /// session after restart.
    pub async fn get_most_recent_inspection(&self) -> StoreResult<Option<Inspection>> {
        self.db.call(|db| db.most_recent_inspection()).await
    }

    pub async fn list_inspections(&self) -> StoreResult<Vec<Inspection>> {
        self.db.call(|db| db.list_inspections()).await
    }

    // ========================================================================
    // Photos
    // ========================================================================

    pub async fn put_photo(&self, photo: Photo) -> StoreResult<()> {
        self.db.call(move |db| db.put_photo(&photo)).await
    }

    pub async fn get_photo(&self, id: &str) -> StoreResult<Option<Photo>> {
        let id = id.to_string();
        self.db.call(move |db| db.get_photo(&id)).await
    }

    /// Removing a photo that does not exist is not an error.
    pub async fn delete_photo(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.db.call(move |db| db.delete_photo(&id)).await?;
        Ok(())
    }

    /// Photos owned by an inspection, in no particular order.
    pub async fn get_photos_by_inspection(&self, inspection_id: &str) -> StoreResult<Vec<Photo>> {
        let inspection_id = inspection_id.to_string();
        self.db
            .call(move |db| db.photos_by_inspection(&inspection_id))
            .await
    }

    /// Store a new photo and append it to its inspection's photo list.
    pub async fn add_photo(&self, photo: Photo) -> StoreResult<Inspection> {
        let _edit = self.edit_lock.lock().await;

        let mut inspection = self
            .get_inspection(&photo.inspection_id)
            .await?
            .ok_or_else(|| StoreError::not_found("inspection", photo.inspection_id.clone()))?;

        let photo_id = photo.id.clone();
        self.put_photo(photo).await?;

        if inspection.add_photo_id(&photo_id) {
            inspection.touch(Utc::now());
            self.put_inspection(inspection.clone()).await?;
        }
        Ok(inspection)
    }

    /// Unlink a photo from its inspection, then delete it.
    pub async fn remove_photo(&self, photo_id: &str) -> StoreResult<()> {
        let _edit = self.edit_lock.lock().await;

        let Some(photo) = self.get_photo(photo_id).await? else {
            return Ok(());
        };

        if let Some(mut inspection) = self.get_inspection(&photo.inspection_id).await? {
            if inspection.remove_photo_id(photo_id) {
                inspection.touch(Utc::now());
                self.put_inspection(inspection).await?;
            }
        }

        self.delete_photo(photo_id).await
    }

    /// Apply a local edit that must reach the remote: modify the photo, bump
    /// its revision, commit it, then enqueue `payload` tagged with the new
    /// revision. Returns the committed photo and the queue item id.
    pub async fn record_photo_edit<F>(
        &self,
        photo_id: &str,
        edit: F,
        payload: Vec<u8>,
        queue: &SyncQueue,
    ) -> StoreResult<(Photo, String)>
    where
        F: FnOnce(&mut Photo),
    {
        let _edit = self.edit_lock.lock().await;

        let mut photo = self
            .get_photo(photo_id)
            .await?
            .ok_or_else(|| StoreError::not_found("photo", photo_id))?;

        edit(&mut photo);
        let revision = photo.bump_revision();

        self.put_photo(photo.clone()).await?;
        let (item_id, _) = queue.enqueue_edit(&photo.id, revision, payload).await?;

        tracing::debug!(photo_id = %photo.id, revision, item_id = %item_id, "Photo edit recorded");
        Ok((photo, item_id))
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub async fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let key = key.to_string();
        self.db.call(move |db| db.get_setting(&key)).await
    }

    pub async fn put_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.db.call(move |db| db.put_setting(&key, &value)).await
    }

    // ========================================================================
    // Invariants
    // ========================================================================

    /// Check that every photo's inspection exists and every listed photo id
    /// refers to a photo owned by that inspection.
    pub async fn check_consistency(&self) -> StoreResult<Vec<ConsistencyViolation>> {
        let (inspections, owners) = self
            .db
            .call(|db| Ok((db.list_inspections()?, db.photo_owners()?)))
            .await?;

        let inspection_ids: HashSet<&str> = inspections.iter().map(|i| i.id.as_str()).collect();
        let owner_of: HashMap<&str, &str> = owners
            .iter()
            .map(|(photo, inspection)| (photo.as_str(), inspection.as_str()))
            .collect();

        let mut violations = Vec::new();

        for (photo_id, inspection_id) in &owners {
            if !inspection_ids.contains(inspection_id.as_str()) {
                violations.push(ConsistencyViolation::OrphanPhoto {
                    photo_id: photo_id.clone(),
                    inspection_id: inspection_id.clone(),
                });
            }
        }

        for inspection in &inspections {
            for photo_id in &inspection.photo_ids {
                if owner_of.get(photo_id.as_str()) != Some(&inspection.id.as_str()) {
                    violations.push(ConsistencyViolation::DanglingPhotoId {
                        inspection_id: inspection.id.clone(),
                        photo_id: photo_id.clone(),
                    });
                }
            }
        }

        Ok(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{sort_newest_first, AiStatus, InspectionType};
    use crate::sync::clock::ManualClock;
    use chrono::Duration;

    fn store() -> RecordStore {
        RecordStore::new(Arc::new(Database::in_memory()))
    }

    async fn seeded() -> (RecordStore, Inspection) {
        let store = store();
        let inspection =
            Inspection::new("i1", "42 Elm Street", InspectionType::General, Utc::now());
        store.put_inspection(inspection.clone()).await.unwrap();
        (store, inspection)
    }

    #[tokio::test]
    async fn test_read_your_writes_for_photo() {
        let (store, _) = seeded().await;
        let photo = Photo::new("p1", "i1", "Living room", Utc::now())
            .with_images(vec![0xFF, 0xD8], vec![0xFF, 0xD8, 0xFF]);

        store.put_photo(photo.clone()).await.unwrap();
        assert_eq!(store.get_photo("p1").await.unwrap(), Some(photo));
    }

    #[tokio::test]
    async fn test_put_inspection_is_idempotent() {
        let (store, inspection) = seeded().await;
        store.put_inspection(inspection.clone()).await.unwrap();
        store.put_inspection(inspection.clone()).await.unwrap();

        assert_eq!(store.list_inspections().await.unwrap(), vec![inspection]);
    }

    #[tokio::test]
    async fn test_most_recent_inspection_resumes_latest_session() {
        let store = store();
        assert_eq!(store.get_most_recent_inspection().await.unwrap(), None);

        let now = Utc::now();
        let earlier = Inspection::new("old", "1 First Ave", InspectionType::Warranty, now - Duration::days(1));
        let latest = Inspection::new("new", "2 Second Ave", InspectionType::PreListing, now);
        store.put_inspection(latest.clone()).await.unwrap();
        store.put_inspection(earlier).await.unwrap();

        assert_eq!(store.get_most_recent_inspection().await.unwrap(), Some(latest));
    }

    #[tokio::test]
    async fn test_add_and_remove_photo_keep_links_consistent() {
        let (store, _) = seeded().await;
        let now = Utc::now();

        store.add_photo(Photo::new("p1", "i1", "Roof", now - Duration::minutes(1))).await.unwrap();
        let inspection = store.add_photo(Photo::new("p2", "i1", "Roof", now)).await.unwrap();
        assert_eq!(inspection.photo_ids, vec!["p1", "p2"]);
        assert!(store.check_consistency().await.unwrap().is_empty());

        let mut photos = store.get_photos_by_inspection("i1").await.unwrap();
        sort_newest_first(&mut photos);
        assert_eq!(photos.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["p2", "p1"]);

        store.remove_photo("p1").await.unwrap();
        store.remove_photo("p1").await.unwrap();
        let inspection = store.get_inspection("i1").await.unwrap().unwrap();
        assert_eq!(inspection.photo_ids, vec!["p2"]);
        assert_eq!(store.get_photo("p1").await.unwrap(), None);
        assert!(store.check_consistency().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_photo_to_missing_inspection_is_not_found() {
        let store = store();
        let err = store
            .add_photo(Photo::new("p1", "ghost", "Hall", Utc::now()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.get_photo("p1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_check_consistency_reports_broken_links() {
        let (store, mut inspection) = seeded().await;
        store.put_photo(Photo::new("orphan", "gone", "Shed", Utc::now())).await.unwrap();
        inspection.add_photo_id("missing");
        store.put_inspection(inspection).await.unwrap();

        let violations = store.check_consistency().await.unwrap();
        assert_eq!(violations.len(), 2);
        assert!(violations.contains(&ConsistencyViolation::OrphanPhoto {
            photo_id: "orphan".to_string(),
            inspection_id: "gone".to_string(),
        }));
        assert!(violations.contains(&ConsistencyViolation::DanglingPhotoId {
            inspection_id: "i1".to_string(),
            photo_id: "missing".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_record_photo_edit_bumps_revision_and_enqueues() {
        let (store, _) = seeded().await;
        let queue = SyncQueue::new(Arc::clone(store.database()));
        store.add_photo(Photo::new("p1", "i1", "Deck", Utc::now())).await.unwrap();

        let (photo, first_id) = store
            .record_photo_edit("p1", |p| p.notes = "Loose railing".to_string(), b"a1".to_vec(), &queue)
            .await
            .unwrap();
        assert_eq!(photo.revision, 1);

        let (photo, second_id) = store
            .record_photo_edit("p1", |p| p.ai_status = AiStatus::Analyzing, b"a2".to_vec(), &queue)
            .await
            .unwrap();
        assert_eq!(photo.revision, 2);
        assert_ne!(first_id, second_id);

        let stored = store.get_photo("p1").await.unwrap().unwrap();
        assert_eq!(stored.revision, 2);
        assert_eq!(stored.notes, "Loose railing");

        let mut revisions: Vec<u64> = queue.list_pending().await.unwrap().iter().map(|i| i.revision).collect();
        revisions.sort();
        assert_eq!(revisions, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_edits_at_same_clock_reading_are_all_queued() {
        let (store, _) = seeded().await;
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let queue = SyncQueue::with_clock(Arc::clone(store.database()), clock);
        store.add_photo(Photo::new("p1", "i1", "Porch", Utc::now())).await.unwrap();

        let (_, first_id) = store
            .record_photo_edit("p1", |p| p.notes = "one".to_string(), b"one".to_vec(), &queue)
            .await
            .unwrap();
        let (photo, second_id) = store
            .record_photo_edit("p1", |p| p.notes = "two".to_string(), b"two".to_vec(), &queue)
            .await
            .unwrap();

        assert_eq!(photo.revision, 2);
        assert_ne!(first_id, second_id);

        let second = queue.get(&second_id).await.unwrap().unwrap();
        assert_eq!(second.revision, 2);
        assert_eq!(second.payload, b"two".to_vec());

        let mut queued: Vec<(u64, Vec<u8>)> = queue
            .list_pending()
            .await
            .unwrap()
            .into_iter()
            .map(|i| (i.revision, i.payload))
            .collect();
        queued.sort();
        assert_eq!(queued, vec![(1, b"one".to_vec()), (2, b"two".to_vec())]);
    }

    #[tokio::test]
    async fn test_record_photo_edit_for_missing_photo() {
        let store = store();
        let queue = SyncQueue::new(Arc::clone(store.database()));
        let err = store
            .record_photo_edit("nope", |_| {}, vec![], &queue)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(queue.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_settings_read_your_writes() {
        let store = store();
        assert_eq!(store.get_setting("language").await.unwrap(), None);
        store.put_setting("language", "es").await.unwrap();
        assert_eq!(store.get_setting("language").await.unwrap().as_deref(), Some("es"));
    }
}
