//! Durable outbound sync queue.
//!
//! Items are keyed by `(photo id, edit timestamp)`, so re-enqueuing the same
//! logical edit is a no-op. The queue does not order items; ordering between
//! edits of one photo is settled by the drainer's revision gate.

use chrono::{DateTime, Utc};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::clock::{Clock, SystemClock};
use crate::db::{queue_item_id, Database, QueueItem};
use crate::error::{StoreError, StoreResult};

/// Bound on timestamp bumps when stamping a fresh edit.
const MAX_STAMP_ATTEMPTS: u32 = 1_000;

#[derive(Clone)]
pub struct SyncQueue {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl SyncQueue {
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_clock(db, Arc::new(SystemClock))
    }

    pub fn with_clock(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Single-flight flag shared by every drainer over this queue's engine.
    pub(crate) fn drain_flag(&self) -> &AtomicBool {
        self.db.drain_flag()
    }

    /// Register a pending remote mutation. Returns the item id; if an item
    /// with that id is already queued it is kept as-is.
    pub async fn enqueue(
        &self,
        photo_id: &str,
        revision: u64,
        edit_timestamp: DateTime<Utc>,
        payload: Vec<u8>,
    ) -> StoreResult<String> {
        let item = QueueItem::new(photo_id, revision, edit_timestamp, payload, self.clock.now());
        let id = item.id.clone();
        let inserted = self.db.call(move |db| db.queue_insert(&item)).await?;
        if inserted {
            tracing::debug!(item_id = %id, revision, "Edit queued for sync");
        } else {
            tracing::debug!(item_id = %id, "Edit already queued");
        }
        Ok(id)
    }

    /// Queue a new local edit at the current clock reading. If another edit
    /// of the photo already holds that timestamp, the stamp is moved forward
    /// a nanosecond at a time until it is unique, so two edits never share an
    /// id. Returns the item id and the timestamp it was stamped with.
    pub async fn enqueue_edit(
        &self,
        photo_id: &str,
        revision: u64,
        payload: Vec<u8>,
    ) -> StoreResult<(String, DateTime<Utc>)> {
        let now = self.clock.now();
        let mut item = QueueItem::new(photo_id, revision, now, payload, now);
        let (id, edit_timestamp) = self
            .db
            .call(move |db| {
                for _ in 0..MAX_STAMP_ATTEMPTS {
                    if db.queue_insert(&item)? {
                        return Ok((item.id, item.edit_timestamp));
                    }
                    item.edit_timestamp += chrono::Duration::nanoseconds(1);
                    item.id = queue_item_id(&item.photo_id, &item.edit_timestamp);
                }
                Err(StoreError::StorageFailure(format!(
                    "no free edit timestamp for photo {} near {}",
                    item.photo_id, now
                )))
            })
            .await?;
        tracing::debug!(item_id = %id, revision, "Edit queued for sync");
        Ok((id, edit_timestamp))
    }

    pub async fn list_pending(&self) -> StoreResult<Vec<QueueItem>> {
        self.db.call(|db| db.queue_list()).await
    }

    pub async fn get(&self, id: &str) -> StoreResult<Option<QueueItem>> {
        let id = id.to_string();
        self.db.call(move |db| db.queue_get(&id)).await
    }

    /// Remove an item. Removing an unknown id is not an error.
    pub async fn dequeue(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.db.call(move |db| db.queue_remove(&id)).await?;
        Ok(())
    }

    /// Count a failed attempt and stamp it with the current time.
    /// Returns the new retry count.
    pub async fn record_retry(&self, id: &str) -> StoreResult<u32> {
        let now = self.clock.now();
        let owned_id = id.to_string();
        self.db
            .call(move |db| db.queue_record_retry(&owned_id, now))
            .await?
            .ok_or_else(|| StoreError::not_found("queue item", id))
    }

    pub async fn size(&self) -> StoreResult<usize> {
        self.db.call(|db| db.queue_len()).await
    }

    /// Drop every pending item. Only for explicit data-reset flows.
    pub async fn clear(&self) -> StoreResult<usize> {
        let removed = self.db.call(|db| db.queue_clear()).await?;
        tracing::info!(removed, "Sync queue cleared");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::sync::clock::ManualClock;
    use chrono::Duration;

    fn queue() -> (SyncQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let queue = SyncQueue::with_clock(Arc::new(Database::in_memory()), clock.clone());
        (queue, clock)
    }

    #[tokio::test]
    async fn test_enqueue_same_edit_twice_keeps_one_item() {
        let (queue, clock) = queue();
        let edit_ts = clock.now();

        let first = queue.enqueue("p1", 1, edit_ts, b"v1".to_vec()).await.unwrap();
        clock.advance(Duration::seconds(1));
        let second = queue.enqueue("p1", 1, edit_ts, b"v1-retry".to_vec()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(queue.size().await.unwrap(), 1);
        let item = queue.get(&first).await.unwrap().unwrap();
        assert_eq!(item.payload, b"v1".to_vec());
        assert_eq!(item.created_at, edit_ts);
    }

    #[tokio::test]
    async fn test_enqueue_edit_at_same_instant_gets_later_stamp() {
        let (queue, clock) = queue();
        let t0 = clock.now();

        let (first, first_ts) = queue.enqueue_edit("p1", 1, b"one".to_vec()).await.unwrap();
        let (second, second_ts) = queue.enqueue_edit("p1", 2, b"two".to_vec()).await.unwrap();
        let (third, third_ts) = queue.enqueue_edit("p1", 3, b"three".to_vec()).await.unwrap();

        assert_eq!(first_ts, t0);
        assert_eq!(second_ts, t0 + Duration::nanoseconds(1));
        assert_eq!(third_ts, t0 + Duration::nanoseconds(2));
        assert_ne!(first, second);
        assert_ne!(second, third);

        let second_item = queue.get(&second).await.unwrap().unwrap();
        assert_eq!(second_item.revision, 2);
        assert_eq!(second_item.payload, b"two".to_vec());
        assert_eq!(queue.size().await.unwrap(), 3);

        // Other photos are unaffected by the bump.
        let (_, other_ts) = queue.enqueue_edit("p2", 1, vec![]).await.unwrap();
        assert_eq!(other_ts, t0);
    }

    #[tokio::test]
    async fn test_distinct_edits_are_distinct_items() {
        let (queue, clock) = queue();
        let t0 = clock.now();
        queue.enqueue("p1", 1, t0, vec![]).await.unwrap();
        queue.enqueue("p1", 2, t0 + Duration::milliseconds(1), vec![]).await.unwrap();
        queue.enqueue("p2", 1, t0, vec![]).await.unwrap();
        assert_eq!(queue.list_pending().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_dequeue_is_idempotent() {
        let (queue, clock) = queue();
        let id = queue.enqueue("p1", 1, clock.now(), vec![]).await.unwrap();
        queue.dequeue(&id).await.unwrap();
        queue.dequeue(&id).await.unwrap();
        queue.dequeue("never-existed").await.unwrap();
        assert_eq!(queue.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_retry_stamps_clock_time() {
        let (queue, clock) = queue();
        let id = queue.enqueue("p1", 1, clock.now(), vec![]).await.unwrap();

        clock.advance(Duration::seconds(3));
        assert_eq!(queue.record_retry(&id).await.unwrap(), 1);
        let item = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(item.retries, 1);
        assert_eq!(item.last_retry_at, Some(clock.now()));

        let err = queue.record_retry("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_clear_empties_queue() {
        let (queue, clock) = queue();
        queue.enqueue("p1", 1, clock.now(), vec![]).await.unwrap();
        queue.enqueue("p2", 1, clock.now(), vec![]).await.unwrap();
        assert_eq!(queue.clear().await.unwrap(), 2);
        assert_eq!(queue.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queue_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            sqlite_path: dir.path().join("queue.db"),
            fallback_to_memory: false,
        };
        let edit_ts = Utc::now();

        let id = {
            let queue = SyncQueue::new(Arc::new(Database::open(&config).unwrap()));
            queue.enqueue("p1", 4, edit_ts, b"payload".to_vec()).await.unwrap()
        };

        let queue = SyncQueue::new(Arc::new(Database::open(&config).unwrap()));
        let again = queue.enqueue("p1", 4, edit_ts, b"payload".to_vec()).await.unwrap();
        assert_eq!(id, again);

        let items = queue.list_pending().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].revision, 4);
        assert_eq!(items[0].payload, b"payload".to_vec());
    }
}
