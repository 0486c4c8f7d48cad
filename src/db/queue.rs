//! Types for the outbound sync queue.

use chrono::{DateTime, Utc};

use super::to_db_timestamp;

/// A pending remote mutation for one photo.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub id: String,
    pub photo_id: String,
    /// Revision of the photo at the time the edit was made.
    pub revision: u64,
    pub edit_timestamp: DateTime<Utc>,
    /// Opaque serialized mutation; the queue never interprets it.
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub retries: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn new(
        photo_id: impl Into<String>,
        revision: u64,
        edit_timestamp: DateTime<Utc>,
        payload: Vec<u8>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let photo_id = photo_id.into();
        Self {
            id: queue_item_id(&photo_id, &edit_timestamp),
            photo_id,
            revision,
            edit_timestamp,
            payload,
            created_at,
            retries: 0,
            last_retry_at: None,
        }
    }

    /// Point in time the backoff delay is measured from.
    pub fn backoff_anchor(&self) -> DateTime<Utc> {
        self.last_retry_at.unwrap_or(self.created_at)
    }
}

/// Derive the queue id for an edit. The same logical edit always maps to the
/// same id, so a re-enqueue after a crash cannot create a second entry.
pub fn queue_item_id(photo_id: &str, edit_timestamp: &DateTime<Utc>) -> String {
    format!("{}@{}", photo_id, to_db_timestamp(edit_timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_queue_item_id_is_deterministic() {
        let ts = Utc::now();
        assert_eq!(queue_item_id("p1", &ts), queue_item_id("p1", &ts));
        assert_ne!(queue_item_id("p1", &ts), queue_item_id("p2", &ts));
        assert_ne!(
            queue_item_id("p1", &ts),
            queue_item_id("p1", &(ts + Duration::nanoseconds(1)))
        );
    }

    #[test]
    fn test_backoff_anchor_prefers_last_retry() {
        let created = Utc::now();
        let mut item = QueueItem::new("p1", 1, created, vec![], created);
        assert_eq!(item.backoff_anchor(), created);

        let retried = created + Duration::seconds(3);
        item.last_retry_at = Some(retried);
        assert_eq!(item.backoff_anchor(), retried);
    }
}
