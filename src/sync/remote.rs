//! The remote authority the drainer applies edits against.

use async_trait::async_trait;

use crate::error::RemoteError;

/// Remote side of photo sync.
///
/// Both methods are required: the drainer checks the accepted revision
/// before every apply so that an older edit never overwrites a newer one.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Revision the remote currently accepts for the photo, or `None` if the
    /// remote has never seen it.
    async fn current_revision(&self, photo_id: &str) -> Result<Option<u64>, RemoteError>;

    /// Apply a queued mutation. Must be idempotent for a repeated
    /// `(photo_id, revision)` since delivery is at-least-once.
    async fn apply(&self, photo_id: &str, payload: &[u8], revision: u64) -> Result<(), RemoteError>;
}
