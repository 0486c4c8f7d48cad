//! Outbound sync: the durable queue, the drainer that empties it against the
//! remote authority, and the triggers that run the drainer.

pub mod backoff;
pub mod clock;
pub mod connectivity;
pub mod drainer;
pub mod http;
pub mod queue;
pub mod remote;
pub mod scheduler;

pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use connectivity::Connectivity;
pub use drainer::{DrainOutcome, DrainReport, ItemOutcome, SyncDrainer};
pub use http::HttpRemote;
pub use queue::SyncQueue;
pub use remote::RemoteAuthority;
pub use scheduler::SyncScheduler;

/// Sync outcomes delivered to an observer, such as the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Applied {
        item_id: String,
        photo_id: String,
        revision: u64,
    },
    /// Dropped because the remote already holds a newer revision.
    Stale {
        item_id: String,
        photo_id: String,
        revision: u64,
        remote_revision: u64,
    },
    RetryScheduled {
        item_id: String,
        photo_id: String,
        retries: u32,
        error: String,
    },
    /// Terminal: the edit was dropped after exhausting its retries and will
    /// not reach the remote.
    Failed {
        item_id: String,
        photo_id: String,
        revision: u64,
        retries: u32,
        error: String,
    },
}

impl SyncEvent {
    pub fn photo_id(&self) -> &str {
        match self {
            SyncEvent::Applied { photo_id, .. }
            | SyncEvent::Stale { photo_id, .. }
            | SyncEvent::RetryScheduled { photo_id, .. }
            | SyncEvent::Failed { photo_id, .. } => photo_id,
        }
    }
}
