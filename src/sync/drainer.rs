//! Drains the sync queue against the remote authority.
//!
//! One cycle walks every queued item once:
//! 1. skip it if its backoff delay has not elapsed yet,
//! 2. drop it as a terminal failure if it already used up its retries,
//! 3. drop it as stale if the remote accepts a newer revision of the photo,
//! 4. otherwise apply it; on failure count a retry, and drop it once the
//!    retry limit is reached.
//!
//! At most one cycle runs at a time per storage engine, however many
//! drainers are built over it. The cycle never returns an error to its
//! trigger; failures are logged and counted in the report.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::backoff::BackoffPolicy;
use super::connectivity::Connectivity;
use super::queue::SyncQueue;
use super::remote::RemoteAuthority;
use super::SyncEvent;
use crate::db::QueueItem;
use crate::error::{RemoteError, StoreResult};

/// What happened to one queued item during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Backoff delay not yet elapsed; left untouched.
    Deferred,
    /// Applied remotely and removed from the queue.
    Applied,
    /// Superseded by a newer remote revision and removed without applying.
    Stale { remote_revision: u64 },
    /// Remote call failed; retry count incremented.
    Retrying { retries: u32 },
    /// Retry limit reached; removed and reported as a terminal failure.
    Exhausted { retries: u32 },
}

/// Per-cycle counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub examined: usize,
    pub deferred: usize,
    pub applied: usize,
    pub stale: usize,
    pub retrying: usize,
    pub failed: usize,
    /// Local storage errors; the affected items stay queued.
    pub errors: usize,
}

impl DrainReport {
    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Deferred => self.deferred += 1,
            ItemOutcome::Applied => self.applied += 1,
            ItemOutcome::Stale { .. } => self.stale += 1,
            ItemOutcome::Retrying { .. } => self.retrying += 1,
            ItemOutcome::Exhausted { .. } => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another cycle was in flight; this trigger did nothing.
    AlreadyRunning,
    /// The device is offline; no item was consumed.
    Offline,
    Completed(DrainReport),
}

/// Clears the in-flight flag when the cycle ends, however it ends.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncDrainer {
    queue: SyncQueue,
    remote: Arc<dyn RemoteAuthority>,
    connectivity: Connectivity,
    policy: BackoffPolicy,
    events: Option<mpsc::UnboundedSender<SyncEvent>>,
}

impl SyncDrainer {
    pub fn new(
        queue: SyncQueue,
        remote: Arc<dyn RemoteAuthority>,
        connectivity: Connectivity,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            queue,
            remote,
            connectivity,
            policy,
            events: None,
        }
    }

    /// Send sync outcomes, including terminal failures, to an observer.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<SyncEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// True while any drainer over the same storage engine is mid-cycle.
    pub fn is_processing(&self) -> bool {
        self.queue.drain_flag().load(Ordering::Acquire)
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// Run one drain cycle.
    pub async fn drain(&self) -> DrainOutcome {
        let Some(_guard) = ProcessingGuard::acquire(self.queue.drain_flag()) else {
            debug!("Drain already in progress, skipping trigger");
            return DrainOutcome::AlreadyRunning;
        };

        if !self.connectivity.is_online() {
            debug!("Offline, skipping drain");
            return DrainOutcome::Offline;
        }

        let mut report = DrainReport::default();

        let items = match self.queue.list_pending().await {
            Ok(items) => items,
            Err(e) => {
                error!(error = %e, "Failed to read sync queue");
                report.errors += 1;
                return DrainOutcome::Completed(report);
            }
        };

        for item in items {
            if !self.connectivity.is_online() {
                info!("Went offline during drain, stopping early");
                break;
            }

            report.examined += 1;
            match self.process_item(&item).await {
                Ok(outcome) => {
                    debug!(item_id = %item.id, ?outcome, "Queue item processed");
                    report.record(outcome);
                }
                Err(e) => {
                    warn!(item_id = %item.id, error = %e, "Queue item left in place after storage error");
                    report.errors += 1;
                }
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                applied = report.applied,
                stale = report.stale,
                retrying = report.retrying,
                failed = report.failed,
                deferred = report.deferred,
                errors = report.errors,
                "Drain cycle finished"
            );
        }

        DrainOutcome::Completed(report)
    }

    async fn process_item(&self, item: &QueueItem) -> StoreResult<ItemOutcome> {
        let now = self.queue.clock().now();
        if !self.policy.is_eligible(item, now) {
            return Ok(ItemOutcome::Deferred);
        }

        if self.policy.is_exhausted(item.retries) {
            return self
                .give_up(item, item.retries, "retry limit reached".to_string())
                .await;
        }

        match self.remote.current_revision(&item.photo_id).await {
            Ok(Some(remote_revision)) if item.revision < remote_revision => {
                self.queue.dequeue(&item.id).await?;
                debug!(
                    photo_id = %item.photo_id,
                    revision = item.revision,
                    remote_revision,
                    "Dropping stale edit"
                );
                self.emit(SyncEvent::Stale {
                    item_id: item.id.clone(),
                    photo_id: item.photo_id.clone(),
                    revision: item.revision,
                    remote_revision,
                });
                return Ok(ItemOutcome::Stale { remote_revision });
            }
            Ok(_) => {}
            Err(e) => return self.handle_failure(item, e).await,
        }

        match self
            .remote
            .apply(&item.photo_id, &item.payload, item.revision)
            .await
        {
            Ok(()) => {
                self.queue.dequeue(&item.id).await?;
                self.emit(SyncEvent::Applied {
                    item_id: item.id.clone(),
                    photo_id: item.photo_id.clone(),
                    revision: item.revision,
                });
                Ok(ItemOutcome::Applied)
            }
            Err(e) => self.handle_failure(item, e).await,
        }
    }

    async fn handle_failure(&self, item: &QueueItem, e: RemoteError) -> StoreResult<ItemOutcome> {
        let retries = self.queue.record_retry(&item.id).await?;

        if self.policy.is_exhausted(retries) {
            return self.give_up(item, retries, e.to_string()).await;
        }

        warn!(
            photo_id = %item.photo_id,
            retries,
            retry_in = ?self.policy.delay_for(retries),
            error = %e,
            "Remote sync failed, will retry"
        );
        self.emit(SyncEvent::RetryScheduled {
            item_id: item.id.clone(),
            photo_id: item.photo_id.clone(),
            retries,
            error: e.to_string(),
        });
        Ok(ItemOutcome::Retrying { retries })
    }

    async fn give_up(&self, item: &QueueItem, retries: u32, reason: String) -> StoreResult<ItemOutcome> {
        self.queue.dequeue(&item.id).await?;
        error!(
            photo_id = %item.photo_id,
            revision = item.revision,
            retries,
            reason = %reason,
            "Giving up on edit"
        );
        self.emit(SyncEvent::Failed {
            item_id: item.id.clone(),
            photo_id: item.photo_id.clone(),
            revision: item.revision,
            retries,
            error: reason,
        });
        Ok(ItemOutcome::Exhausted { retries })
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}
