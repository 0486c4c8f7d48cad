//! Triggers drain cycles on a timer and whenever connectivity comes back.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::connectivity::Connectivity;
use super::drainer::SyncDrainer;
use crate::config::SyncConfig;

#[derive(Debug, Clone, Copy)]
pub struct SyncScheduler {
    interval: Duration,
}

impl SyncScheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.interval())
    }

    /// Drive `drainer` until `shutdown` resolves.
    ///
    /// Each trigger spawns its own drain; overlapping triggers are absorbed
    /// by the drainer's single-flight guard.
    pub async fn run<S>(&self, drainer: Arc<SyncDrainer>, connectivity: Connectivity, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut online_rx = connectivity.subscribe();
        let mut was_online = *online_rx.borrow_and_update();
        tokio::pin!(shutdown);

        info!(interval = ?self.interval, "Sync scheduler started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    Self::trigger(&drainer, "timer");
                }
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    if online && !was_online {
                        Self::trigger(&drainer, "reconnect");
                    }
                    was_online = online;
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    fn trigger(drainer: &Arc<SyncDrainer>, reason: &'static str) {
        debug!(reason, "Triggering drain");
        let drainer = drainer.clone();
        tokio::spawn(async move {
            drainer.drain().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::error::RemoteError;
    use crate::sync::backoff::BackoffPolicy;
    use crate::sync::queue::SyncQueue;
    use crate::sync::remote::RemoteAuthority;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingRemote {
        applied: AtomicUsize,
    }

    #[async_trait]
    impl RemoteAuthority for CountingRemote {
        async fn current_revision(&self, _photo_id: &str) -> Result<Option<u64>, RemoteError> {
            Ok(None)
        }

        async fn apply(&self, _photo_id: &str, _payload: &[u8], _revision: u64) -> Result<(), RemoteError> {
            self.applied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reconnect_drains_queue() {
        let queue = SyncQueue::new(Arc::new(Database::in_memory()));
        queue.enqueue("p1", 1, Utc::now(), vec![]).await.unwrap();
        queue.enqueue("p2", 1, Utc::now(), vec![]).await.unwrap();

        let remote = Arc::new(CountingRemote::default());
        let connectivity = Connectivity::new(false);
        let policy = BackoffPolicy {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_retries: 5,
        };
        let drainer = Arc::new(SyncDrainer::new(
            queue.clone(),
            remote.clone(),
            connectivity.clone(),
            policy,
        ));

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let scheduler = SyncScheduler::new(Duration::from_secs(3600));
        let handle = tokio::spawn({
            let drainer = drainer.clone();
            let connectivity = connectivity.clone();
            async move {
                scheduler
                    .run(drainer, connectivity, async {
                        let _ = stop_rx.await;
                    })
                    .await
            }
        });

        // The immediate first tick finds the device offline.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.size().await.unwrap(), 2);

        connectivity.set_online(true);
        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.size().await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queue should drain after reconnect");

        assert_eq!(remote.applied.load(Ordering::SeqCst), 2);
        stop_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
