//! Race context cache.
//!
//! Holds the freshest snapshot behind an `Arc` that is swapped wholesale on
//! every successful refresh. Readers clone the `Arc` and never wait on a
//! fetch; a failed refresh keeps serving the last good snapshot.

use crate::context::source::RaceDataSource;
use crate::error::{CommentaryError, Result};
use crate::pipeline::broadcaster::Broadcaster;
use crate::pipeline::types::ContextSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Published {
    current: Option<Arc<ContextSnapshot>>,
    previous: Option<Arc<ContextSnapshot>>,
}

/// Shared, non-blocking view of the race state.
#[derive(Debug, Default)]
pub struct ContextCache {
    published: RwLock<Published>,
    /// Consecutive failed refreshes since the last success.
    staleness: AtomicU64,
    failures: AtomicU64,
    refreshes: AtomicU64,
}

impl ContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently published snapshot, `None` before the first successful fetch.
    ///
    /// Never suspends; the lock is only held for an `Arc` clone.
    pub fn read(&self) -> Option<Arc<ContextSnapshot>> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    /// `(previous, current)` pair used for change detection.
    pub fn read_delta(&self) -> (Option<Arc<ContextSnapshot>>, Option<Arc<ContextSnapshot>>) {
        let published = self.published.read().unwrap_or_else(PoisonError::into_inner);
        (published.previous.clone(), published.current.clone())
    }

    /// Atomically replaces the published snapshot and resets staleness.
    pub fn publish(&self, snapshot: ContextSnapshot) -> Arc<ContextSnapshot> {
        let snapshot = Arc::new(snapshot);
        {
            let mut published = self.published.write().unwrap_or_else(PoisonError::into_inner);
            published.previous = published.current.replace(Arc::clone(&snapshot));
        }
        self.staleness.store(0, Ordering::Relaxed);
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        snapshot
    }

    /// Records a failed refresh. Returns the new staleness count.
    pub fn record_failure(&self) -> u64 {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.staleness.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Consecutive failed refreshes since the last success.
    pub fn staleness(&self) -> u64 {
        self.staleness.load(Ordering::Relaxed)
    }

    pub fn total_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn successful_refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// One fetch-and-publish cycle, bounded by `timeout`.
    pub async fn refresh_once(
        &self,
        source: &dyn RaceDataSource,
        timeout: Duration,
    ) -> Result<Arc<ContextSnapshot>> {
        let fetched = match tokio::time::timeout(timeout, source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(CommentaryError::ContextUnavailable {
                message: format!("{} fetch timed out after {:?}", source.name(), timeout),
            }),
        };

        match fetched {
            Ok(snapshot) => Ok(self.publish(snapshot)),
            Err(e) => {
                let stale = self.record_failure();
                tracing::warn!(source = source.name(), staleness = stale, "Context refresh failed: {}", e);
                Err(e)
            }
        }
    }

    /// Starts the periodic refresh loop.
    ///
    /// The first fetch runs immediately. Each successful refresh is also
    /// announced through `broadcaster`, when given. The loop ends when
    /// `cancel` fires.
    pub fn spawn_refresh(
        self: &Arc<Self>,
        source: Arc<dyn RaceDataSource>,
        period: Duration,
        broadcaster: Option<Broadcaster>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(source = source.name(), ?period, "Context refresh started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let refreshed = tokio::select! {
                    _ = cancel.cancelled() => break,
                    res = cache.refresh_once(source.as_ref(), period) => res,
                };

                if let Ok(snapshot) = refreshed {
                    tracing::debug!(lap = snapshot.current_lap, drivers = snapshot.positions.len(), "Context refreshed");
                    if let Some(broadcaster) = &broadcaster {
                        broadcaster.publish_context(snapshot);
                    }
                }
            }

            tracing::info!("Context refresh stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::source::MockRaceData;
    use crate::pipeline::broadcaster::DeliveryEvent;
    use crate::pipeline::types::DriverPosition;

    fn snapshot(lap: u32) -> ContextSnapshot {
        ContextSnapshot::new(
            lap,
            57,
            vec![
                DriverPosition::new(1, "Max Verstappen", "Red Bull Racing"),
                DriverPosition::new(2, "Lando Norris", "McLaren"),
            ],
        )
    }

    #[test]
    fn test_read_absent_before_first_fetch() {
        let cache = ContextCache::new();
        assert!(cache.read().is_none());
        assert_eq!(cache.read_delta(), (None, None));
    }

    #[test]
    fn test_publish_replaces_and_keeps_previous() {
        let cache = ContextCache::new();
        let first = cache.publish(snapshot(1));
        let second = cache.publish(snapshot(2));

        let (previous, current) = cache.read_delta();
        assert!(Arc::ptr_eq(&previous.unwrap(), &first));
        assert!(Arc::ptr_eq(&current.unwrap(), &second));
    }

    #[test]
    fn test_readers_share_one_instance() {
        let cache = ContextCache::new();
        cache.publish(snapshot(5));
        let a = cache.read().unwrap();
        let b = cache.read().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_held_snapshot_unaffected_by_later_publish() {
        let cache = ContextCache::new();
        cache.publish(snapshot(5));
        let held = cache.read().unwrap();
        cache.publish(snapshot(6));
        assert_eq!(held.current_lap, 5);
        assert_eq!(cache.read().unwrap().current_lap, 6);
    }

    #[tokio::test]
    async fn test_three_failures_keep_last_good_snapshot() {
        let cache = ContextCache::new();
        let source = MockRaceData::new()
            .then_ok(snapshot(10))
            .then_fail()
            .then_fail()
            .then_fail();
        let timeout = Duration::from_secs(1);

        assert!(cache.refresh_once(&source, timeout).await.is_ok());
        for _ in 0..3 {
            assert!(cache.refresh_once(&source, timeout).await.is_err());
        }

        assert_eq!(cache.staleness(), 3);
        assert_eq!(cache.total_failures(), 3);
        assert_eq!(cache.read().unwrap().current_lap, 10);
    }

    #[tokio::test]
    async fn test_success_resets_staleness() {
        let cache = ContextCache::new();
        let source = MockRaceData::new().then_fail().then_ok(snapshot(3));
        let timeout = Duration::from_secs(1);

        assert!(cache.refresh_once(&source, timeout).await.is_err());
        assert_eq!(cache.staleness(), 1);
        assert!(cache.refresh_once(&source, timeout).await.is_ok());
        assert_eq!(cache.staleness(), 0);
        assert_eq!(cache.total_failures(), 1);
    }

    #[tokio::test]
    async fn test_slow_fetch_counts_as_failure() {
        let cache = ContextCache::new();
        let source = MockRaceData::new()
            .then_ok(snapshot(1))
            .with_delay(Duration::from_secs(5));

        let result = cache.refresh_once(&source, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(CommentaryError::ContextUnavailable { .. })));
        assert_eq!(cache.staleness(), 1);
        assert!(cache.read().is_none());
    }

    #[tokio::test]
    async fn test_refresh_loop_publishes_and_broadcasts() {
        let cache = Arc::new(ContextCache::new());
        let source = Arc::new(
            MockRaceData::new()
                .then_ok(snapshot(1))
                .then_fail()
                .then_fail(),
        );
        let broadcaster = Broadcaster::new();
        let mut sub = broadcaster.subscribe();
        let cancel = CancellationToken::new();

        let handle = cache.spawn_refresh(
            source.clone(),
            Duration::from_millis(20),
            Some(broadcaster.clone()),
            cancel.clone(),
        );

        let first = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(first, DeliveryEvent::ContextChanged(ref s) if s.current_lap == 1));

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(cache.staleness() >= 2);
        assert_eq!(cache.read().unwrap().current_lap, 1);
        assert!(source.calls() >= 3);
    }
}
