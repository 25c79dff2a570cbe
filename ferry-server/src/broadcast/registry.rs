//! Broadcast registry implementation

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ferry_core::domain::log::{BuildId, LogLine};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::broadcaster::{Broadcaster, Listener};
use super::config::BroadcastConfig;
use super::lock;

/// Registry of per-build broadcasters
///
/// Shared by every ingestion stream and every live-stream connection. The
/// build map and each broadcaster's listener set are guarded by separate
/// locks so unrelated builds never contend on publish.
pub struct BroadcastRegistry {
    broadcasters: Mutex<HashMap<BuildId, Arc<Broadcaster>>>,
    next_listener_id: AtomicU64,
    config: BroadcastConfig,
}

impl BroadcastRegistry {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(BroadcastConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: BroadcastConfig) -> Self {
        Self {
            broadcasters: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Get the broadcaster for a build, creating it on first reference
    pub fn get_or_create(&self, build_id: BuildId) -> Arc<Broadcaster> {
        let mut broadcasters = lock(&self.broadcasters);
        Self::entry(&mut broadcasters, build_id)
    }

    fn entry(
        broadcasters: &mut HashMap<BuildId, Arc<Broadcaster>>,
        build_id: BuildId,
    ) -> Arc<Broadcaster> {
        Arc::clone(broadcasters.entry(build_id).or_insert_with(|| {
            tracing::debug!(build_id, "Broadcaster created");
            Arc::new(Broadcaster::new(build_id))
        }))
    }

    /// Attach a new listener to a build's broadcaster
    pub fn register(&self, build_id: BuildId) -> Listener {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.config.listener_capacity.max(1));

        // Attach while holding the map lock so cleanup cannot evict the
        // broadcaster between lookup and attach.
        let mut broadcasters = lock(&self.broadcasters);
        let broadcaster = Self::entry(&mut broadcasters, build_id);
        broadcaster.attach(id, sender);
        drop(broadcasters);

        tracing::info!(
            build_id,
            listener_id = id,
            listeners = broadcaster.listener_count(),
            "Listener registered"
        );

        Listener::new(id, receiver, broadcaster)
    }

    /// Detach and close a listener
    pub fn unregister(&self, listener: Listener) {
        tracing::info!(
            build_id = listener.build_id(),
            listener_id = listener.id(),
            "Listener unregistered"
        );
        drop(listener);
    }

    /// Deliver a persisted line to every listener of its build
    ///
    /// Never waits on a listener. Returns the number of listeners reached.
    pub fn publish(&self, build_id: BuildId, line: &LogLine) -> usize {
        self.get_or_create(build_id).publish(line)
    }

    /// Number of listeners attached to a build
    pub fn listener_count(&self, build_id: BuildId) -> usize {
        lock(&self.broadcasters)
            .get(&build_id)
            .map_or(0, |broadcaster| broadcaster.listener_count())
    }

    /// Number of live broadcasters
    pub fn broadcaster_count(&self) -> usize {
        lock(&self.broadcasters).len()
    }

    /// Evict broadcasters that have had no listeners for `idle_timeout`
    ///
    /// Returns the number of broadcasters removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut broadcasters = lock(&self.broadcasters);
        let before = broadcasters.len();

        broadcasters.retain(|build_id, broadcaster| {
            let evict = broadcaster
                .idle_for(now)
                .is_some_and(|idle| idle >= self.config.idle_timeout);
            if evict {
                tracing::debug!(build_id = *build_id, "Idle broadcaster evicted");
            }
            !evict
        });

        before - broadcasters.len()
    }

    /// Spawn background cleanup task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let evicted = registry.cleanup();
                if evicted > 0 {
                    tracing::info!(
                        evicted,
                        remaining = registry.broadcaster_count(),
                        "Broadcaster cleanup finished"
                    );
                }
            }
        })
    }
}

impl Default for BroadcastRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use futures_util::StreamExt;

    use super::*;

    fn line(log_id: u64, build_id: BuildId, message: &str) -> LogLine {
        LogLine {
            log_id,
            build_id,
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_registered_listener_receives_publish() {
        let registry = BroadcastRegistry::new();
        let mut listener = registry.register(1);

        let delivered = registry.publish(1, &line(10, 1, "a"));

        assert_eq!(delivered, 1);
        let received = listener.recv().await.unwrap();
        assert_eq!(received.log_id, 10);
        assert_eq!(received.build_id, 1);
        assert_eq!(received.message, "a");
    }

    #[tokio::test]
    async fn test_listener_for_other_build_receives_nothing() {
        let registry = BroadcastRegistry::new();
        let mut listener_b = registry.register(2);
        let mut listener_c = registry.register(3);

        registry.publish(2, &line(1, 2, "for b"));

        assert_eq!(listener_b.recv().await.unwrap().message, "for b");
        assert!(listener_c.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lines_arrive_in_publish_order() {
        let registry = BroadcastRegistry::new();
        let listener = registry.register(1);

        for id in 1..=5 {
            registry.publish(1, &line(id, 1, &format!("line {id}")));
        }

        let ids: Vec<u64> = listener.take(5).map(|l| l.log_id).collect().await;
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery() {
        let registry = BroadcastRegistry::new();
        let listener = registry.register(1);
        let broadcaster = registry.get_or_create(1);
        assert_eq!(registry.listener_count(1), 1);

        registry.unregister(listener);

        assert_eq!(registry.listener_count(1), 0);
        assert_eq!(broadcaster.publish(&line(1, 1, "late")), 0);
    }

    #[tokio::test]
    async fn test_dropped_listener_is_released() {
        let registry = BroadcastRegistry::new();
        {
            let _listener = registry.register(1);
            assert_eq!(registry.listener_count(1), 1);
        }

        assert_eq!(registry.listener_count(1), 0);
        assert_eq!(registry.publish(1, &line(1, 1, "nobody")), 0);
    }

    #[tokio::test]
    async fn test_slow_listener_is_disconnected() {
        let registry =
            BroadcastRegistry::with_config(BroadcastConfig::default().with_listener_capacity(2));
        let mut slow = registry.register(1);
        let mut fast = registry.register(1);

        assert_eq!(registry.publish(1, &line(1, 1, "a")), 2);
        assert_eq!(fast.recv().await.unwrap().log_id, 1);
        assert_eq!(registry.publish(1, &line(2, 1, "b")), 2);
        assert_eq!(fast.recv().await.unwrap().log_id, 2);

        // `slow` holds two buffered lines; the third overflows it.
        assert_eq!(registry.publish(1, &line(3, 1, "c")), 1);
        assert_eq!(fast.recv().await.unwrap().log_id, 3);
        assert_eq!(registry.listener_count(1), 1);

        // The disconnected listener drains what it had, then ends.
        assert_eq!(slow.recv().await.unwrap().log_id, 1);
        assert_eq!(slow.recv().await.unwrap().log_id, 2);
        assert_eq!(slow.recv().await, None);
    }

    #[tokio::test]
    async fn test_listener_ids_are_unique() {
        let registry = BroadcastRegistry::new();
        let a = registry.register(1);
        let b = registry.register(1);
        let c = registry.register(2);

        assert_ne!(a.id(), b.id());
        assert_ne!(b.id(), c.id());
        assert_eq!(registry.broadcaster_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_evicts_idle_broadcasters() {
        let registry = BroadcastRegistry::with_config(
            BroadcastConfig::default().with_idle_timeout(Duration::from_secs(10)),
        );
        registry.get_or_create(1);
        let _listener = registry.register(2);
        let released = registry.register(3);
        drop(released);

        assert_eq!(registry.cleanup(), 0);

        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(registry.cleanup(), 2);
        assert_eq!(registry.broadcaster_count(), 1);
        assert_eq!(registry.listener_count(2), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_runs_periodically() {
        let config = BroadcastConfig {
            listener_capacity: 8,
            idle_timeout: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(5),
        };
        let registry = Arc::new(BroadcastRegistry::with_config(config));
        registry.get_or_create(1);

        let task = registry.spawn_cleanup_task();
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(registry.broadcaster_count(), 0);
        task.abort();
    }
}
