//! Broadcast registry configuration

use std::time::Duration;

/// Configuration for the [`BroadcastRegistry`](super::BroadcastRegistry)
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Lines buffered per listener before it is disconnected as too slow
    pub listener_capacity: usize,

    /// How long a broadcaster without listeners is kept before eviction
    pub idle_timeout: Duration,

    /// How often the cleanup task looks for idle broadcasters
    pub cleanup_interval: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            listener_capacity: 256,
            idle_timeout: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl BroadcastConfig {
    pub fn with_listener_capacity(mut self, capacity: usize) -> Self {
        self.listener_capacity = capacity;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}
