//! Per-build broadcaster and listener handles

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use ferry_core::domain::log::{BuildId, LogLine};
use futures_util::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;

use super::lock;

/// Identifier of a listener, unique within one registry
pub type ListenerId = u64;

/// Fan-out hub for the log lines of a single build
pub struct Broadcaster {
    build_id: BuildId,
    state: Mutex<BroadcasterState>,
}

struct BroadcasterState {
    listeners: HashMap<ListenerId, mpsc::Sender<LogLine>>,
    /// When the last listener left (or creation time if none ever joined)
    idle_since: Option<Instant>,
}

impl Broadcaster {
    pub(super) fn new(build_id: BuildId) -> Self {
        Self {
            build_id,
            state: Mutex::new(BroadcasterState {
                listeners: HashMap::new(),
                idle_since: Some(Instant::now()),
            }),
        }
    }

    pub fn build_id(&self) -> BuildId {
        self.build_id
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.state).listeners.len()
    }

    pub(super) fn attach(&self, id: ListenerId, sender: mpsc::Sender<LogLine>) {
        let mut state = lock(&self.state);
        state.listeners.insert(id, sender);
        state.idle_since = None;
    }

    pub(super) fn detach(&self, id: ListenerId) -> bool {
        let mut state = lock(&self.state);
        let removed = state.listeners.remove(&id).is_some();
        if removed && state.listeners.is_empty() {
            state.idle_since = Some(Instant::now());
        }
        removed
    }

    /// Deliver a line to every attached listener without waiting.
    ///
    /// Listeners whose buffer is full are disconnected; listeners whose
    /// receiving side is gone are pruned. Returns the number of listeners the
    /// line was delivered to.
    pub fn publish(&self, line: &LogLine) -> usize {
        let mut state = lock(&self.state);
        if state.listeners.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        state
            .listeners
            .retain(|listener_id, sender| match sender.try_send(line.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        build_id = self.build_id,
                        listener_id = *listener_id,
                        log_id = line.log_id,
                        "Listener buffer full, disconnecting slow listener"
                    );
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            });

        if state.listeners.is_empty() {
            state.idle_since = Some(Instant::now());
        }

        delivered
    }

    /// How long the broadcaster has been without listeners
    pub(super) fn idle_for(&self, now: Instant) -> Option<Duration> {
        lock(&self.state)
            .idle_since
            .map(|since| now.saturating_duration_since(since))
    }
}

/// A live subscriber's handle on a [`Broadcaster`]
///
/// Yields the build's log lines in publish order. Dropping the listener
/// detaches it from its broadcaster. The stream ends once the listener has
/// been disconnected for falling behind and its buffer is drained.
pub struct Listener {
    id: ListenerId,
    receiver: mpsc::Receiver<LogLine>,
    broadcaster: Arc<Broadcaster>,
}

impl Listener {
    pub(super) fn new(
        id: ListenerId,
        receiver: mpsc::Receiver<LogLine>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            id,
            receiver,
            broadcaster,
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn build_id(&self) -> BuildId {
        self.broadcaster.build_id()
    }

    /// Wait for the next published line
    pub async fn recv(&mut self) -> Option<LogLine> {
        self.receiver.recv().await
    }

    /// Take a line if one is already buffered
    pub fn try_recv(&mut self) -> Option<LogLine> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for Listener {
    type Item = LogLine;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if self.broadcaster.detach(self.id) {
            tracing::debug!(
                build_id = self.broadcaster.build_id(),
                listener_id = self.id,
                "Listener released"
            );
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("build_id", &self.build_id())
            .finish()
    }
}
