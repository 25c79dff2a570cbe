//! Live log fan-out
//!
//! The [`BroadcastRegistry`] maps each build to a [`Broadcaster`] holding the
//! [`Listener`]s of every connected live-log subscriber. Persisted log lines
//! are published through the registry and copied into each listener's
//! bounded buffer.
//!
//! A listener whose buffer is full when a line is published is disconnected
//! rather than allowed to stall the publisher. Broadcasters without
//! listeners are evicted once they have been idle for
//! [`BroadcastConfig::idle_timeout`].

mod broadcaster;
mod config;
mod registry;

pub use broadcaster::{Broadcaster, Listener, ListenerId};
pub use config::BroadcastConfig;
pub use registry::BroadcastRegistry;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a holder panicked.
///
/// Every critical section in this module leaves the guarded maps in a
/// consistent state, so a poisoned lock is still safe to use.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
