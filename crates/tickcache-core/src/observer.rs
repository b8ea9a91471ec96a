//! Explicit observer list for cache change notifications.
//!
//! Every subscriber call runs inside its own error boundary: a subscriber
//! that returns an error or panics is logged and skipped, and the remaining
//! subscribers are still notified.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::error;

/// A change emitted by a cache.
#[derive(Debug)]
pub enum CacheEvent<'a, T> {
    Added(&'a T),
    Removed(&'a T),
    /// A cycle finished and replaced the collection.
    Refreshed { total: usize },
}

impl<T> CacheEvent<'_, T> {
    fn kind(&self) -> &'static str {
        match self {
            CacheEvent::Added(_) => "added",
            CacheEvent::Removed(_) => "removed",
            CacheEvent::Refreshed { .. } => "refreshed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber<T> = Arc<dyn Fn(&CacheEvent<'_, T>) -> anyhow::Result<()> + Send + Sync>;

pub struct Observers<T> {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber<T>)>>,
}

impl<T> Observers<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent<'_, T>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(subscriber)));
        id
    }

    /// Returns false if the id was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn clear(&self) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every subscriber, returning how many failed.
    pub fn notify(&self, source: &str, event: &CacheEvent<'_, T>) -> usize {
        // Snapshot so subscribers may (un)subscribe from inside the callback
        let subscribers: Vec<Subscriber<T>> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, s)| s.clone())
            .collect();

        let mut failures = 0;
        for subscriber in subscribers {
            match panic::catch_unwind(AssertUnwindSafe(|| subscriber(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    error!(service = source, event = event.kind(), error = %e, "Subscriber failed");
                }
                Err(_) => {
                    failures += 1;
                    error!(service = source, event = event.kind(), "Subscriber panicked");
                }
            }
        }
        failures
    }
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}
