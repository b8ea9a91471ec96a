//! Typed remote cache.
//!
//! `ApiService` holds one homogeneous collection of records fetched from a
//! remote provider. Each refresh cycle replaces the collection wholesale,
//! diffs it against the previous contents and notifies subscribers of what
//! was added and removed. At most one cycle runs at a time per service.

use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::clock::{Clock, SystemClock, Tick};
use crate::config::{Scope, ServiceConfiguration};
use crate::diff::diff;
use crate::error::FetchError;
use crate::lifecycle::Lifecycle;
use crate::lock::AsyncLock;
use crate::observer::{CacheEvent, Observers, SubscriptionId};
use crate::scheduler::{spawn_if_due, Carry, Due};

/// Records a cache can hold. Identity across fetches is value equality.
pub trait Record: Clone + Hash + Eq + Send + Sync + 'static {}

impl<T> Record for T where T: Clone + Hash + Eq + Send + Sync + 'static {}

/// Opaque handle to the remote data source.
pub trait Provider: Send + Sync + 'static {
    /// Whether every scope in `required` is currently granted.
    fn has_permissions(&self, required: &[Scope]) -> bool;
}

/// The per-cache part of a remote cache: how to fetch its records.
#[async_trait]
pub trait Fetcher<T, P>: Send + Sync + 'static
where
    T: Send + 'static,
    P: Provider,
{
    async fn fetch(&self, provider: &P, progress: &Progress, cancel: &CancelToken) -> Result<Vec<T>, FetchError>;

    /// Runs on records restored from disk before they are published,
    /// e.g. to re-resolve icon references.
    async fn after_restore(&self, _items: &mut Vec<T>) -> Result<()> {
        Ok(())
    }

    /// Teardown for whatever the fetcher keeps beside the collection.
    async fn on_clear(&self) {}
}

/// Human-readable progress text for the UI.
#[derive(Debug, Clone, Default)]
pub struct Progress(Arc<RwLock<String>>);

impl Progress {
    pub fn report(&self, text: impl Into<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = text.into();
    }

    pub fn get(&self) -> String {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        self.0.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Single-slot gate: reset when a cycle starts, set when it ends, whatever
/// the outcome.
#[derive(Debug)]
pub struct CompletionSignal {
    tx: watch::Sender<bool>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal is set. Returns false on timeout.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        let result = tokio::time::timeout(timeout, rx.wait_for(|done| *done)).await;
        matches!(result, Ok(Ok(_)))
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated { added: usize, removed: usize, total: usize },
    /// Another cycle was already in flight.
    Skipped,
    MissingPermissions,
    Failed,
    /// The cycle's cancellation scope ended; its result was discarded.
    Cancelled,
}

impl RefreshOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, RefreshOutcome::Updated { .. })
    }
}

#[derive(Default)]
struct RefreshTicker {
    elapsed: Duration,
    task: Option<JoinHandle<()>>,
}

pub struct ApiService<T: Record, P: Provider> {
    name: String,
    config: ServiceConfiguration,
    provider: Arc<P>,
    fetcher: Box<dyn Fetcher<T, P>>,
    clock: Arc<dyn Clock>,
    items: AsyncLock<Vec<T>>,
    /// Held for the whole of a cycle; enforces single-flight.
    cycle_lock: AsyncLock<()>,
    loading: AtomicBool,
    last_updated: RwLock<Option<DateTime<Utc>>>,
    progress: Progress,
    completion: CompletionSignal,
    observers: Observers<T>,
    ticker: Mutex<RefreshTicker>,
}

/// Ends a cycle when dropped, so waiters are released even if the cycle
/// future is aborted.
struct CycleGuard<'a, T: Record, P: Provider> {
    service: &'a ApiService<T, P>,
}

impl<T: Record, P: Provider> Drop for CycleGuard<'_, T, P> {
    fn drop(&mut self) {
        self.service.loading.store(false, Ordering::SeqCst);
        self.service.progress.clear();
        self.service.completion.set();
    }
}

impl<T: Record, P: Provider> ApiService<T, P> {
    pub fn new(
        name: impl Into<String>,
        config: ServiceConfiguration,
        provider: Arc<P>,
        fetcher: impl Fetcher<T, P>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            provider,
            fetcher: Box::new(fetcher),
            clock: Arc::new(SystemClock),
            items: AsyncLock::new(Vec::new()),
            cycle_lock: AsyncLock::new(()),
            loading: AtomicBool::new(false),
            last_updated: RwLock::new(None),
            progress: Progress::default(),
            completion: CompletionSignal::new(),
            observers: Observers::new(),
            ticker: Mutex::new(RefreshTicker::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ServiceConfiguration {
        &self.config
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn fetcher(&self) -> &dyn Fetcher<T, P> {
        self.fetcher.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        *self.last_updated.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_last_updated(&self, value: Option<DateTime<Utc>>) {
        *self.last_updated.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    pub fn progress(&self) -> String {
        self.progress.get()
    }

    pub fn completion(&self) -> &CompletionSignal {
        &self.completion
    }

    /// Suspend until the current (or next) cycle finishes, success or not.
    pub async fn wait_for_completion(&self, timeout: Duration) -> bool {
        self.completion.wait(timeout).await
    }

    pub fn subscribe<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent<'_, T>) -> Result<()> + Send + Sync + 'static,
    {
        self.observers.subscribe(subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Clone of the current collection.
    pub async fn items(&self) -> Vec<T> {
        self.items.lock().await.clone()
    }

    /// Clone of the current collection, for non-async callers.
    pub fn items_blocking(&self) -> Vec<T> {
        self.items.lock_blocking().clone()
    }

    /// Collection and its update time, read under one acquisition of the
    /// items lock. `None` while nothing is loaded.
    pub async fn snapshot(&self) -> Option<(Vec<T>, DateTime<Utc>)> {
        let items = self.items.lock().await;
        let updated_at = self.last_updated()?;
        Some((items.clone(), updated_at))
    }

    #[cfg(test)]
    pub(crate) fn items_lock(&self) -> &AsyncLock<Vec<T>> {
        &self.items
    }

    /// Clone of the collection, or `None` if it is being swapped right now.
    pub fn try_snapshot(&self) -> Option<Vec<T>> {
        if !self.items.is_free() {
            return None;
        }
        self.items.try_lock().map(|items| items.clone())
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Run a refresh cycle unless one is already in flight.
    pub async fn refresh(&self, cancel: &CancelToken) -> RefreshOutcome {
        let Some(_cycle) = self.cycle_lock.try_lock() else {
            debug!(service = %self.name, "Refresh already in progress, skipping");
            return RefreshOutcome::Skipped;
        };
        self.run_cycle(cancel).await
    }

    /// Run a refresh cycle, waiting for any in-flight cycle to finish first.
    pub async fn refresh_exclusive(&self, cancel: &CancelToken) -> RefreshOutcome {
        let _cycle = self.cycle_lock.lock().await;
        self.run_cycle(cancel).await
    }

    /// Publish records that did not come from the network (disk snapshot).
    pub(crate) async fn hydrate(&self, items: Vec<T>, updated_at: DateTime<Utc>) -> RefreshOutcome {
        let _cycle = self.cycle_lock.lock().await;
        let _guard = self.begin_cycle();
        self.apply(items, None, updated_at).await
    }

    fn begin_cycle(&self) -> CycleGuard<'_, T, P> {
        self.completion.reset();
        self.loading.store(true, Ordering::SeqCst);
        CycleGuard { service: self }
    }

    async fn run_cycle(&self, cancel: &CancelToken) -> RefreshOutcome {
        let _guard = self.begin_cycle();

        if !self.provider.has_permissions(&self.config.needed_permissions) {
            warn!(
                service = %self.name,
                required = ?self.config.needed_permissions,
                "Missing permissions, keeping previous data"
            );
            return RefreshOutcome::MissingPermissions;
        }

        debug!(service = %self.name, "Fetching");
        let fetched = tokio::select! {
            result = self.fetcher.fetch(&self.provider, &self.progress, cancel) => result,
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
        };

        match fetched {
            Ok(items) => self.apply(items, Some(cancel), self.clock.now()).await,
            Err(e) => self.report_failure(e),
        }
    }

    fn report_failure(&self, error: FetchError) -> RefreshOutcome {
        match error {
            FetchError::Cancelled => {
                debug!(service = %self.name, "Fetch cancelled");
                RefreshOutcome::Cancelled
            }
            FetchError::MissingPermissions(scopes) => {
                warn!(service = %self.name, missing = ?scopes, "Provider reported missing permissions, skipping this cycle");
                RefreshOutcome::MissingPermissions
            }
            FetchError::InvalidCredential => {
                warn!(service = %self.name, "Invalid credential, skipping this cycle");
                RefreshOutcome::Failed
            }
            FetchError::Other(e) => {
                warn!(service = %self.name, error = format!("{:#}", e), "Fetch failed, keeping previous data");
                RefreshOutcome::Failed
            }
        }
    }

    /// Swap the collection, diff and notify, all under one lock acquisition.
    async fn apply(&self, fetched: Vec<T>, cancel: Option<&CancelToken>, updated_at: DateTime<Utc>) -> RefreshOutcome {
        let mut items = self.items.lock().await;

        // A reload may have started a new scope while this fetch was running
        if cancel.is_some_and(CancelToken::is_cancelled) {
            debug!(service = %self.name, "Discarding result of cancelled cycle");
            return RefreshOutcome::Cancelled;
        }

        let previous = std::mem::replace(&mut *items, fetched);
        let changes = diff(&previous, &items);

        for &item in &changes.added {
            self.observers.notify(&self.name, &CacheEvent::Added(item));
        }
        for &item in &changes.removed {
            self.observers.notify(&self.name, &CacheEvent::Removed(item));
        }

        let total = items.len();
        self.observers.notify(&self.name, &CacheEvent::Refreshed { total });
        self.set_last_updated(Some(updated_at));

        let outcome = RefreshOutcome::Updated {
            added: changes.added.len(),
            removed: changes.removed.len(),
            total,
        };
        debug!(service = %self.name, ?outcome, "Collection updated");
        outcome
    }
}

#[async_trait]
impl<T: Record, P: Provider> Lifecycle for ApiService<T, P> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<()> {
        let mut items = self.items.lock().await;
        items.clear();
        self.set_last_updated(None);
        drop(items);
        debug!(service = %self.name, "Initialized");
        Ok(())
    }

    async fn load(&self, cancel: CancelToken) -> Result<()> {
        let outcome = self.refresh_exclusive(&cancel).await;
        info!(service = %self.name, ?outcome, "Loaded from API");
        Ok(())
    }

    fn on_tick(self: Arc<Self>, tick: &Tick, cancel: &CancelToken) {
        let service = self.clone();
        let cancel = cancel.clone();
        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        let ticker = &mut *ticker;

        let due = spawn_if_due(
            move || async move {
                service.refresh(&cancel).await;
            },
            tick.elapsed,
            self.config.update_interval,
            &mut ticker.elapsed,
            Carry::Discard,
            &mut ticker.task,
        );
        if due == Due::Busy {
            debug!(service = %self.name, "Previous refresh still running");
        }
    }

    async fn clear(&self) {
        {
            // Collection and timestamp change together
            let mut items = self.items.lock().await;
            items.clear();
            self.set_last_updated(None);
        }
        self.fetcher.on_clear().await;
    }

    async fn unload(&self) {
        if let Some(task) = self.ticker.lock().unwrap_or_else(PoisonError::into_inner).task.take() {
            task.abort();
        }
        self.clear().await;
        self.observers.clear();
        debug!(service = %self.name, "Unloaded");
    }
}
