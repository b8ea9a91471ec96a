//! Test doubles shared by the unit tests in this crate.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore};

use crate::api::{Fetcher, Progress, Provider};
use crate::cancel::CancelToken;
use crate::config::Scope;
use crate::error::FetchError;
use crate::observer::CacheEvent;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestItem {
    pub id: u32,
    pub name: String,
}

pub fn item(id: u32, name: &str) -> TestItem {
    TestItem {
        id,
        name: name.to_string(),
    }
}

/// Provider whose granted scopes can be toggled.
#[derive(Debug, Default)]
pub struct TestProvider {
    granted: RwLock<HashSet<Scope>>,
}

impl TestProvider {
    pub fn granting(scopes: &[&str]) -> Self {
        let provider = Self::default();
        for scope in scopes {
            provider.grant(scope);
        }
        provider
    }

    pub fn grant(&self, scope: &str) {
        self.granted.write().unwrap().insert(Scope::from(scope));
    }

    pub fn revoke(&self, scope: &str) {
        self.granted.write().unwrap().remove(&Scope::from(scope));
    }
}

impl Provider for TestProvider {
    fn has_permissions(&self, required: &[Scope]) -> bool {
        let granted = self.granted.read().unwrap();
        required.iter().all(|scope| granted.contains(scope))
    }
}

/// Shared state of a `ScriptedFetcher`, kept by the test after the fetcher
/// is boxed into a service.
#[derive(Default)]
pub struct Script {
    results: Mutex<VecDeque<Result<Vec<TestItem>, FetchError>>>,
    pub calls: AtomicUsize,
    pub restores: AtomicUsize,
    pub clears: AtomicUsize,
    pub started: Notify,
    gate: Option<Semaphore>,
}

impl Script {
    pub fn push(&self, result: Result<Vec<TestItem>, FetchError>) {
        self.results.lock().unwrap().push_back(result);
    }

    pub fn push_items(&self, items: Vec<TestItem>) {
        self.push(Ok(items));
    }

    /// Let one held fetch proceed.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// Results not yet handed out. A fetch pops its result as the last step.
    pub fn pending(&self) -> usize {
        self.results.lock().unwrap().len()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Fetcher that replays queued results; returns an empty list when the
/// queue runs dry.
pub struct ScriptedFetcher {
    script: Arc<Script>,
}

impl ScriptedFetcher {
    pub fn new() -> (Self, Arc<Script>) {
        let script = Arc::new(Script::default());
        (Self { script: script.clone() }, script)
    }

    /// Every fetch waits for `Script::release` before returning.
    pub fn gated() -> (Self, Arc<Script>) {
        let script = Arc::new(Script {
            gate: Some(Semaphore::new(0)),
            ..Script::default()
        });
        (Self { script: script.clone() }, script)
    }
}

#[async_trait]
impl<P: Provider> Fetcher<TestItem, P> for ScriptedFetcher {
    async fn fetch(
        &self,
        _provider: &P,
        progress: &Progress,
        _cancel: &CancelToken,
    ) -> Result<Vec<TestItem>, FetchError> {
        self.script.calls.fetch_add(1, Ordering::SeqCst);
        progress.report("Fetching test items");
        self.script.started.notify_one();
        if let Some(gate) = &self.script.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.script
            .results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn after_restore(&self, _items: &mut Vec<TestItem>) -> anyhow::Result<()> {
        self.script.restores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_clear(&self) {
        self.script.clears.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records Added/Removed events as readable strings.
#[derive(Default, Clone)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn record(&self, event: &CacheEvent<'_, TestItem>) {
        let line = match event {
            CacheEvent::Added(item) => format!("added:{}", item.name),
            CacheEvent::Removed(item) => format!("removed:{}", item.name),
            CacheEvent::Refreshed { total } => format!("refreshed:{}", total),
        };
        self.0.lock().unwrap().push(line);
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}
