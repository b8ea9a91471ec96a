//! Lifecycle supervisor shared by every cache.
//!
//! A service implements the `Lifecycle` hooks; `ManagedService` owns the
//! state machine around them:
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopped
//!                        Running -> Reloading -> Running
//! ```
//!
//! The host calls `update` once per frame. It never suspends: due work
//! (persistence, refresh) is launched as background tasks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cancel::{CancelScope, CancelToken};
use crate::clock::Tick;
use crate::config::ServiceConfiguration;
use crate::scheduler::{spawn_if_due, Carry, Due};

/// Hooks a cache provides to its supervisor.
#[async_trait]
pub trait Lifecycle: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// First fetch or cache hydration. Runs on start and after every reload.
    async fn load(&self, cancel: CancelToken) -> Result<()>;

    /// Per-frame work, e.g. the refresh-interval check.
    fn on_tick(self: Arc<Self>, _tick: &Tick, _cancel: &CancelToken) {}

    async fn save(&self) -> Result<()> {
        Ok(())
    }

    async fn clear(&self);

    async fn unload(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Reloading,
}

pub struct ManagedService<S: Lifecycle> {
    service: Arc<S>,
    config: ServiceConfiguration,
    state: Arc<watch::Sender<ServiceState>>,
    scope: CancelScope,
    unloaded: bool,
    time_since_save: Duration,
    save_task: Option<JoinHandle<()>>,
    load_task: Option<JoinHandle<()>>,
}

impl<S: Lifecycle> ManagedService<S> {
    pub fn new(service: Arc<S>, config: ServiceConfiguration) -> Self {
        let (state, _) = watch::channel(ServiceState::Stopped);
        Self {
            service,
            config,
            state: Arc::new(state),
            scope: CancelScope::new(),
            unloaded: false,
            time_since_save: Duration::ZERO,
            save_task: None,
            load_task: None,
        }
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    pub fn name(&self) -> &str {
        self.service.name()
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ServiceState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ServiceState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(service = self.name(), from = ?previous, to = ?state, "State changed");
        }
    }

    /// Returns false if the service is not running within `timeout`.
    pub async fn wait_until_running(&self, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        let result = tokio::time::timeout(timeout, rx.wait_for(|s| *s == ServiceState::Running)).await;
        matches!(result, Ok(Ok(_)))
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.unloaded {
            warn!(service = self.name(), "Service already disposed, not starting");
            return Ok(());
        }
        if self.state() != ServiceState::Stopped {
            warn!(service = self.name(), state = ?self.state(), "Service already running");
            return Ok(());
        }
        if !self.config.enabled {
            info!(service = self.name(), "Service disabled, not starting");
            return Ok(());
        }

        self.set_state(ServiceState::Starting);
        let token = self.scope.renew();

        if let Err(e) = self.service.initialize().await {
            self.set_state(ServiceState::Stopped);
            return Err(e).with_context(|| format!("Failed to initialize {}", self.name()));
        }

        let service = self.service.clone();
        let state = self.state.clone();
        let load = async move {
            if let Err(e) = service.load(token).await {
                warn!(service = service.name(), error = format!("{:#}", e), "Initial load failed");
            }
            // A dispose during loading leaves the service stopped
            state.send_if_modified(|s| {
                if *s == ServiceState::Starting {
                    *s = ServiceState::Running;
                    true
                } else {
                    false
                }
            });
            info!(service = service.name(), "Service started");
        };

        if self.config.await_loading {
            load.await;
        } else {
            self.load_task = Some(tokio::spawn(load));
        }
        Ok(())
    }

    /// Per-frame entry point. Does nothing unless running.
    pub fn update(&mut self, tick: &Tick) {
        if self.state() != ServiceState::Running {
            return;
        }

        let service = self.service.clone();
        let due = spawn_if_due(
            move || async move {
                if let Err(e) = service.save().await {
                    warn!(service = service.name(), error = format!("{:#}", e), "Save failed");
                }
            },
            tick.elapsed,
            self.config.save_interval,
            &mut self.time_since_save,
            Carry::Remainder,
            &mut self.save_task,
        );
        if due == Due::Busy {
            debug!(service = self.name(), "Previous save still running");
        }

        self.service.clone().on_tick(tick, &self.scope.token());
    }

    /// Abandon in-flight work and run `clear` then `load` again.
    pub async fn reload(&mut self) -> Result<()> {
        let Some(token) = self.begin_reload() else {
            return Ok(());
        };
        let pending_save = self.save_task.take();
        finish_save(self.name(), pending_save).await;
        self.service.clear().await;
        let result = self.service.load(token).await;
        self.set_state(ServiceState::Running);
        info!(service = self.name(), "Service reloaded");

        result.with_context(|| format!("Failed to reload {}", self.name()))
    }

    /// `reload` without suspending the caller. Clear and load run as a
    /// background task; the service reports `Reloading` until it is done and
    /// `update` is a no-op meanwhile.
    pub fn spawn_reload(&mut self) {
        let Some(token) = self.begin_reload() else {
            return;
        };
        let pending_save = self.save_task.take();
        let service = self.service.clone();
        let state = self.state.clone();

        self.load_task = Some(tokio::spawn(async move {
            finish_save(service.name(), pending_save).await;
            service.clear().await;
            if let Err(e) = service.load(token).await {
                warn!(service = service.name(), error = format!("{:#}", e), "Reload failed");
            }
            // A dispose during the reload leaves the service stopped
            state.send_if_modified(|s| {
                if *s == ServiceState::Reloading {
                    *s = ServiceState::Running;
                    true
                } else {
                    false
                }
            });
            info!(service = service.name(), "Service reloaded");
        }));
    }

    /// Enter `Reloading` with a fresh scope. `None` unless running.
    fn begin_reload(&mut self) -> Option<CancelToken> {
        if self.state() != ServiceState::Running {
            warn!(service = self.name(), state = ?self.state(), "Service not running, ignoring reload");
            return None;
        }
        self.set_state(ServiceState::Reloading);
        Some(self.scope.renew())
    }

    pub async fn dispose(&mut self) {
        self.stop();
        self.unload().await;
    }

    fn stop(&mut self) {
        self.set_state(ServiceState::Stopped);
    }

    async fn unload(&mut self) {
        if self.unloaded {
            warn!(service = self.name(), "Service already unloaded");
            return;
        }

        self.scope.cancel();
        if let Some(task) = self.load_task.take() {
            task.abort();
        }
        let pending_save = self.save_task.take();
        finish_save(self.name(), pending_save).await;
        self.service.unload().await;
        self.unloaded = true;
        info!(service = self.name(), "Service unloaded");
    }
}

/// Let a running save finish writing before the collection is touched.
async fn finish_save(name: &str, task: Option<JoinHandle<()>>) {
    let Some(task) = task else {
        return;
    };
    if let Err(e) = task.await {
        warn!(service = name, error = %e, "Save task failed");
    }
}

/// Object-safe view of a `ManagedService`, so a host can drive services of
/// different record types from one list.
#[async_trait]
pub trait ServiceHandle: Send {
    fn name(&self) -> &str;

    fn state(&self) -> ServiceState;

    async fn start(&mut self) -> Result<()>;

    fn update(&mut self, tick: &Tick);

    async fn reload(&mut self) -> Result<()>;

    fn spawn_reload(&mut self);

    async fn dispose(&mut self);
}

#[async_trait]
impl<S: Lifecycle> ServiceHandle for ManagedService<S> {
    fn name(&self) -> &str {
        ManagedService::name(self)
    }

    fn state(&self) -> ServiceState {
        ManagedService::state(self)
    }

    async fn start(&mut self) -> Result<()> {
        ManagedService::start(self).await
    }

    fn update(&mut self, tick: &Tick) {
        ManagedService::update(self, tick)
    }

    async fn reload(&mut self) -> Result<()> {
        ManagedService::reload(self).await
    }

    fn spawn_reload(&mut self) {
        ManagedService::spawn_reload(self)
    }

    async fn dispose(&mut self) {
        ManagedService::dispose(self).await
    }
}
