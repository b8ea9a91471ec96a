//! Composition root: builds the caches in dependency order and drives them
//! from a fixed-rate frame loop.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use tickcache_core::scheduler::{run_if_due, spawn_if_due, Carry};
use tickcache_core::{
    ApiService, CacheEvent, Clock, FilesystemApiService, Interval, ManagedService, ServiceHandle,
    Tick,
};

use crate::api::ApiClient;
use crate::config::Config;
use crate::services::{
    AccountFetcher, AccountService, ItemFetcher, ItemService, WorldBossFetcher, WorldBossService,
};

/// How often the status line is logged
const STATUS_INTERVAL_SECS: u64 = 30;

/// Granted scopes are re-read this often
const PERMISSIONS_REFRESH_SECS: u64 = 10 * 60;

/// Retry cadence while a key is set but no scope is known
const PERMISSIONS_RETRY_SECS: u64 = 30;

pub struct App {
    pub account: Arc<AccountService>,
    pub worldbosses: Arc<WorldBossService>,
    pub items: Arc<ItemService>,
    /// Start order; disposal runs in reverse.
    services: Vec<Box<dyn ServiceHandle>>,
    client: Arc<ApiClient>,
    frame_interval: Duration,
    since_status: Duration,
    since_permissions: Duration,
    permissions_task: Option<JoinHandle<()>>,
}

impl App {
    pub fn new(config: &Config, client: Arc<ApiClient>, clock: Arc<dyn Clock>, cache_dir: &Path) -> Self {
        let cfg = &config.services;

        let account = Arc::new(
            ApiService::new("account", cfg.account.clone(), client.clone(), AccountFetcher)
                .with_clock(clock.clone()),
        );
        let worldbosses = Arc::new(
            ApiService::new(
                "worldbosses",
                cfg.worldbosses.clone(),
                client.clone(),
                WorldBossFetcher::new(account.clone(), clock.clone()),
            )
            .with_clock(clock.clone()),
        );
        let items = Arc::new(FilesystemApiService::new(
            ApiService::new(
                "items",
                cfg.items.clone(),
                client.clone(),
                ItemFetcher::new(config.tracked_items.clone()),
            )
            .with_clock(clock),
            cache_dir,
            "items",
        ));

        worldbosses.subscribe(|event| {
            match event {
                CacheEvent::Added(boss) => info!(boss = boss.id(), "World boss completed"),
                CacheEvent::Removed(boss) => debug!(boss = boss.id(), "World boss reset"),
                CacheEvent::Refreshed { total } => debug!(total, "World bosses refreshed"),
            }
            Ok(())
        });
        account.subscribe(|event| {
            if let CacheEvent::Added(account) = event {
                info!(name = %account.name, "Account loaded");
            }
            Ok(())
        });

        let services: Vec<Box<dyn ServiceHandle>> = vec![
            Box::new(ManagedService::new(account.clone(), cfg.account.clone())),
            Box::new(ManagedService::new(worldbosses.clone(), cfg.worldbosses.clone())),
            Box::new(ManagedService::new(items.clone(), cfg.items.clone())),
        ];

        Self {
            account,
            worldbosses,
            items,
            services,
            client,
            frame_interval: Duration::from_millis(config.frame_interval_ms.max(1)),
            since_status: Duration::ZERO,
            since_permissions: Duration::ZERO,
            permissions_task: None,
        }
    }

    pub fn service_names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name()).collect()
    }

    /// Start every service in dependency order.
    pub async fn start_all(&mut self) -> Result<()> {
        for service in &mut self.services {
            service.start().await?;
        }
        Ok(())
    }

    /// One frame: every service gets the tick, then the granted scopes are
    /// re-read when due.
    pub fn update(&mut self, tick: &Tick) {
        for service in &mut self.services {
            service.update(tick);
        }
        self.update_permissions(tick);
        let status = || log_status(&self.account, &self.worldbosses, &self.items);
        run_if_due(
            status,
            tick.elapsed,
            Interval::from_secs(STATUS_INTERVAL_SECS),
            &mut self.since_status,
            Carry::Remainder,
        );
    }

    /// A failed token info lookup leaves no scope granted, which would gate
    /// every cache for good. Retry quickly while that is the case.
    fn update_permissions(&mut self, tick: &Tick) {
        let interval = if self.client.has_token() && self.client.granted_scopes().is_empty() {
            Interval::from_secs(PERMISSIONS_RETRY_SECS)
        } else {
            Interval::from_secs(PERMISSIONS_REFRESH_SECS)
        };
        let client = self.client.clone();
        spawn_if_due(
            move || async move {
                match client.refresh_permissions().await {
                    Ok(scopes) => debug!(scopes = ?scopes, "API key permissions refreshed"),
                    Err(e) => warn!(error = %e, "Failed to refresh API key permissions"),
                }
            },
            tick.elapsed,
            interval,
            &mut self.since_permissions,
            Carry::Discard,
            &mut self.permissions_task,
        );
    }

    fn find(&mut self, name: &str) -> Result<&mut Box<dyn ServiceHandle>> {
        self.services
            .iter_mut()
            .find(|s| s.name() == name)
            .ok_or_else(|| anyhow!("Unknown service: {}", name))
    }

    /// Reload the named service and wait for its load to finish.
    pub async fn reload(&mut self, name: &str) -> Result<()> {
        self.find(name)?.reload().await
    }

    /// Start reloading the named service in the background. The other
    /// services keep getting ticks while it loads.
    pub fn request_reload(&mut self, name: &str) -> Result<()> {
        self.find(name)?.spawn_reload();
        Ok(())
    }

    /// Drive the frame loop until `shutdown` resolves. Names received on
    /// `reloads` are reloaded in the background.
    pub async fn run<F>(&mut self, shutdown: F, mut reloads: mpsc::UnboundedReceiver<String>) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut frames = tokio::time::interval(self.frame_interval);
        frames.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let started = Instant::now();
        let mut last = started;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(name) = reloads.recv() => {
                    if let Err(e) = self.request_reload(name.trim()) {
                        warn!(error = format!("{:#}", e), "Reload failed");
                    }
                }
                _ = frames.tick() => {
                    let now = Instant::now();
                    let tick = Tick::new(now - last, now - started);
                    last = now;
                    self.update(&tick);
                }
            }
        }
        Ok(())
    }

    /// Dispose every service, last started first.
    pub async fn dispose_all(&mut self) {
        if let Some(task) = self.permissions_task.take() {
            task.abort();
        }
        for service in self.services.iter_mut().rev() {
            service.dispose().await;
        }
    }
}

/// Item counts per cache, or "busy" where a swap is in progress.
fn log_status(account: &AccountService, worldbosses: &WorldBossService, items: &ItemService) {
    fn count<T>(snapshot: Option<Vec<T>>) -> String {
        snapshot.map_or_else(|| "busy".to_string(), |items| items.len().to_string())
    }
    info!(
        account = count(account.try_snapshot()),
        worldbosses = count(worldbosses.try_snapshot()),
        items = count(items.api().try_snapshot()),
        "Cache status"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tickcache_core::{CancelScope, Provider, RefreshOutcome, Scope, ServiceState, SystemClock};

    use crate::testing::{serve, ACCOUNT, TOKEN_INFO};

    fn disabled_config() -> Config {
        let mut config = Config::default();
        config.services.account.enabled = false;
        config.services.worldbosses.enabled = false;
        config.services.items.enabled = false;
        config
    }

    fn app(config: &Config, dir: &TempDir) -> App {
        let client = Arc::new(ApiClient::new("http://127.0.0.1:9").unwrap());
        App::new(config, client, Arc::new(SystemClock), dir.path())
    }

    #[test]
    fn test_services_in_dependency_order() {
        let dir = TempDir::new().unwrap();
        let app = app(&Config::default(), &dir);
        assert_eq!(app.service_names(), vec!["account", "worldbosses", "items"]);
        assert_eq!(app.items.directory(), dir.path().join("items").as_path());
    }

    #[tokio::test]
    async fn test_disabled_services_stay_stopped() {
        let dir = TempDir::new().unwrap();
        let mut app = app(&disabled_config(), &dir);
        app.start_all().await.unwrap();
        app.update(&Tick::elapsed(Duration::from_secs(60)));
        assert!(app.services.iter().all(|s| s.state() == ServiceState::Stopped));
        app.dispose_all().await;
    }

    #[tokio::test]
    async fn test_reload_unknown_service() {
        let dir = TempDir::new().unwrap();
        let mut app = app(&disabled_config(), &dir);
        assert!(app.reload("wallet").await.is_err());
        // Known but not running is a no-op
        assert!(app.reload("items").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let mut app = app(&disabled_config(), &dir);
        let (_tx, rx) = mpsc::unbounded_channel();
        app.run(tokio::time::sleep(Duration::from_secs(2)), rx).await.unwrap();
    }

    #[tokio::test]
    async fn test_status_snapshot_of_empty_caches() {
        let dir = TempDir::new().unwrap();
        let app = app(&disabled_config(), &dir);
        assert_eq!(app.account.try_snapshot(), Some(Vec::new()));
        assert_eq!(app.items.api().try_snapshot(), Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_permissions_recover_after_failed_lookup() {
        let base_url = serve(vec![(503, "{}"), (200, TOKEN_INFO), (200, ACCOUNT)]).await;
        let mut client = ApiClient::new(&base_url).unwrap();
        client.set_token("KEY".to_string());
        let client = Arc::new(client);
        assert!(client.refresh_permissions().await.is_err());

        let dir = TempDir::new().unwrap();
        let mut app = App::new(&disabled_config(), client.clone(), Arc::new(SystemClock), dir.path());
        let scope = CancelScope::new();
        assert_eq!(app.account.refresh(&scope.token()).await, RefreshOutcome::MissingPermissions);

        app.update(&Tick::elapsed(Duration::from_secs(PERMISSIONS_RETRY_SECS)));
        app.permissions_task.take().expect("permission refresh launched").await.unwrap();
        assert!(client.has_permissions(&[Scope::new("account"), Scope::new("progression")]));

        assert!(app.account.refresh(&scope.token()).await.is_updated());
        assert_eq!(app.account.items().await[0].name, "Tester.1234");
    }

    #[tokio::test]
    async fn test_known_permissions_refresh_slowly() {
        let dir = TempDir::new().unwrap();
        let mut client = ApiClient::new("http://127.0.0.1:9").unwrap();
        client.set_token("KEY".to_string());
        client.set_granted([Scope::new("account")]);
        let mut app = App::new(&disabled_config(), Arc::new(client), Arc::new(SystemClock), dir.path());

        app.update(&Tick::elapsed(Duration::from_secs(PERMISSIONS_RETRY_SECS)));
        assert!(app.permissions_task.is_none());
    }

    #[tokio::test]
    async fn test_request_reload_does_not_wait() {
        let dir = TempDir::new().unwrap();
        let mut app = app(&disabled_config(), &dir);
        assert!(app.request_reload("account").is_ok());
        assert!(app.request_reload("wallet").is_err());
    }
}
