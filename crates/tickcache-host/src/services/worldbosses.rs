use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use tracing::debug;

use tickcache_core::{ApiService, CancelToken, Clock, FetchError, Fetcher, Progress};

use crate::api::ApiClient;
use crate::models::WorldBoss;

use super::AccountService;

pub type WorldBossService = ApiService<WorldBoss, ApiClient>;

/// How long a world boss refresh waits for the account cache
const ACCOUNT_WAIT: Duration = Duration::from_secs(30);

/// Start of the current game day. Dailies reset at 00:00 UTC.
pub fn last_daily_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Fetches world boss completions. The server keeps yesterday's list until
/// the account is next modified, so the list is trusted only when the
/// account changed after the last reset.
pub struct WorldBossFetcher {
    account: Arc<AccountService>,
    clock: Arc<dyn Clock>,
}

impl WorldBossFetcher {
    pub fn new(account: Arc<AccountService>, clock: Arc<dyn Clock>) -> Self {
        Self { account, clock }
    }
}

#[async_trait]
impl Fetcher<WorldBoss, ApiClient> for WorldBossFetcher {
    async fn fetch(&self, client: &ApiClient, progress: &Progress, cancel: &CancelToken) -> Result<Vec<WorldBoss>, FetchError> {
        progress.report("Waiting for account");
        if self.account.is_loading() || self.account.last_updated().is_none() {
            if !self.account.wait_for_completion(ACCOUNT_WAIT).await {
                return Err(anyhow::anyhow!("Timed out waiting for account data").into());
            }
        }
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let Some(account) = self.account.items().await.into_iter().next() else {
            return Err(anyhow::anyhow!("Account data not available").into());
        };

        let reset = last_daily_reset(self.clock.now());
        if account.last_modified < reset {
            debug!(last_modified = %account.last_modified, reset = %reset, "Account unchanged since reset");
            return Ok(Vec::new());
        }

        progress.report("Loading world bosses");
        let ids: Vec<String> = client.get_json("/v2/account/worldbosses").await?;
        Ok(ids.into_iter().map(WorldBoss::new).collect())
    }
}
