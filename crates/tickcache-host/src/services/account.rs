use async_trait::async_trait;
use tickcache_core::{ApiService, CancelToken, FetchError, Fetcher, Progress};

use crate::api::ApiClient;
use crate::models::Account;

pub type AccountService = ApiService<Account, ApiClient>;

pub struct AccountFetcher;

#[async_trait]
impl Fetcher<Account, ApiClient> for AccountFetcher {
    async fn fetch(&self, client: &ApiClient, progress: &Progress, _cancel: &CancelToken) -> Result<Vec<Account>, FetchError> {
        progress.report("Loading account");
        let account: Account = client.get_json("/v2/account").await?;
        Ok(vec![account])
    }
}
