use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::debug;

use tickcache_core::{CancelToken, FetchError, Fetcher, FilesystemApiService, Progress};

use crate::api::ApiClient;
use crate::models::Item;

pub type ItemService = FilesystemApiService<Item, ApiClient>;

/// The items endpoint accepts at most this many ids per request
const CHUNK_SIZE: usize = 200;

/// Chunk requests kept in flight at once
const MAX_CONCURRENT_REQUESTS: usize = 4;

/// Request paths covering `ids`, `CHUNK_SIZE` ids each.
pub fn chunk_paths(ids: &[u32]) -> Vec<String> {
    ids.chunks(CHUNK_SIZE)
        .map(|chunk| {
            let joined: Vec<String> = chunk.iter().map(u32::to_string).collect();
            format!("/v2/items?ids={}", joined.join(","))
        })
        .collect()
}

pub struct ItemFetcher {
    ids: Vec<u32>,
}

impl ItemFetcher {
    pub fn new(mut ids: Vec<u32>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }
}

#[async_trait]
impl Fetcher<Item, ApiClient> for ItemFetcher {
    async fn fetch(&self, client: &ApiClient, progress: &Progress, cancel: &CancelToken) -> Result<Vec<Item>, FetchError> {
        let paths = chunk_paths(&self.ids);
        let total = paths.len();
        let mut batches = stream::iter(paths.iter().cloned())
            .map(|path| async move { client.get_json::<Vec<Item>>(&path).await })
            .buffered(MAX_CONCURRENT_REQUESTS);

        let mut items = Vec::with_capacity(self.ids.len());
        let mut done = 0;
        progress.report(format!("Loading items 0/{}", total));
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let Some(batch) = batches.next().await else {
                break;
            };
            items.append(&mut batch?);
            done += 1;
            progress.report(format!("Loading items {}/{}", done, total));
        }
        Ok(items)
    }

    /// Drop snapshot entries for ids no longer tracked.
    async fn after_restore(&self, items: &mut Vec<Item>) -> Result<()> {
        let tracked: HashSet<u32> = self.ids.iter().copied().collect();
        let before = items.len();
        items.retain(|item| tracked.contains(&item.id));
        if items.len() != before {
            debug!(dropped = before - items.len(), "Dropped untracked items from snapshot");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rarity;
    use tickcache_core::CancelScope;

    fn item(id: u32) -> Item {
        Item {
            id,
            name: format!("Item {}", id),
            icon: None,
            rarity: Rarity::Basic,
            item_type: None,
        }
    }

    #[test]
    fn test_chunk_paths() {
        let ids: Vec<u32> = (1..=450).collect();
        let paths = chunk_paths(&ids);
        assert_eq!(paths.len(), 3);
        assert!(paths[0].starts_with("/v2/items?ids=1,2,3,"));
        assert!(paths[0].ends_with(",200"));
        assert!(paths[2].ends_with(",450"));
        assert!(chunk_paths(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_no_ids_no_requests() {
        let client = ApiClient::new("http://127.0.0.1:9").unwrap();
        let fetcher = ItemFetcher::new(Vec::new());
        let items = fetcher
            .fetch(&client, &Progress::default(), &CancelScope::new().token())
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_chunk() {
        let client = ApiClient::new("http://127.0.0.1:9").unwrap();
        let fetcher = ItemFetcher::new(vec![1, 2, 3]);
        let scope = CancelScope::new();
        let token = scope.token();
        scope.cancel();

        let err = fetcher.fetch(&client, &Progress::default(), &token).await.unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
    }

    #[tokio::test]
    async fn test_after_restore_drops_untracked() {
        let fetcher = ItemFetcher::new(vec![3, 1, 3]);
        let mut items = vec![item(1), item(2), item(3)];
        fetcher.after_restore(&mut items).await.unwrap();
        let ids: Vec<u32> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }
}
