//! API client for the game's public REST API.
//!
//! `ApiClient` issues authenticated GET requests and tracks which scopes
//! the configured API key grants, so caches can skip fetches they are not
//! allowed to make.

use std::collections::HashSet;
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, warn};

use tickcache_core::{Provider, Scope};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Base URL used when the config does not name one
pub const DEFAULT_API_BASE_URL: &str = "https://api.guildwars2.com";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// API schema version requested on every call
const SCHEMA_VERSION: &str = "2022-03-23T19:00:00.000Z";

#[derive(Debug, Deserialize)]
struct TokenInfo {
    name: String,
    permissions: Vec<String>,
}

/// API client for the game's REST API.
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    granted: RwLock<HashSet<Scope>>,
}

impl ApiClient {
    /// Create a new API client for `base_url` (no trailing slash needed)
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            granted: RwLock::new(HashSet::new()),
        })
    }

    /// Set the API key sent as bearer token
    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Scopes granted by the current key, as of the last `refresh_permissions`.
    pub fn granted_scopes(&self) -> Vec<Scope> {
        let granted = self.granted.read().unwrap_or_else(|e| e.into_inner());
        let mut scopes: Vec<Scope> = granted.iter().cloned().collect();
        scopes.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        scopes
    }

    /// Replace the granted scope set.
    pub fn set_granted<I>(&self, scopes: I)
    where
        I: IntoIterator<Item = Scope>,
    {
        let mut granted = self.granted.write().unwrap_or_else(|e| e.into_inner());
        *granted = scopes.into_iter().collect();
    }

    /// Ask the token info endpoint which scopes the key grants and remember them.
    /// Without a key the granted set is emptied.
    pub async fn refresh_permissions(&self) -> Result<Vec<Scope>, ApiError> {
        if self.token.is_none() {
            self.set_granted(Vec::new());
            return Ok(Vec::new());
        }
        let info: TokenInfo = self.get_json("/v2/tokeninfo").await?;
        debug!(key_name = %info.name, permissions = ?info.permissions, "Loaded token info");
        self.set_granted(info.permissions.iter().map(|p| Scope::new(p.as_str())));
        Ok(self.granted_scopes())
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert("X-Schema-Version", header::HeaderValue::from_static(SCHEMA_VERSION));
        if let Some(ref token) = self.token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ApiError::InvalidResponse("API key contains invalid characters".into()))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: reqwest::Response) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// GET `path` relative to the base URL and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(&url)
                .headers(self.auth_headers()?)
                .send()
                .await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    return response.json().await.map_err(ApiError::from);
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }
}

impl Provider for ApiClient {
    fn has_permissions(&self, required: &[Scope]) -> bool {
        if self.token.is_none() {
            return required.is_empty();
        }
        let granted = self.granted.read().unwrap_or_else(|e| e.into_inner());
        required.iter().all(|scope| granted.contains(scope))
    }
}
