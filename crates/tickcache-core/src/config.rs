//! Per-service configuration.
//!
//! A `ServiceConfiguration` is supplied once when a cache is constructed and
//! is never mutated by the cache itself. It is deserialized from the host's
//! config file, so every field has a default.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Keyword used in config files for an interval that never fires.
const INFINITE_KEYWORD: &str = "infinite";

/// Default refresh cadence for remote caches.
/// 5 minutes keeps data reasonably fresh without hammering the API.
const DEFAULT_UPDATE_INTERVAL_MS: u64 = 5 * 60 * 1000;

/// Default persistence cadence.
const DEFAULT_SAVE_INTERVAL_MS: u64 = 10 * 60 * 1000;

/// A target interval for the tick scheduler.
///
/// Serialized as a number of milliseconds, or the string `"infinite"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IntervalRepr", into = "IntervalRepr")]
pub enum Interval {
    Every(Duration),
    Never,
}

impl Interval {
    pub fn from_millis(ms: u64) -> Self {
        Interval::Every(Duration::from_millis(ms))
    }

    pub fn from_secs(secs: u64) -> Self {
        Interval::Every(Duration::from_secs(secs))
    }

    pub fn from_mins(mins: u64) -> Self {
        Interval::Every(Duration::from_secs(mins * 60))
    }

    /// The period, or `None` if this interval never fires.
    pub fn period(&self) -> Option<Duration> {
        match self {
            Interval::Every(d) => Some(*d),
            Interval::Never => None,
        }
    }

    pub fn is_never(&self) -> bool {
        matches!(self, Interval::Never)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Every(d) => write!(f, "{}ms", d.as_millis()),
            Interval::Never => write!(f, "{}", INFINITE_KEYWORD),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum IntervalRepr {
    Millis(u64),
    Keyword(String),
}

impl TryFrom<IntervalRepr> for Interval {
    type Error = String;

    fn try_from(repr: IntervalRepr) -> Result<Self, Self::Error> {
        match repr {
            IntervalRepr::Millis(ms) => Ok(Interval::from_millis(ms)),
            IntervalRepr::Keyword(k) if k.eq_ignore_ascii_case(INFINITE_KEYWORD) => Ok(Interval::Never),
            IntervalRepr::Keyword(k) => Err(format!(
                "invalid interval '{}': expected milliseconds or \"{}\"",
                k, INFINITE_KEYWORD
            )),
        }
    }
}

impl From<Interval> for IntervalRepr {
    fn from(interval: Interval) -> Self {
        match interval {
            Interval::Every(d) => IntervalRepr::Millis(d.as_millis() as u64),
            Interval::Never => IntervalRepr::Keyword(INFINITE_KEYWORD.to_string()),
        }
    }
}

/// A named permission the remote provider must grant before a fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(String);

impl Scope {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Scope {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfiguration {
    pub enabled: bool,
    /// Block `start` until the first load has completed.
    pub await_loading: bool,
    pub save_interval: Interval,
    pub update_interval: Interval,
    pub needed_permissions: Vec<Scope>,
    /// Filesystem tier only: skip the disk snapshot and go to the network.
    pub force_refresh: bool,
    /// Filesystem tier only: snapshots older than this are ignored.
    pub max_snapshot_age: Option<Interval>,
}

impl Default for ServiceConfiguration {
    fn default() -> Self {
        Self {
            enabled: true,
            await_loading: false,
            save_interval: Interval::from_millis(DEFAULT_SAVE_INTERVAL_MS),
            update_interval: Interval::from_millis(DEFAULT_UPDATE_INTERVAL_MS),
            needed_permissions: Vec::new(),
            force_refresh: false,
            max_snapshot_age: None,
        }
    }
}

impl ServiceConfiguration {
    pub fn with_permissions<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Scope>,
    {
        self.needed_permissions = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_update_interval(mut self, interval: Interval) -> Self {
        self.update_interval = interval;
        self
    }

    pub fn with_save_interval(mut self, interval: Interval) -> Self {
        self.save_interval = interval;
        self
    }

    pub fn awaiting_load(mut self) -> Self {
        self.await_loading = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_parses_millis_and_keyword() {
        let every: Interval = serde_json::from_str("1500").unwrap();
        assert_eq!(every, Interval::from_millis(1500));

        let never: Interval = serde_json::from_str("\"infinite\"").unwrap();
        assert!(never.is_never());

        assert!(serde_json::from_str::<Interval>("\"soon\"").is_err());
    }

    #[test]
    fn test_interval_serializes_back() {
        assert_eq!(serde_json::to_string(&Interval::Never).unwrap(), "\"infinite\"");
        assert_eq!(serde_json::to_string(&Interval::from_secs(2)).unwrap(), "2000");
    }

    #[test]
    fn test_configuration_defaults_fill_missing_fields() {
        let config: ServiceConfiguration =
            serde_json::from_str(r#"{ "await_loading": true, "needed_permissions": ["account"] }"#).unwrap();
        assert!(config.enabled);
        assert!(config.await_loading);
        assert_eq!(config.needed_permissions, vec![Scope::from("account")]);
        assert_eq!(config.update_interval, Interval::from_mins(5));
        assert_eq!(config.max_snapshot_age, None);
    }
}
