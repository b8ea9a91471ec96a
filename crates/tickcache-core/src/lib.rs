//! Frame-driven managed caches for overlay data sources.
//!
//! This crate provides the machinery every remote data source in the overlay
//! shares:
//! - `ManagedService`: lifecycle supervisor (start, per-tick update, reload, dispose)
//! - `ApiService`: typed remote cache with single-flight refresh and add/remove diffing
//! - `FilesystemApiService`: disk snapshot tier in front of `ApiService`
//! - `scheduler`: interval checks driven by the host's tick clock
//! - `AsyncLock`: mutex usable from sync and async call sites

pub mod api;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod diff;
pub mod error;
pub mod filesystem;
pub mod lifecycle;
pub mod lock;
pub mod observer;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiService, CompletionSignal, Fetcher, Progress, Provider, Record, RefreshOutcome};
pub use cancel::{CancelScope, CancelToken};
pub use clock::{Clock, FixedClock, SystemClock, Tick};
pub use config::{Interval, Scope, ServiceConfiguration};
pub use diff::{diff, Changes};
pub use error::{FetchError, SnapshotError};
pub use filesystem::FilesystemApiService;
pub use lifecycle::{Lifecycle, ManagedService, ServiceHandle, ServiceState};
pub use lock::AsyncLock;
pub use observer::{CacheEvent, Observers, SubscriptionId};
