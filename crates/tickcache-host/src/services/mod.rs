//! Concrete caches backed by the REST API.
//!
//! - `account`: the key owner's account, loaded before anything else
//! - `worldbosses`: today's world boss completions, gated on account freshness
//! - `items`: tracked item catalog entries, snapshotted to disk

pub mod account;
pub mod items;
pub mod worldbosses;

pub use account::{AccountFetcher, AccountService};
pub use items::{ItemFetcher, ItemService};
pub use worldbosses::{WorldBossFetcher, WorldBossService};
