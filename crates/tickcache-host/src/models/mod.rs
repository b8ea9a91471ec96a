//! Data models for the overlay's remote data sources.
//!
//! - `Account`: the API key owner's account summary
//! - `WorldBoss`: a world boss completed today
//! - `Item`: item catalog entries

pub mod account;
pub mod item;

pub use account::{Account, WorldBoss};
pub use item::{Item, Rarity};
