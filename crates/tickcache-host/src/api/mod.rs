//! REST API client module for the game's public API.
//!
//! This module provides the `ApiClient`, the provider handle every cache
//! fetches through. The API uses bearer API keys; the scopes a key grants
//! are read from the token info endpoint.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
