//! Authentication module for the API key.
//!
//! The key is read from the environment or config first; `CredentialStore`
//! keeps it in the OS keychain otherwise.

pub mod credentials;

pub use credentials::CredentialStore;
