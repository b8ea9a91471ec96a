use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "tickcache";

/// Keychain account the API key is filed under
const KEY_ACCOUNT: &str = "api-key";

pub struct CredentialStore;

impl CredentialStore {
    fn entry() -> Result<Entry> {
        Entry::new(SERVICE_NAME, KEY_ACCOUNT).context("Failed to create keyring entry")
    }

    /// Store the API key in the OS keychain
    pub fn store_key(key: &str) -> Result<()> {
        Self::entry()?
            .set_password(key)
            .context("Failed to store API key in keychain")?;
        Ok(())
    }

    /// Retrieve the API key from the OS keychain
    pub fn get_key() -> Result<String> {
        Self::entry()?
            .get_password()
            .context("Failed to retrieve API key from keychain")
    }

    /// Delete the stored API key
    pub fn delete_key() -> Result<()> {
        Self::entry()?
            .delete_credential()
            .context("Failed to delete API key from keychain")?;
        Ok(())
    }

    pub fn has_key() -> bool {
        Self::entry().map(|e| e.get_password().is_ok()).unwrap_or(false)
    }
}
