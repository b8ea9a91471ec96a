use thiserror::Error;

use crate::config::Scope;

/// Errors a fetch hook may surface. None of them is fatal: every variant
/// means "this cycle produced no update, keep the previous data".
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Missing permissions: {}", format_scopes(.0))]
    MissingPermissions(Vec<Scope>),

    #[error("Invalid credential - API key rejected")]
    InvalidCredential,

    #[error("Fetch cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FetchError {
    /// Expected failures are logged without the full error chain.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            FetchError::MissingPermissions(_) | FetchError::InvalidCredential | FetchError::Cancelled
        )
    }
}

fn format_scopes(scopes: &[Scope]) -> String {
    scopes
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors reading or writing the on-disk snapshot.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot file missing: {0}")]
    Missing(String),

    #[error("Invalid last-updated marker '{value}': {source}")]
    Marker {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("Snapshot expired (written {0})")]
    Expired(String),

    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Snapshot task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
