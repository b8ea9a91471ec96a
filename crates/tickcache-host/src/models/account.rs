use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    /// Last time the account's progression changed on the server.
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub world: Option<i64>,
}

/// Id of a world boss the account has completed since the last daily reset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldBoss(pub String);

impl WorldBoss {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}
