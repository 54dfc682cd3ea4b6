use serde::Deserialize;

use crate::firestore::constants::{
    DEFAULT_DATABASE_ID, DEFAULT_MAX_BATCH_WRITES, DEFAULT_MAX_TRANSACTION_ATTEMPTS,
};
use crate::util::BackoffConfig;

/// Client configuration.
///
/// Can be built in code or deserialized; absent keys take their defaults:
///
/// ```
/// use firestore_query_core::firestore::api::FirestoreSettings;
///
/// let settings: FirestoreSettings =
///     serde_json::from_str(r#"{"project_id": "demo", "max_transaction_attempts": 3}"#).unwrap();
/// assert_eq!(settings.database, "(default)");
/// assert_eq!(settings.max_transaction_attempts, 3);
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct FirestoreSettings {
    pub project_id: String,
    pub database: String,
    /// Attempts made by `run_transaction` before giving up with `aborted`.
    pub max_transaction_attempts: u32,
    pub max_batch_writes: usize,
    /// Delay between transaction attempts after a commit conflict.
    pub transaction_backoff: BackoffConfig,
}

impl Default for FirestoreSettings {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            database: DEFAULT_DATABASE_ID.to_string(),
            max_transaction_attempts: DEFAULT_MAX_TRANSACTION_ATTEMPTS,
            max_batch_writes: DEFAULT_MAX_BATCH_WRITES,
            transaction_backoff: BackoffConfig::default(),
        }
    }
}

impl FirestoreSettings {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_max_transaction_attempts(mut self, attempts: u32) -> Self {
        self.max_transaction_attempts = attempts;
        self
    }

    pub fn with_max_batch_writes(mut self, max_batch_writes: usize) -> Self {
        self.max_batch_writes = max_batch_writes;
        self
    }

    pub fn with_transaction_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.transaction_backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = FirestoreSettings::new("demo");
        assert_eq!(settings.project_id, "demo");
        assert_eq!(settings.database, "(default)");
        assert_eq!(settings.max_transaction_attempts, 5);
        assert_eq!(settings.max_batch_writes, 500);
    }

    #[test]
    fn deserializes_nested_backoff() {
        let settings: FirestoreSettings = serde_json::from_str(
            r#"{"project_id": "demo", "transaction_backoff": {"interval_millis": 0}}"#,
        )
        .unwrap();
        assert_eq!(settings.transaction_backoff.interval_millis, 0);
        assert_eq!(settings.max_batch_writes, 500);
    }
}
