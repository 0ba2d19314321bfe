//! Key/value JSON storage port. Last writer wins; no transactions.

use crate::domain::DomainError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Load the named document. Missing documents load as an empty mapping.
    async fn load(&self, name: &str) -> Result<Map<String, Value>, DomainError>;

    async fn save(&self, name: &str, doc: &Map<String, Value>) -> Result<(), DomainError>;
}

impl dyn KvStore {
    /// Load a document whose values all share one type. Entries that do not parse are skipped.
    pub async fn load_as<T: DeserializeOwned>(
        &self,
        name: &str,
    ) -> Result<BTreeMap<String, T>, DomainError> {
        let doc = self.load(name).await?;
        let mut out = BTreeMap::new();
        for (key, value) in doc {
            match serde_json::from_value(value) {
                Ok(v) => {
                    out.insert(key, v);
                }
                Err(e) => warn!(document = name, key = %key, error = %e, "skipping malformed entry"),
            }
        }
        Ok(out)
    }

    pub async fn save_as<T: Serialize>(
        &self,
        name: &str,
        entries: &BTreeMap<String, T>,
    ) -> Result<(), DomainError> {
        let mut doc = Map::new();
        for (key, value) in entries {
            let v = serde_json::to_value(value).map_err(|e| DomainError::Storage(e.to_string()))?;
            doc.insert(key.clone(), v);
        }
        self.save(name, &doc).await
    }
}

/// Names of the documents kept in the key/value store.
pub mod docs {
    /// nickname -> phone
    pub const PHONE_NUMBERS: &str = "phone_numbers";
    /// nickname -> [Group]
    pub const USER_GROUPS: &str = "user_groups";
    /// username -> TokenRecord
    pub const API_TOKENS: &str = "api_tokens";
    /// monitoring instance id -> lock entry
    pub const RUNNING_INSTANCES: &str = "running_instances";
    /// "<user>:<group_id>" -> last seen message id
    pub const MONITOR_STATE: &str = "monitor_state";
}
