use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Typed scratch data attached to a request
///
/// Values are stored as JSON so a request keeps its temp data when it is
/// written to the failure history and resumed in a later run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Temp(BTreeMap<String, Value>);

impl Temp {
    /// Reads `key` as `T`, logging and returning `None` on a type mismatch
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.0.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::error!("Request temp value {} has unexpected type: {}", key, e);
                None
            }
        }
    }

    /// Stores `value` under `key`
    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> &mut Self {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(v) => {
                self.0.insert(key, v);
            }
            Err(e) => tracing::error!("Request temp value {} cannot be stored: {}", key, e),
        }
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
