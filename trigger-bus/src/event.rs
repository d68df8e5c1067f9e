//! Trigger event envelope handed to handlers

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// One handler invocation's view of a mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Event ID (UUIDv7 for ordering)
    pub id: Uuid,

    /// Pattern that matched
    pub pattern: String,

    /// Concrete path of the watched node
    pub path: String,

    /// Captured pattern parameters
    pub params: HashMap<String, String>,

    /// Watched value before the write
    pub before: Option<Value>,

    /// Watched value after the write
    pub after: Option<Value>,

    /// When the write was applied
    pub timestamp: DateTime<Utc>,
}

impl TriggerEvent {
    /// Captured parameter by name
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Deserialize the value before the write
    pub fn before_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        decode(self.before.as_ref())
    }

    /// Deserialize the value after the write
    pub fn after_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        decode(self.after.as_ref())
    }
}

fn decode<T: DeserializeOwned>(value: Option<&Value>) -> Result<Option<T>> {
    value
        .map(|v| serde_json::from_value(v.clone()))
        .transpose()
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_access() {
        let event = TriggerEvent {
            id: Uuid::now_v7(),
            pattern: "ride_otps/{rideId}/attempts".to_string(),
            path: "ride_otps/r1/attempts".to_string(),
            params: HashMap::from([("rideId".to_string(), "r1".to_string())]),
            before: None,
            after: Some(json!(3)),
            timestamp: Utc::now(),
        };

        assert_eq!(event.param("rideId"), Some("r1"));
        assert_eq!(event.after_as::<u32>().unwrap(), Some(3));
        assert_eq!(event.before_as::<u32>().unwrap(), None);
        assert!(event.after_as::<String>().is_err());
    }
}
