//! Device profile and filter matching

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON description of the local device
///
/// Shaped like a user-agent parse: `{"device": {"type": ...}, "os": {"name":
/// ...}, "client": {"name": ..., "version": ...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceProfile(Value);

impl DeviceProfile {
    /// Wrap a JSON value; anything other than an object becomes empty
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(_) => Self(value),
            _ => Self(Value::Object(Map::new())),
        }
    }

    /// Profile of the machine the process runs on
    pub fn host() -> Self {
        Self(serde_json::json!({
            "device": { "type": "desktop" },
            "os": { "name": std::env::consts::OS, "platform": std::env::consts::ARCH },
            "client": { "type": "library", "name": "peerbus", "version": env!("CARGO_PKG_VERSION") },
        }))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// `device.type`, e.g. "desktop" or "smartphone"
    pub fn device_type(&self) -> Option<&str> {
        self.0.get("device")?.get("type")?.as_str()
    }

    /// Whether `filter` is a subset of this profile
    pub fn matches(&self, filter: &Value) -> bool {
        is_subset(filter, &self.0)
    }

    /// The profile plus a `name` field, as sent by `device_info`
    pub fn describe(&self, name: &str) -> Value {
        let mut out = Map::new();
        out.insert("name".to_string(), Value::String(name.to_string()));
        if let Value::Object(fields) = &self.0 {
            for (key, value) in fields {
                out.insert(key.clone(), value.clone());
            }
        }
        Value::Object(out)
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::host()
    }
}

/// Recursive JSON subset check
///
/// Objects match when every key of `filter` is present in `target` with a
/// matching value; arrays when every filter element matches some target
/// element; scalars by equality.
pub fn is_subset(filter: &Value, target: &Value) -> bool {
    match (filter, target) {
        (Value::Object(f), Value::Object(t)) => f
            .iter()
            .all(|(key, value)| t.get(key).is_some_and(|tv| is_subset(value, tv))),
        (Value::Array(f), Value::Array(t)) => f.iter().all(|fv| t.iter().any(|tv| is_subset(fv, tv))),
        _ => filter == target,
    }
}
