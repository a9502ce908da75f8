//! A single enrolment provider's working state for one user/course pair.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{StateError, StateResult};

/// Maximum number of log entries retained per record.
pub const MAX_LOG_ENTRIES: usize = 30;

/// A `(unix timestamp, message)` log line. Serializes as a two-element array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry(pub i64, pub String);

impl LogEntry {
    pub fn timestamp(&self) -> i64 {
        self.0
    }

    pub fn message(&self) -> &str {
        &self.1
    }
}

/// Provider state record.
///
/// Serialized form is `{"d": {...}, "l": [[ts, "msg"], ...]}` with `d` first
/// and data keys in insertion order. Null values are never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderState {
    #[serde(rename = "d")]
    data: Map<String, Value>,
    #[serde(rename = "l")]
    logs: Vec<LogEntry>,
}

impl ProviderState {
    /// Create an empty record.
    pub fn create() -> Self {
        Self::default()
    }

    /// Rebuild a record from its serialized form.
    ///
    /// `raw` may be the structured mapping itself or a JSON string holding it.
    /// Empty or unparsable input is an error; a missing `d` or `l` defaults to
    /// empty. An empty array is accepted for either field.
    pub fn from_serialized(raw: &Value) -> StateResult<Self> {
        let parsed;
        let raw = match raw {
            Value::String(s) => {
                parsed = parse_json(s)?;
                &parsed
            }
            other => other,
        };

        let object = match raw {
            Value::Object(map) if !map.is_empty() => map,
            Value::Object(_) | Value::Null => return Err(StateError::Empty),
            Value::Array(items) if items.is_empty() => return Err(StateError::Empty),
            _ => return Err(StateError::malformed("expected a JSON object")),
        };

        let data = match object.get("d") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            Some(Value::Array(items)) if items.is_empty() => Map::new(),
            Some(_) => return Err(StateError::malformed("`d` must be an object")),
        };

        let logs = match object.get("l") {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => serde_json::from_value::<Vec<LogEntry>>(value.clone())
                .map_err(|e| StateError::malformed(format!("`l`: {e}")))?,
        };

        Ok(Self { data, logs })
    }

    /// Convenience for `from_serialized` over a raw JSON string.
    pub fn from_json_str(s: &str) -> StateResult<Self> {
        Self::from_serialized(&Value::String(s.to_string()))
    }

    /// Stored value for `key`, `None` when unset.
    pub fn get_stored_value(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Set `key` to `value`; a null value removes the key.
    pub fn set_stored_value(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        match value.into() {
            Value::Null => {
                self.data.shift_remove(&key);
            }
            value => {
                self.data.insert(key, value);
            }
        }
    }

    /// Append a message stamped with the current time, dropping the oldest
    /// entries beyond `MAX_LOG_ENTRIES`.
    pub fn add_log_message(&mut self, message: impl Into<String>) {
        self.push_log(LogEntry(Utc::now().timestamp(), message.into()));
    }

    fn push_log(&mut self, entry: LogEntry) {
        self.logs.push(entry);
        if self.logs.len() > MAX_LOG_ENTRIES {
            let excess = self.logs.len() - MAX_LOG_ENTRIES;
            self.logs.drain(..excess);
        }
    }

    /// Log entries, oldest first.
    pub fn get_logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.logs.is_empty()
    }

    pub fn to_value(&self) -> StateResult<Value> {
        serde_json::to_value(self).map_err(|e| StateError::Encode(e.to_string()))
    }

    pub fn to_json_string(&self) -> StateResult<String> {
        serde_json::to_string(self).map_err(|e| StateError::Encode(e.to_string()))
    }
}

fn parse_json(s: &str) -> StateResult<Value> {
    if s.trim().is_empty() {
        return Err(StateError::Empty);
    }
    serde_json::from_str(s).map_err(|e| StateError::malformed(e.to_string()))
}
