use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Field names of the job hash.
pub(crate) mod fields {
    pub const TYPE: &str = "Type";
    pub const METHOD: &str = "Method";
    pub const PARAMETER_TYPES: &str = "ParameterTypes";
    pub const ARGUMENTS: &str = "Arguments";
    pub const CREATED_AT: &str = "CreatedAt";
    pub const STATE: &str = "State";
    pub const REASON: &str = "Reason";
    /// When a worker claimed the job; removed on acknowledgement.
    pub const FETCHED: &str = "Fetched";
    /// When the recovery watcher first observed the job in a dequeue list.
    pub const CHECKED: &str = "Checked";
}

/// A serialized job invocation: target type, method, parameter types and
/// argument list. All four are opaque strings owned by the caller's
/// serializer; the core stores and returns them untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInvocation {
    pub type_name: String,
    pub method: String,
    pub parameter_types: String,
    pub arguments: String,
}

/// A job hash as read back from Redis.
#[derive(Debug, Clone)]
pub struct JobData {
    /// The stored invocation, when it was decodable.
    pub invocation: Option<JobInvocation>,
    /// Current state name.
    pub state: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// Set when the invocation fields were missing or unreadable. Surfaced
    /// here instead of failing the read, so the caller can record it in a
    /// failed-state entry without interrupting its fetch loop.
    pub load_error: Option<String>,
}

/// A lifecycle state: the name, an optional human-readable reason, and the
/// state's serialized payload. Used both when applying a state and when
/// reading the `:state` snapshot back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateData {
    pub name: String,
    pub reason: Option<String>,
    pub data: HashMap<String, String>,
}

impl StateData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: None,
            data: HashMap::new(),
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// One entry of a job's `:history` list, stored as a JSON object with the
/// state payload flattened alongside the fixed fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    #[serde(rename = "State")]
    pub state: String,
    #[serde(rename = "Reason", default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(rename = "CreatedAt")]
    pub created_at: String,
    #[serde(flatten)]
    pub data: HashMap<String, String>,
}

/// Serializes a timestamp the way every persisted field stores it:
/// ISO-8601 UTC with microsecond precision.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a stored timestamp; `None` for anything unreadable.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}
