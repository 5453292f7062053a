//! One JSONL log record

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A single log record, one per line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 timestamp with millisecond precision
    pub ts: String,
    pub level: String,
    /// Endpoint that wrote the record, e.g. "core" or "client-1"
    pub endpoint: String,
    pub target: String,
    pub msg: String,
    /// Structured event fields (`class`, `peer`, `wire_name`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<JsonValue>,
    /// Span path, outermost first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

impl LogEntry {
    pub fn new(
        level: impl Into<String>,
        endpoint: impl Into<String>,
        target: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: level.into(),
            endpoint: endpoint.into(),
            target: target.into(),
            msg: msg.into(),
            fields: None,
            span: None,
        }
    }

    pub fn with_fields(mut self, fields: JsonValue) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }

    /// Look up a structured field as a string
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.as_ref()?.get(name)?.as_str()
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}
