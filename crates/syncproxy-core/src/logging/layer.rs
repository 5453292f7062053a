//! `tracing` layer writing JSONL records

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use super::entry::LogEntry;
use super::writer::EndpointLogWriter;
use crate::error::{SyncError, SyncResult};

/// Writes every event to the endpoint's JSONL file
pub struct JsonlLayer {
    writer: Arc<EndpointLogWriter>,
}

impl JsonlLayer {
    pub fn new(logs_dir: impl AsRef<Path>, endpoint: impl Into<String>) -> std::io::Result<Self> {
        Ok(Self {
            writer: Arc::new(EndpointLogWriter::new(logs_dir, endpoint)?),
        })
    }

    pub fn log_path(&self) -> &Path {
        self.writer.path()
    }

    pub fn endpoint(&self) -> &str {
        self.writer.endpoint()
    }
}

impl<S> Layer<S> for JsonlLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();

        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let mut entry = LogEntry::new(
            metadata.level().as_str().to_lowercase(),
            self.writer.endpoint(),
            metadata.target(),
            visitor.message.unwrap_or_default(),
        );
        if !visitor.fields.is_empty() {
            entry = entry.with_fields(serde_json::Value::Object(visitor.fields));
        }
        if let Some(scope) = ctx.event_scope(event) {
            let path: Vec<&str> = scope.from_root().map(|span| span.name()).collect();
            if !path.is_empty() {
                entry = entry.with_span(path.join(" > "));
            }
        }

        // Logging must never fail the caller
        let _ = self.writer.write(&entry);
    }
}

#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl JsonVisitor {
    fn insert(&mut self, field: &Field, value: serde_json::Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut buf = String::new();
        let _ = write!(buf, "{:?}", value);
        if field.name() == "message" {
            self.message = Some(buf);
        } else {
            self.insert(field, serde_json::Value::String(buf));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.insert(field, serde_json::Value::Number(n));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, serde_json::Value::String(value.to_string()));
    }
}

/// Global subscriber setup: console output, optional JSONL file, env filter
pub struct LoggingBuilder {
    endpoint: String,
    logs_dir: Option<PathBuf>,
    console: bool,
    filter: Option<String>,
}

impl LoggingBuilder {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            logs_dir: None,
            console: true,
            filter: None,
        }
    }

    /// Also write JSONL records under `dir`
    pub fn with_logs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = Some(dir.into());
        self
    }

    pub fn no_console(mut self) -> Self {
        self.console = false;
        self
    }

    /// Filter directive, e.g. `syncproxy_core=debug`; `RUST_LOG` is used when unset
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// The JSONL layer alone, for manual composition
    pub fn build_layer(&self) -> SyncResult<Option<JsonlLayer>> {
        self.logs_dir
            .as_ref()
            .map(|dir| JsonlLayer::new(dir, &self.endpoint))
            .transpose()
            .map_err(SyncError::from)
    }

    /// Install as the global default subscriber
    pub fn init(self) -> SyncResult<()> {
        let filter = match &self.filter {
            Some(directive) => EnvFilter::try_new(directive)
                .map_err(|e| SyncError::Config(format!("invalid log filter: {}", e)))?,
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        };
        let jsonl = self.build_layer()?;
        let console = self.console.then(|| tracing_subscriber::fmt::layer());

        tracing_subscriber::registry()
            .with(filter)
            .with(jsonl)
            .with(console)
            .try_init()
            .map_err(|e| SyncError::Config(format!("logging already initialized: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::read_entries;
    use tempfile::TempDir;
    use tracing_subscriber::prelude::*;

    #[test]
    fn test_layer_captures_structured_fields() {
        let temp = TempDir::new().unwrap();
        let layer = JsonlLayer::new(temp.path(), "core").unwrap();
        let log_path = layer.log_path().to_path_buf();

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("poll");
            let _guard = span.enter();
            tracing::info!(peer = 3u64, "Peer added");
            tracing::warn!(class = "Settings", instance = "core", "Init request for unknown object");
        });

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(content.lines().count(), 2);

        let entries = read_entries(temp.path()).unwrap();
        let warn = entries.iter().find(|e| e.level == "warn").unwrap();
        assert_eq!(warn.endpoint, "core");
        assert_eq!(warn.msg, "Init request for unknown object");
        assert_eq!(warn.field_str("class"), Some("Settings"));
        assert_eq!(warn.span.as_deref(), Some("poll"));
    }

    #[test]
    fn test_builder_without_dir_has_no_layer() {
        let builder = LoggingBuilder::new("client").no_console();
        assert!(builder.build_layer().unwrap().is_none());

        let temp = TempDir::new().unwrap();
        let layer = LoggingBuilder::new("client")
            .with_logs_dir(temp.path())
            .build_layer()
            .unwrap()
            .unwrap();
        assert_eq!(layer.endpoint(), "client");
    }
}
