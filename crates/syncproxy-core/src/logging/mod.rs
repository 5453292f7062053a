//! Per-endpoint JSONL logging
//!
//! Every hub in a session (the core and each client) can write its own
//! append-only JSONL file, so several endpoints running side by side never
//! interleave partial lines.
//!
//! ```text
//! logs/
//! └── raw/                        one file per endpoint per day
//!     ├── 2026-10-19_core.jsonl
//!     └── 2026-10-19_client.jsonl
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use syncproxy_core::logging::LoggingBuilder;
//!
//! LoggingBuilder::new("core")
//!     .with_logs_dir("./logs")
//!     .with_filter("syncproxy_core=debug")
//!     .init()?;
//! ```
//!
//! ```bash
//! # Dropped protocol messages
//! jq 'select(.level == "warn")' logs/raw/*.jsonl
//!
//! # Everything concerning one object
//! jq 'select(.fields.class == "Settings")' logs/raw/*.jsonl
//! ```

pub mod entry;
pub mod layer;
pub mod writer;

pub use entry::LogEntry;
pub use layer::{JsonlLayer, LoggingBuilder};
pub use writer::{read_entries, read_entries_for_date, EndpointLogWriter};
