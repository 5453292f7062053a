//! Append-only JSONL files, one per endpoint per day

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::entry::LogEntry;

/// Appends [`LogEntry`] lines to `<dir>/raw/<date>_<endpoint>.jsonl`
pub struct EndpointLogWriter {
    endpoint: String,
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl EndpointLogWriter {
    pub fn new(logs_dir: impl AsRef<Path>, endpoint: impl Into<String>) -> io::Result<Self> {
        let endpoint = endpoint.into();
        let raw_dir = logs_dir.as_ref().join("raw");
        fs::create_dir_all(&raw_dir)?;

        let date = chrono::Local::now().format("%Y-%m-%d");
        let path = raw_dir.join(format!("{}_{}.jsonl", date, endpoint));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            endpoint,
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one entry as a single flushed line
    pub fn write(&self, entry: &LogEntry) -> io::Result<()> {
        let line = entry
            .to_json_line()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut writer = self.writer.lock();
        writeln!(writer, "{}", line)?;
        writer.flush()
    }

    pub fn flush(&self) -> io::Result<()> {
        self.writer.lock().flush()
    }
}

impl Drop for EndpointLogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Read every entry under `<dir>/raw`, ordered by timestamp
///
/// Lines that do not parse are skipped.
pub fn read_entries(logs_dir: impl AsRef<Path>) -> io::Result<Vec<LogEntry>> {
    read_matching(logs_dir.as_ref(), |_| true)
}

/// Read the entries of one day (`YYYY-MM-DD`)
pub fn read_entries_for_date(logs_dir: impl AsRef<Path>, date: &str) -> io::Result<Vec<LogEntry>> {
    read_matching(logs_dir.as_ref(), |name| name.starts_with(date))
}

fn read_matching(logs_dir: &Path, accept: impl Fn(&str) -> bool) -> io::Result<Vec<LogEntry>> {
    let raw_dir = logs_dir.join("raw");
    if !raw_dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(&raw_dir)? {
        let path = dir_entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(".jsonl") || !accept(name) {
            continue;
        }

        let content = fs::read_to_string(&path)?;
        entries.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .filter_map(|line| LogEntry::from_json_line(line).ok()),
        );
    }

    entries.sort_by(|a, b| a.ts.cmp(&b.ts));
    Ok(entries)
}
