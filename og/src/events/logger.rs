//! JSONL event log
//!
//! Appends one `EventRecord` per line to a file so a run can be inspected
//! after the fact with `og events <path>`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use super::sink::EventSink;
use super::types::{EventKind, EventRecord};

/// Event sink that writes events to a JSONL file
pub struct JsonlEventSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlEventSink {
    /// Open (or create) the log file in append mode
    pub fn open(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(?path, "JsonlEventSink::open: called");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Open a log in the default location (`<data-local>/opgate/events.jsonl`)
    pub fn with_default_path() -> eyre::Result<Self> {
        let data_dir = dirs::data_local_dir().ok_or_else(|| eyre::eyre!("Could not determine data directory"))?;
        Self::open(data_dir.join("opgate").join("events.jsonl"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_record(&self, record: &EventRecord) -> eyre::Result<()> {
        let json = serde_json::to_string(record)?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }
}

impl EventSink for JsonlEventSink {
    fn record(&self, kind: EventKind, details: &str) {
        let record = EventRecord::new(kind, details);
        if let Err(e) = self.write_record(&record) {
            error!(path = ?self.path, event = %kind, error = %e, "JsonlEventSink: failed to write event");
        }
    }
}

/// Read events back from a JSONL log
///
/// A missing file yields an empty list; malformed lines are skipped.
pub fn read_events(path: impl AsRef<Path>) -> eyre::Result<Vec<EventRecord>> {
    let path = path.as_ref();
    debug!(?path, "read_events: reading log file");

    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    let mut records = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(line, error = %e, "read_events: failed to parse line");
            }
        }
    }

    debug!(count = records.len(), "read_events: loaded records");
    Ok(records)
}
