use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::AuditSettings;
use crate::events::{NotificationSink, TransitionEvent};

/// Writes transition events as NDJSON lines
pub struct AuditLogger {
    max_size_bytes: u64,
    file_path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl AuditLogger {
    /// Create a logger for the configured file; `None` when auditing is disabled
    pub fn from_settings(settings: &AuditSettings) -> Option<Self> {
        settings
            .enabled
            .then(|| Self::new(settings.path.clone(), settings.max_size_bytes))
    }

    pub fn new(file_path: PathBuf, max_size_bytes: u64) -> Self {
        let writer = Self::open_writer(&file_path);
        Self {
            max_size_bytes,
            file_path,
            writer: Mutex::new(writer),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Serialize the event as a single JSON line and append it
    pub fn log(&self, event: &TransitionEvent) {
        let mut guard = self.writer.lock();
        if guard.is_none() {
            *guard = Self::open_writer(&self.file_path);
        }

        let Some(writer) = guard.as_mut() else {
            return;
        };

        match serde_json::to_string(event) {
            Ok(json) => {
                if writeln!(writer, "{}", json).and_then(|_| writer.flush()).is_err() {
                    tracing::warn!(path = %self.file_path.display(), "Audit write failed, reopening on next event");
                    *guard = None;
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize audit event");
                return;
            }
        }

        self.maybe_rotate(&mut guard);
    }

    /// Open or create the log file for appending
    fn open_writer(file_path: &Path) -> Option<BufWriter<File>> {
        if let Some(dir) = file_path.parent() {
            if let Err(e) = fs::create_dir_all(dir) {
                tracing::warn!(error = %e, "Failed to create audit directory");
                return None;
            }
        }

        match OpenOptions::new().create(true).append(true).open(file_path) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(e) => {
                tracing::warn!(path = %file_path.display(), error = %e, "Failed to open audit log");
                None
            }
        }
    }

    /// Rotate the log file to `.1` once it reaches max_size_bytes
    fn maybe_rotate(&self, writer: &mut Option<BufWriter<File>>) {
        let Ok(metadata) = fs::metadata(&self.file_path) else {
            return;
        };

        if metadata.len() >= self.max_size_bytes {
            *writer = None;
            let rotated = self.file_path.with_extension("ndjson.1");
            if let Err(e) = fs::rename(&self.file_path, &rotated) {
                tracing::warn!(error = %e, "Failed to rotate audit log");
            }
            *writer = Self::open_writer(&self.file_path);
        }
    }
}

impl NotificationSink for AuditLogger {
    fn notify(&self, event: &TransitionEvent) {
        self.log(event);
    }
}
