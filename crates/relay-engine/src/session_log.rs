//! Relay session log.
//!
//! A plain timestamped text record of client lifecycle events, toggled
//! from the relay CLI. Disabled by default; a no-op while off.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::Local;
use tracing::info;

/// Append-only timestamped relay log.
pub struct SessionLog {
    file: Mutex<Option<BufWriter<std::fs::File>>>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self {
            file: Mutex::new(None),
        }
    }

    /// Begin logging to `path`, appending if it exists.
    pub fn enable(&self, path: &Path) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(BufWriter::new(file));
        drop(guard);
        self.line("relay log opened");
        info!(path = %path.display(), "relay session logging enabled");
        Ok(())
    }

    /// Stop logging and flush.
    pub fn disable(&self) {
        self.line("relay log closed");
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut writer) = guard.take() {
            let _ = writer.flush();
        }
    }

    /// Whether logging is active.
    pub fn is_enabled(&self) -> bool {
        self.file
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Append one event line; a no-op while disabled.
    pub fn line(&self, event: &str) {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(writer) = guard.as_mut() {
            let stamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            let _ = writeln!(writer, "[{stamp}] {event}");
            let _ = writer.flush();
        }
    }
}

impl Default for SessionLog {
    fn default() -> Self {
        Self::new()
    }
}
