//! Human-readable session log.
//!
//! A plain append-only text file of timestamped one-line events, toggled
//! at runtime from the command shell. Distinct from `tracing` output:
//! the session log is an operator-facing artifact of one streaming
//! session, not diagnostics.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::Local;
use tracing::info;

use crate::error::{EndpointError, Result};

/// Append-only timestamped session log.
pub struct SessionLogger {
    file: Mutex<Option<BufWriter<std::fs::File>>>,
}

impl SessionLogger {
    /// Create a disabled logger.
    pub fn new() -> Self {
        Self {
            file: Mutex::new(None),
        }
    }

    /// Begin logging to `path`, appending if it exists.
    pub fn enable(&self, path: &Path) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(EndpointError::SessionLog)?;
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(BufWriter::new(file));
        drop(guard);
        self.log("session log opened");
        info!(path = %path.display(), "session logging enabled");
        Ok(())
    }

    /// Stop logging and flush the file.
    pub fn disable(&self) {
        self.log("session log closed");
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut writer) = guard.take() {
            let _ = writer.flush();
            info!("session logging disabled");
        }
    }

    /// Whether logging is currently active.
    pub fn is_enabled(&self) -> bool {
        self.file
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Append one event line; a no-op while disabled.
    pub fn log(&self, event: &str) {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(writer) = guard.as_mut() {
            let stamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            let _ = writeln!(writer, "[{stamp}] {event}");
            let _ = writer.flush();
        }
    }
}

impl Default for SessionLogger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_lines_while_enabled() {
        let dir = std::env::temp_dir().join("audsync-logger-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("session.log");
        std::fs::remove_file(&path).ok();

        let logger = SessionLogger::new();
        logger.log("before enable is dropped");
        assert!(!logger.is_enabled());

        logger.enable(&path).unwrap();
        assert!(logger.is_enabled());
        logger.log("streaming started");
        logger.disable();
        logger.log("after disable is dropped");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("streaming started"));
        assert!(!contents.contains("dropped"));
        // Each line carries a timestamp prefix.
        assert!(contents.lines().all(|l| l.starts_with('[')));

        std::fs::remove_file(&path).ok();
    }
}
