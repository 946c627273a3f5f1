//! Diagnostics context shared by the vision and automation layers.
//!
//! Every log line goes to three places: the optional log file (with a
//! `[HH:MM:SS.mmm]` prefix), the host's log callback, and `tracing`.
//! Failures are additionally kept as structured [`ErrorRecord`]s with
//! per-severity counters, and the context knows where diagnostic
//! screenshots belong.

use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Host callback receiving human-readable log lines.
pub type LogCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// One recorded failure.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Local>,
    pub severity: Severity,
    pub operation: String,
    pub message: String,
    pub screenshot: Option<PathBuf>,
}

#[derive(Default)]
pub struct Diagnostics {
    log_file: Option<PathBuf>,
    screenshot_dir: Option<PathBuf>,
    sink: Mutex<Option<LogCallback>>,
    records: Mutex<Vec<ErrorRecord>>,
}

impl Diagnostics {
    /// Creates a context that only logs through `tracing`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends every log line to `path`.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Enables diagnostic screenshots under `dir`.
    pub fn with_screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = Some(dir.into());
        self
    }

    /// Replaces the host log callback.
    pub fn set_log_sink(&self, sink: Option<LogCallback>) {
        if let Ok(mut slot) = self.sink.lock() {
            *slot = sink;
        }
    }

    pub fn screenshot_dir(&self) -> Option<&Path> {
        self.screenshot_dir.as_deref()
    }

    /// Logs an informational message.
    pub fn log(&self, msg: &str) {
        tracing::info!("{}", msg);
        self.emit(msg);
    }

    /// Logs a warning without recording it as a failure.
    pub fn warn(&self, msg: &str) {
        tracing::warn!("{}", msg);
        self.emit(msg);
    }

    /// Records a failure and logs it.
    pub fn record(
        &self,
        severity: Severity,
        operation: &str,
        message: &str,
        screenshot: Option<PathBuf>,
    ) {
        let line = match &screenshot {
            Some(path) => format!(
                "[{}] {}: {} (screenshot: {})",
                severity,
                operation,
                message,
                path.display()
            ),
            None => format!("[{}] {}: {}", severity, operation, message),
        };
        match severity {
            Severity::Info => tracing::info!("{}", line),
            Severity::Warning => tracing::warn!("{}", line),
            Severity::Error | Severity::Critical => tracing::error!("{}", line),
        }
        self.emit(&line);

        if let Ok(mut records) = self.records.lock() {
            records.push(ErrorRecord {
                timestamp: Local::now(),
                severity,
                operation: operation.to_string(),
                message: message.to_string(),
                screenshot,
            });
        }
    }

    /// Path for a new diagnostic screenshot named `<tag>_<YYYYmmdd_HHMMSS>.png`.
    ///
    /// Returns `None` when screenshots are disabled or the directory cannot
    /// be created.
    pub fn screenshot_path(&self, tag: &str) -> Option<PathBuf> {
        let dir = self.screenshot_dir.as_ref()?;
        fs::create_dir_all(dir).ok()?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        Some(dir.join(format!("{}_{}.png", tag, timestamp)))
    }

    /// Snapshot of all recorded failures.
    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of recorded failures per severity.
    pub fn counts(&self) -> HashMap<Severity, usize> {
        let mut counts = HashMap::new();
        if let Ok(records) = self.records.lock() {
            for record in records.iter() {
                *counts.entry(record.severity).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }

    fn emit(&self, msg: &str) {
        if let Some(path) = &self.log_file {
            let timestamp = Local::now().format("%H:%M:%S%.3f");
            let line = format!("[{}] {}\n", timestamp, msg);
            if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
                let _ = file.write_all(line.as_bytes());
            }
        }

        let sink = self.sink.lock().ok().and_then(|s| s.clone());
        if let Some(sink) = sink {
            sink(msg);
        }
    }
}

/// Text of a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
