//! Append-only JSONL activity log.
//!
//! Every entry is serialized to one line and handed to the file with a single
//! `write_all`, so a concurrent `tail -f` never sees half a record.
//!
//! When the log file cannot be opened or written, the writer degrades to
//! stderr (prefixed `[RDX-JSONL]`) and, if that fails too, discards entries.
//! Logging never turns into a refresh failure.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::config::LoggingConfig;
use crate::core::errors::{RdxError, Result};

const WRITE_BUFFER: usize = 16 * 1024;

/// Entry severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Normal progress.
    Info,
    /// Degraded but handled (cancellation, dropped events).
    Warning,
    /// An operation failed.
    Error,
}

/// Kind of record, serialized in `snake_case`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A refresh began; `details` carries the config hash.
    RefreshStart,
    /// The scanner finished walking a root.
    ScanComplete,
    /// A refresh persisted its cache.
    RefreshComplete,
    /// A refresh stopped on cancellation without writing.
    RefreshCancelled,
    /// A repository was added or changed.
    RepoUpserted,
    /// A repository disappeared from its root.
    RepoRemoved,
    /// Persisting a root cache failed.
    CacheWriteFailed,
    /// Events were lost under back-pressure.
    LogDropped,
    /// Any other failure worth recording.
    Error,
}

/// One JSONL record. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC, millisecond precision.
    pub ts: String,
    /// Record kind.
    pub event: EventType,
    /// Record severity.
    pub severity: Severity,
    /// Cache key of the root involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// Repository path involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Group key of an upserted repository.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Repositories found by a scan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repositories: Option<usize>,
    /// Upserts in a completed refresh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upserted: Option<usize>,
    /// Removals in a completed refresh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<usize>,
    /// Unchanged repositories in a completed refresh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unchanged: Option<usize>,
    /// Duration of the scan or refresh in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// `RDX-xxxx` code of a failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Freeform details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Whether the failure may clear up on its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl LogEntry {
    /// Entry stamped with the current time and no optional fields.
    #[must_use]
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: utc_now_rfc3339(),
            event,
            severity,
            root: None,
            path: None,
            group: None,
            repositories: None,
            upserted: None,
            removed: None,
            unchanged: None,
            duration_ms: None,
            error_code: None,
            details: None,
            retryable: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    File,
    Stderr,
    Discard,
}

/// Where and how much to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonlConfig {
    /// Live log file.
    pub path: PathBuf,
    /// Rotate once the live file would grow past this.
    pub max_size_bytes: u64,
    /// Rotated files kept; `activity.jsonl.1` is the newest.
    pub max_rotated_files: u32,
}

impl JsonlConfig {
    /// Rotation limits from the `logging` config section.
    #[must_use]
    pub fn from_logging(path: PathBuf, logging: &LoggingConfig) -> Self {
        Self {
            path,
            max_size_bytes: logging.max_size_bytes,
            max_rotated_files: logging.max_rotated_files,
        }
    }
}

/// Line writer with rotation and a stderr fallback.
pub struct JsonlWriter {
    config: JsonlConfig,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    bytes_written: u64,
}

impl JsonlWriter {
    /// Open (or create) the log file; falls back to stderr when that fails.
    #[must_use]
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            writer: None,
            state: WriterState::Discard,
            bytes_written: 0,
        };
        match open_append(&writer.config.path) {
            Ok((file, size)) => writer.attach(file, size),
            Err(err) => {
                writer.state = WriterState::Stderr;
                let _ = writeln!(
                    io::stderr(),
                    "[RDX-JSONL] cannot open activity log, using stderr: {err}"
                );
            }
        }
        writer
    }

    /// Append one entry as a single line, rotating first if it would not fit.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(mut line) => {
                line.push('\n');
                self.write_line(&line);
            }
            Err(err) => {
                let _ = writeln!(io::stderr(), "[RDX-JSONL] serialize error: {err}");
            }
        }
    }

    /// Flush buffered lines; a failing file degrades to stderr.
    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            if w.flush().is_err() {
                self.degrade();
            }
        }
    }

    /// Current sink: `"file"`, `"stderr"` or `"discard"`.
    #[must_use]
    pub fn state(&self) -> &'static str {
        match self.state {
            WriterState::File => "file",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    /// Configured log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn attach(&mut self, file: File, size: u64) {
        self.writer = Some(BufWriter::with_capacity(WRITE_BUFFER, file));
        self.state = WriterState::File;
        self.bytes_written = size;
    }

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if self.state == WriterState::File
            && self.bytes_written > 0
            && self.bytes_written + len > self.config.max_size_bytes
        {
            self.rotate();
        }

        match self.state {
            WriterState::File => {
                let ok = self
                    .writer
                    .as_mut()
                    .is_some_and(|w| w.write_all(line.as_bytes()).is_ok());
                if ok {
                    self.bytes_written += len;
                } else {
                    self.degrade();
                    self.write_line(line);
                }
            }
            WriterState::Stderr => {
                if write!(io::stderr(), "[RDX-JSONL] {line}").is_err() {
                    self.degrade();
                }
            }
            WriterState::Discard => {}
        }
    }

    fn degrade(&mut self) {
        self.writer = None;
        self.state = match self.state {
            WriterState::File => {
                let _ = writeln!(io::stderr(), "[RDX-JSONL] log write failed, using stderr");
                WriterState::Stderr
            }
            WriterState::Stderr | WriterState::Discard => WriterState::Discard,
        };
    }

    /// `activity.jsonl` becomes `.1`, `.1` becomes `.2`, and the oldest is dropped.
    fn rotate(&mut self) {
        if let Some(mut w) = self.writer.take() {
            let _ = w.flush();
        }

        let base = self.config.path.clone();
        let keep = self.config.max_rotated_files;
        if keep == 0 {
            let _ = fs::remove_file(&base);
        } else {
            let _ = fs::remove_file(rotated_name(&base, keep));
            for index in (1..keep).rev() {
                let _ = fs::rename(rotated_name(&base, index), rotated_name(&base, index + 1));
            }
            let _ = fs::rename(&base, rotated_name(&base, 1));
        }

        match open_append(&base) {
            Ok((file, size)) => self.attach(file, size),
            Err(_) => self.degrade(),
        }
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }
}

fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| RdxError::io(parent, err))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| RdxError::io(path, err))?;
    let size = file.metadata().map_or(0, |m| m.len());
    Ok((file, size))
}

fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn utc_now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
