//! Background activity logger.
//!
//! A dedicated thread owns the [`JsonlWriter`]. Producers hold a cloneable
//! [`ActivityLoggerHandle`] and enqueue [`ActivityEvent`]s on a bounded
//! crossbeam channel with `try_send`, so a slow disk never stalls a refresh.
//! Events that do not fit are counted and reported once the thread catches up.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{RdxError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

const CHANNEL_CAPACITY: usize = 1024;

/// Something worth recording about a refresh. Fields mirror [`LogEntry`].
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityEvent {
    /// A refresh is starting with the given config.
    RefreshStarted {
        root: String,
        config_hash: String,
    },
    /// The walk of a root finished.
    ScanCompleted {
        root: String,
        repositories: usize,
        duration_ms: u64,
    },
    /// A refresh persisted its cache.
    RefreshCompleted {
        root: String,
        upserted: usize,
        removed: usize,
        unchanged: usize,
        duration_ms: u64,
    },
    /// A refresh stopped before the sweep.
    RefreshCancelled {
        root: String,
    },
    /// A repository was added or changed.
    RepoUpserted {
        path: String,
        group: String,
    },
    /// A repository disappeared.
    RepoRemoved {
        path: String,
    },
    /// Persisting the cache failed; the refresh returns the error.
    CacheWriteFailed {
        root: String,
        error_code: String,
        details: String,
        retryable: bool,
    },
    /// Any other failure.
    Error {
        code: String,
        message: String,
    },
    /// Stop the logger thread after flushing.
    Shutdown,
}

/// Cheap-to-clone sender side of the activity log.
#[derive(Debug, Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Never blocks. A full channel drops the event and bumps the counter.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Events dropped and not yet reported by the logger thread.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks only if the queue is full.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

/// Logger thread settings.
#[derive(Debug, Clone)]
pub struct ActivityLoggerConfig {
    /// Destination and rotation of the JSONL file.
    pub jsonl: JsonlConfig,
    /// Events buffered before `send` starts dropping.
    pub channel_capacity: usize,
}

impl ActivityLoggerConfig {
    /// Default channel capacity for `jsonl`.
    #[must_use]
    pub fn new(jsonl: JsonlConfig) -> Self {
        Self {
            jsonl,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Spawn the logger thread. It exits on [`ActivityLoggerHandle::shutdown`] or
/// once every handle has been dropped.
pub fn spawn_activity_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let join = thread::Builder::new()
        .name("rdx-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config.jsonl, &dropped))
        .map_err(|err| RdxError::Runtime {
            details: format!("failed to spawn logger thread: {err}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<ActivityEvent>, jsonl: JsonlConfig, dropped: &AtomicU64) {
    let mut writer = JsonlWriter::open(jsonl);

    while let Ok(event) = rx.recv() {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            let mut entry = LogEntry::new(EventType::LogDropped, Severity::Warning);
            entry.details = Some(format!("{lost} activity events dropped under back-pressure"));
            writer.write_entry(&entry);
        }

        if event == ActivityEvent::Shutdown {
            break;
        }
        writer.write_entry(&to_log_entry(event));
    }

    writer.flush();
}

fn to_log_entry(event: ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::RefreshStarted { root, config_hash } => {
            let mut e = LogEntry::new(EventType::RefreshStart, Severity::Info);
            e.root = Some(root);
            e.details = Some(format!("config_hash={config_hash}"));
            e
        }
        ActivityEvent::ScanCompleted {
            root,
            repositories,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::ScanComplete, Severity::Info);
            e.root = Some(root);
            e.repositories = Some(repositories);
            e.duration_ms = Some(duration_ms);
            e
        }
        ActivityEvent::RefreshCompleted {
            root,
            upserted,
            removed,
            unchanged,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::RefreshComplete, Severity::Info);
            e.root = Some(root);
            e.upserted = Some(upserted);
            e.removed = Some(removed);
            e.unchanged = Some(unchanged);
            e.duration_ms = Some(duration_ms);
            e
        }
        ActivityEvent::RefreshCancelled { root } => {
            let mut e = LogEntry::new(EventType::RefreshCancelled, Severity::Warning);
            e.root = Some(root);
            e
        }
        ActivityEvent::RepoUpserted { path, group } => {
            let mut e = LogEntry::new(EventType::RepoUpserted, Severity::Info);
            e.path = Some(path);
            e.group = Some(group);
            e
        }
        ActivityEvent::RepoRemoved { path } => {
            let mut e = LogEntry::new(EventType::RepoRemoved, Severity::Info);
            e.path = Some(path);
            e
        }
        ActivityEvent::CacheWriteFailed {
            root,
            error_code,
            details,
            retryable,
        } => {
            let mut e = LogEntry::new(EventType::CacheWriteFailed, Severity::Error);
            e.root = Some(root);
            e.error_code = Some(error_code);
            e.details = Some(details);
            e.retryable = Some(retryable);
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Error);
            e.error_code = Some(code);
            e.details = Some(message);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::Error, Severity::Warning),
    }
}
