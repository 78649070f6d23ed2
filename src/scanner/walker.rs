//! Parallel repository discovery over a directory tree.
//!
//! Workers share an unbounded work queue of directories. Every queued
//! directory holds one unit of a shared `pending` counter: it is incremented
//! before a directory is enqueued and decremented exactly once after that
//! directory has been handled, whatever the outcome (repository, excluded,
//! already visited, unreadable, or expanded into children). The worker that
//! brings `pending` to zero closes the queue, which releases every idle worker.
//!
//! A directory holding a `.git` entry is a repository leaf; its subtree is
//! never explored, so nested repositories are not reported.
//!
//! The visited-set holds exact paths (canonical ones when symlinks are
//! followed). Case folding belongs to cache identity only: `Team/` and `team/`
//! are both walked.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel as channel;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::cancel::CancellationToken;
use crate::core::config::ScannerConfig;
use crate::core::errors::{RdxError, Result};
use crate::core::paths::{display_name, resolve_absolute_path};
use crate::scanner::grouping::{group_key, presentation_key};
use crate::scanner::marker::find_solution_marker;
use crate::scanner::rules::ScanRules;
use crate::scanner::signature::GIT_DIR_NAME;

/// How long an idle worker waits before re-checking cancellation.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Sorted results buffered between the scan thread and the consumer.
const DELIVERY_BUFFER: usize = 256;

/// A repository found by one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredRepository {
    /// Final path component of `path`.
    pub name: String,
    /// Absolute path of the repository folder.
    pub path: PathBuf,
    /// Always `true` for scanner output.
    pub has_git: bool,
    /// Whether a solution marker was found.
    pub has_solution_marker: bool,
    /// First marker file found, if any.
    pub solution_marker_path: Option<PathBuf>,
    /// Grouping segment, or the category of the first matching override.
    pub group_key: String,
}

/// Counters for one completed scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    /// Directories examined, repository leaves included.
    pub directories_visited: usize,
    /// Directories pruned by an exclusion fragment, plus repositories dropped
    /// for an excluded marker name.
    pub directories_excluded: usize,
    /// Directories reached a second time (followed symlinks).
    pub duplicates_skipped: usize,
    /// Directories or entries that could not be read. Their subtrees are skipped.
    pub read_errors: usize,
    /// Repositories reported.
    pub repositories_found: usize,
    /// Worker threads used.
    pub workers: usize,
    /// Wall time of the walk, sorting excluded.
    pub elapsed_ms: u64,
}

#[derive(Default)]
struct ScanCounters {
    visited: AtomicUsize,
    excluded: AtomicUsize,
    duplicates: AtomicUsize,
    read_errors: AtomicUsize,
    repositories: AtomicUsize,
}

impl ScanCounters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, workers: usize, elapsed: Duration) -> ScanStats {
        ScanStats {
            directories_visited: self.visited.load(Ordering::Relaxed),
            directories_excluded: self.excluded.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            repositories_found: self.repositories.load(Ordering::Relaxed),
            workers,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Work queue with termination detection.
struct WorkQueue {
    tx: Mutex<Option<channel::Sender<PathBuf>>>,
    rx: channel::Receiver<PathBuf>,
    pending: AtomicUsize,
}

impl WorkQueue {
    fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
            pending: AtomicUsize::new(0),
        }
    }

    /// Account for `dir` before it becomes visible to other workers.
    fn push(&self, dir: PathBuf) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let sent = self
            .tx
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(dir).is_ok());
        if !sent {
            self.complete_one();
        }
    }

    /// Mark one dequeued directory as fully handled.
    fn complete_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Nothing queued, nothing in flight: close so idle workers exit.
            self.tx.lock().take();
        }
    }
}

/// Shared, read-only state for one walk.
struct WalkContext<'a> {
    root: &'a Path,
    grouping_segment_index: i32,
    rules: &'a ScanRules,
    queue: &'a WorkQueue,
    visited: &'a Mutex<HashSet<PathBuf>>,
    results: &'a channel::Sender<DiscoveredRepository>,
    counters: &'a ScanCounters,
    cancel: &'a CancellationToken,
}

/// Concurrent repository scanner bound to one rules snapshot.
#[derive(Debug, Clone)]
pub struct RepoScanner {
    rules: Arc<ScanRules>,
    parallelism: usize,
}

impl RepoScanner {
    /// Scanner over `rules` with `parallelism` workers (at least one).
    #[must_use]
    pub fn new(rules: ScanRules, parallelism: usize) -> Self {
        Self {
            rules: Arc::new(rules),
            parallelism: parallelism.max(1),
        }
    }

    /// Snapshot rules and worker count from configuration.
    pub fn from_config(config: &ScannerConfig) -> Result<Self> {
        Ok(Self::new(
            ScanRules::from_config(config)?,
            config.effective_parallelism(),
        ))
    }

    /// The rules snapshot every scan from this scanner uses.
    #[must_use]
    pub fn rules(&self) -> &ScanRules {
        &self.rules
    }

    /// Start scanning `root` in the background.
    ///
    /// Results arrive sorted by `(group_key, name)`, case-insensitively, once the
    /// whole tree has been walked. A missing root yields an empty stream.
    pub fn scan(
        &self,
        root: &Path,
        grouping_segment_index: i32,
        cancel: &CancellationToken,
    ) -> ScanStream {
        let root = resolve_absolute_path(root);
        let (tx, rx) = channel::bounded(DELIVERY_BUFFER);
        let completion = Arc::new(Mutex::new(None));

        if !root.is_dir() {
            *completion.lock() = Some(ScanStats::default());
            drop(tx);
            return ScanStream::new(rx, cancel.clone(), completion, None);
        }

        let rules = Arc::clone(&self.rules);
        let workers = self.parallelism;
        let token = cancel.clone();
        let done = Arc::clone(&completion);

        let spawned = thread::Builder::new()
            .name("rdx-scan".to_string())
            .spawn(move || {
                let (mut repos, stats) =
                    walk_tree(&root, grouping_segment_index, &rules, workers, &token);
                if token.is_cancelled() {
                    return;
                }

                repos.sort_by_cached_key(|r| presentation_key(&r.group_key, &r.name, &r.path));
                *done.lock() = Some(stats);

                for repo in repos {
                    if token.is_cancelled() || tx.send(repo).is_err() {
                        return;
                    }
                }
            });

        let failure = spawned.err().map(|error| RdxError::Runtime {
            details: format!("failed to spawn scan thread: {error}"),
        });
        ScanStream::new(rx, cancel.clone(), completion, failure)
    }

    /// Scan and collect everything, for callers that do not need streaming.
    pub fn scan_all(
        &self,
        root: &Path,
        grouping_segment_index: i32,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredRepository>> {
        self.scan(root, grouping_segment_index, cancel).collect()
    }
}

/// Lazily delivered scan results.
///
/// Yields `Err(RdxError::Cancelled)` once if the token trips before the stream
/// is exhausted, then ends.
pub struct ScanStream {
    rx: channel::Receiver<DiscoveredRepository>,
    cancel: CancellationToken,
    completion: Arc<Mutex<Option<ScanStats>>>,
    failure: Option<RdxError>,
    finished: bool,
}

impl ScanStream {
    fn new(
        rx: channel::Receiver<DiscoveredRepository>,
        cancel: CancellationToken,
        completion: Arc<Mutex<Option<ScanStats>>>,
        failure: Option<RdxError>,
    ) -> Self {
        Self {
            rx,
            cancel,
            completion,
            failure,
            finished: false,
        }
    }

    /// Statistics, available once the walk has finished.
    #[must_use]
    pub fn stats(&self) -> Option<ScanStats> {
        *self.completion.lock()
    }
}

impl Iterator for ScanStream {
    type Item = Result<DiscoveredRepository>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Some(error) = self.failure.take() {
            self.finished = true;
            return Some(Err(error));
        }
        if self.cancel.is_cancelled() {
            self.finished = true;
            return Some(Err(RdxError::Cancelled));
        }

        if let Ok(repo) = self.rx.recv() {
            return Some(Ok(repo));
        }

        self.finished = true;
        if self.cancel.is_cancelled() {
            Some(Err(RdxError::Cancelled))
        } else if self.completion.lock().is_none() {
            // The scan thread went away without publishing results.
            Some(Err(RdxError::ChannelClosed {
                component: "scanner",
            }))
        } else {
            None
        }
    }
}

fn walk_tree(
    root: &Path,
    grouping_segment_index: i32,
    rules: &ScanRules,
    workers: usize,
    cancel: &CancellationToken,
) -> (Vec<DiscoveredRepository>, ScanStats) {
    let start = Instant::now();
    let queue = WorkQueue::new();
    let visited = Mutex::new(HashSet::new());
    let counters = ScanCounters::default();
    let (result_tx, result_rx) = channel::unbounded();

    queue.push(root.to_path_buf());

    let ctx = WalkContext {
        root,
        grouping_segment_index,
        rules,
        queue: &queue,
        visited: &visited,
        results: &result_tx,
        counters: &counters,
        cancel,
    };

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| worker_loop(&ctx));
        }
    });
    drop(result_tx);

    let repos: Vec<DiscoveredRepository> = result_rx.try_iter().collect();
    (repos, counters.snapshot(workers, start.elapsed()))
}

fn worker_loop(ctx: &WalkContext<'_>) {
    loop {
        match ctx.queue.rx.recv_timeout(IDLE_POLL) {
            Ok(dir) => {
                // Once cancelled, queued directories are drained without I/O or
                // new children, so `pending` still reaches zero.
                if ctx.cancel.check().is_ok() {
                    process_directory(&dir, ctx);
                }
                ctx.queue.complete_one();
            }
            Err(channel::RecvTimeoutError::Timeout) => {
                if ctx.cancel.is_cancelled() {
                    return;
                }
            }
            Err(channel::RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Handle one dequeued directory. The caller completes its pending unit.
fn process_directory(dir: &Path, ctx: &WalkContext<'_>) {
    let key = if ctx.rules.follow_symlinks() {
        fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf())
    } else {
        dir.to_path_buf()
    };
    if !ctx.visited.lock().insert(key) {
        ScanCounters::bump(&ctx.counters.duplicates);
        return;
    }

    if ctx.rules.is_excluded(dir) {
        ScanCounters::bump(&ctx.counters.excluded);
        return;
    }

    ScanCounters::bump(&ctx.counters.visited);

    if has_git_metadata(dir) {
        match classify_repository(dir, ctx) {
            Some(repo) => {
                ScanCounters::bump(&ctx.counters.repositories);
                let _ = ctx.results.send(repo);
            }
            None => ScanCounters::bump(&ctx.counters.excluded),
        }
        return;
    }

    let Ok(entries) = fs::read_dir(dir) else {
        ScanCounters::bump(&ctx.counters.read_errors);
        return;
    };

    // Collect first, enqueue after: a half-read directory never leaks children.
    let mut children = Vec::new();
    for entry in entries {
        let Ok(entry) = entry else {
            ScanCounters::bump(&ctx.counters.read_errors);
            continue;
        };
        let Ok(ft) = entry.file_type() else {
            continue;
        };

        let is_dir = if ft.is_symlink() {
            ctx.rules.follow_symlinks() && fs::metadata(entry.path()).is_ok_and(|m| m.is_dir())
        } else {
            ft.is_dir()
        };
        if is_dir {
            children.push(entry.path());
        }
    }

    for child in children {
        ctx.queue.push(child);
    }
}

/// Top-level check only; a symlinked `.git` counts.
fn has_git_metadata(dir: &Path) -> bool {
    fs::metadata(dir.join(GIT_DIR_NAME)).is_ok_and(|m| m.is_dir() || m.is_file())
}

/// Build the record for a repository leaf, or `None` if its marker is excluded.
fn classify_repository(dir: &Path, ctx: &WalkContext<'_>) -> Option<DiscoveredRepository> {
    let marker = find_solution_marker(dir, ctx.rules);

    let marker_excluded = marker
        .as_deref()
        .and_then(Path::file_name)
        .is_some_and(|name| ctx.rules.is_excluded_text(&name.to_string_lossy()));
    if marker_excluded {
        return None;
    }

    let group = ctx
        .rules
        .category_override(dir, marker.as_deref())
        .map_or_else(
            || group_key(ctx.root, dir, ctx.grouping_segment_index),
            str::to_string,
        );

    Some(DiscoveredRepository {
        name: display_name(dir),
        path: dir.to_path_buf(),
        has_git: true,
        has_solution_marker: marker.is_some(),
        solution_marker_path: marker,
        group_key: group,
    })
}
