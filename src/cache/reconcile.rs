//! Mark-and-sweep reconciliation of a fresh scan against the stored cache.
//!
//! One `refresh` pass streams discoveries from the scanner, marks every
//! repository it sees, upserts those whose signature (or display metadata)
//! changed, and only after the scan has completed sweeps the entries that were
//! not seen. The persisted cache is replaced as a whole at the end of a
//! successful pass and never touched by a cancelled one.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

use crate::cache::model::{CachedRepository, RootCache, sort_for_presentation};
use crate::cache::store::{CacheStore, root_cache_key};
use crate::core::cancel::CancellationToken;
use crate::core::errors::{RdxError, Result};
use crate::core::paths::{path_key, resolve_absolute_path};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::scanner::signature;
use crate::scanner::walker::{RepoScanner, ScanStats};

/// Outcome of one successful refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    /// Normalized root that was scanned.
    pub root: PathBuf,
    /// Store key the cache was written under.
    pub root_key: String,
    /// New or changed repositories (one `on_upsert` call each).
    pub upserted: usize,
    /// Repositories no longer present (one `on_remove` call each).
    pub removed: usize,
    /// Repositories seen with an unchanged signature.
    pub unchanged: usize,
    /// Repositories in the cache after the pass.
    pub total: usize,
    /// Scanner counters, when the scan published them.
    pub scan: Option<ScanStats>,
    /// Wall time of the whole refresh.
    pub elapsed_ms: u64,
}

/// Owns a cache store and a scanner; callers serialize refreshes per root.
pub struct ReconciliationService<S: CacheStore> {
    store: S,
    scanner: RepoScanner,
    activity: Option<ActivityLoggerHandle>,
}

impl<S: CacheStore> ReconciliationService<S> {
    /// Service over `store`, discovering with `scanner`.
    #[must_use]
    pub fn new(store: S, scanner: RepoScanner) -> Self {
        Self {
            store,
            scanner,
            activity: None,
        }
    }

    /// Report refresh activity to a background logger.
    #[must_use]
    pub fn with_activity_logger(mut self, handle: ActivityLoggerHandle) -> Self {
        self.activity = Some(handle);
        self
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Last persisted state for `root`, without touching the tree.
    pub fn load_from_cache(&self, root: &Path) -> Result<Vec<CachedRepository>> {
        let root = resolve_absolute_path(root);
        let key = root_cache_key(&root);
        let mut repos = self.read_or_empty(&key, &root)?.repos;
        sort_for_presentation(&mut repos);
        Ok(repos)
    }

    /// Drop the persisted cache for `root`. Returns whether one existed.
    pub fn forget(&self, root: &Path) -> Result<bool> {
        self.store.remove(&root_cache_key(&resolve_absolute_path(root)))
    }

    /// Scan `root` and bring its cache up to date.
    ///
    /// `on_upsert` fires for each new or changed repository as it is
    /// discovered, `on_remove` for each repository that disappeared, after the
    /// scan finished. Both run before the cache is written.
    pub fn refresh<U, R>(
        &self,
        root: &Path,
        grouping_segment_index: i32,
        mut on_upsert: U,
        mut on_remove: R,
        cancel: &CancellationToken,
    ) -> Result<RefreshSummary>
    where
        U: FnMut(&CachedRepository),
        R: FnMut(&Path),
    {
        let start = Instant::now();
        let root = resolve_absolute_path(root);
        let key = root_cache_key(&root);
        let previous = self.read_or_empty(&key, &root)?;

        let mut entries: HashMap<String, CachedRepository> = previous
            .repos
            .into_iter()
            .map(|repo| (path_key(&repo.path), repo))
            .collect();
        let mut seen: HashSet<String> = HashSet::with_capacity(entries.len());
        let mut upserted = 0_usize;
        let mut unchanged = 0_usize;

        let mut stream = self.scanner.scan(&root, grouping_segment_index, cancel);
        for item in stream.by_ref() {
            let repo = match item {
                Ok(repo) => repo,
                Err(err) => {
                    if err.is_cancelled() {
                        self.log(ActivityEvent::RefreshCancelled { root: key.clone() });
                    }
                    return Err(err);
                }
            };

            let path = path_key(&repo.path);
            if !seen.insert(path.clone()) {
                continue;
            }

            let sig = signature::compute(&repo.path, repo.solution_marker_path.as_deref());
            let current = entries
                .get(&path)
                .is_some_and(|cached| cached.signature == sig && cached.describes(&repo));
            if current {
                unchanged += 1;
                continue;
            }

            let updated = CachedRepository::from_discovered(repo, sig, Utc::now());
            on_upsert(&updated);
            self.log(ActivityEvent::RepoUpserted {
                path: updated.path.display().to_string(),
                group: updated.group_key.clone(),
            });
            entries.insert(path, updated);
            upserted += 1;
        }

        // A token tripped after the last item still aborts before the sweep.
        if let Err(err) = cancel.check() {
            self.log(ActivityEvent::RefreshCancelled { root: key.clone() });
            return Err(err);
        }

        let scan_stats = stream.stats();
        if let Some(stats) = scan_stats {
            self.log(ActivityEvent::ScanCompleted {
                root: key.clone(),
                repositories: stats.repositories_found,
                duration_ms: stats.elapsed_ms,
            });
        }

        // Sweep: only a completed scan may decide what disappeared.
        let mut gone: Vec<CachedRepository> = Vec::new();
        entries.retain(|path, repo| {
            if seen.contains(path) {
                true
            } else {
                gone.push(repo.clone());
                false
            }
        });
        sort_for_presentation(&mut gone);
        for repo in &gone {
            on_remove(&repo.path);
            self.log(ActivityEvent::RepoRemoved {
                path: repo.path.display().to_string(),
            });
        }

        let mut cache = RootCache::empty(key.clone(), &root);
        cache.repos = entries.into_values().collect();
        cache.sort_repos();
        cache.cached_at_utc = Utc::now();

        if let Err(err) = self.store.write(&key, &cache) {
            eprintln!("[RDX-CACHE] failed to persist cache {key}: {err}");
            self.log(ActivityEvent::CacheWriteFailed {
                root: key.clone(),
                error_code: err.code().to_string(),
                details: err.to_string(),
                retryable: err.is_retryable(),
            });
            return Err(err);
        }

        let summary = RefreshSummary {
            root,
            root_key: key,
            upserted,
            removed: gone.len(),
            unchanged,
            total: cache.repos.len(),
            scan: scan_stats,
            elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        self.log(ActivityEvent::RefreshCompleted {
            root: summary.root_key.clone(),
            upserted: summary.upserted,
            removed: summary.removed,
            unchanged: summary.unchanged,
            duration_ms: summary.elapsed_ms,
        });
        Ok(summary)
    }

    /// A cache that cannot be decoded is rebuilt from scratch by the next pass.
    fn read_or_empty(&self, key: &str, root: &Path) -> Result<RootCache> {
        match self.store.read(key) {
            Ok(Some(cache)) => Ok(cache),
            Ok(None) => Ok(RootCache::empty(key.to_string(), root)),
            Err(err @ (RdxError::Serialization { .. } | RdxError::CacheCorrupt { .. })) => {
                eprintln!("[RDX-CACHE] WARNING: discarding unreadable cache {key}: {err}");
                self.log(ActivityEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                Ok(RootCache::empty(key.to_string(), root))
            }
            Err(err) => Err(err),
        }
    }

    fn log(&self, event: ActivityEvent) {
        if let Some(handle) = &self.activity {
            handle.send(event);
        }
    }
}
