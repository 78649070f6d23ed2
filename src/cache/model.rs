//! Persisted cache records.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scanner::grouping::presentation_key;
use crate::scanner::signature::Signature;
use crate::scanner::walker::DiscoveredRepository;

/// One repository as last confirmed on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRepository {
    /// Final path component of `path`.
    pub name: String,
    /// Absolute repository path; its lower-cased form is the cache identity.
    pub path: PathBuf,
    /// Always `true` for scanner-produced entries.
    pub has_git: bool,
    /// Whether a solution marker was found.
    pub has_solution_marker: bool,
    /// Marker file found when the entry was last upserted.
    pub solution_marker_path: Option<PathBuf>,
    /// Group shown to users.
    pub group_key: String,
    /// Fingerprint compared on the next refresh.
    pub signature: Signature,
    /// When the entry was last upserted. Unchanged passes leave it alone.
    pub last_seen_utc: DateTime<Utc>,
}

impl CachedRepository {
    /// Entry for a fresh discovery with its computed signature.
    #[must_use]
    pub fn from_discovered(
        repo: DiscoveredRepository,
        signature: Signature,
        seen_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: repo.name,
            path: repo.path,
            has_git: repo.has_git,
            has_solution_marker: repo.has_solution_marker,
            solution_marker_path: repo.solution_marker_path,
            group_key: repo.group_key,
            signature,
            last_seen_utc: seen_at,
        }
    }

    /// Whether the display-relevant fields still match a fresh discovery.
    #[must_use]
    pub fn describes(&self, repo: &DiscoveredRepository) -> bool {
        self.name == repo.name
            && self.group_key == repo.group_key
            && self.solution_marker_path == repo.solution_marker_path
    }
}

/// Everything known about one scanned root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootCache {
    /// Store key of the root (see `root_cache_key`).
    pub normalized_root: String,
    /// Absolute root as scanned; informational, the key is authoritative.
    #[serde(default)]
    pub root_path: PathBuf,
    /// Time of the last successful refresh.
    pub cached_at_utc: DateTime<Utc>,
    /// Entries sorted by `(group_key, name)`.
    pub repos: Vec<CachedRepository>,
}

impl RootCache {
    /// Cache with no entries, stamped at the Unix epoch.
    #[must_use]
    pub fn empty(normalized_root: String, root_path: &Path) -> Self {
        Self {
            normalized_root,
            root_path: root_path.to_path_buf(),
            cached_at_utc: DateTime::<Utc>::default(),
            repos: Vec::new(),
        }
    }

    /// Restore the `(group_key, name)` presentation order.
    pub fn sort_repos(&mut self) {
        sort_for_presentation(&mut self.repos);
    }
}

/// Sort by `(group_key, name)` case-insensitively, path as tie-breaker.
pub fn sort_for_presentation(repos: &mut [CachedRepository]) {
    repos.sort_by_cached_key(|r| presentation_key(&r.group_key, &r.name, &r.path));
}
