//! Cheap per-repository change fingerprint.
//!
//! The signature folds two last-write timestamps: the repository's `HEAD`
//! reference file and, when present, its solution marker. No file content is
//! read. This is an approximation: a commit that never rewrites `HEAD` (for
//! example a fast-forward of a branch ref while `HEAD` stays symbolic) is not
//! seen, and touching `HEAD` without changing it invalidates the cache entry
//! anyway. Both are accepted; hashing content for hundreds of repositories per
//! refresh is too slow.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

/// Name of the git metadata entry inside a working tree.
pub const GIT_DIR_NAME: &str = ".git";

const SIGNATURE_SEED: u64 = 17;
const SIGNATURE_MULTIPLIER: u64 = 31;

/// Opaque fingerprint; only equality is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(pub u64);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Compute the signature for a repository. Never fails; unreadable files count as 0.
#[must_use]
pub fn compute(repo_path: &Path, solution_marker: Option<&Path>) -> Signature {
    let head_ticks = resolve_git_dir(repo_path)
        .map_or(0, |git_dir| modified_ticks(&git_dir.join("HEAD")));
    let marker_ticks = solution_marker.map_or(0, modified_ticks);

    let hash = [head_ticks, marker_ticks]
        .into_iter()
        .fold(SIGNATURE_SEED, |acc, ticks| {
            acc.wrapping_mul(SIGNATURE_MULTIPLIER)
                .wrapping_add(component_hash(ticks))
        });
    Signature(hash)
}

/// Locate the git metadata directory for a working tree.
///
/// `.git` is usually a directory. Worktrees and submodules use a `.git` file
/// holding `gitdir: <path>`, relative paths being resolved against the
/// working tree.
#[must_use]
pub fn resolve_git_dir(repo_path: &Path) -> Option<PathBuf> {
    let dot_git = repo_path.join(GIT_DIR_NAME);
    let meta = fs::metadata(&dot_git).ok()?;
    if meta.is_dir() {
        return Some(dot_git);
    }

    let raw = fs::read_to_string(&dot_git).ok()?;
    let target = raw
        .lines()
        .find_map(|line| line.trim().strip_prefix("gitdir:"))?
        .trim();
    if target.is_empty() {
        return None;
    }
    let target = Path::new(target);
    Some(if target.is_absolute() {
        target.to_path_buf()
    } else {
        repo_path.join(target)
    })
}

fn modified_ticks(path: &Path) -> u64 {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

/// Fold a 64-bit value into 32 bits by xor-ing its halves.
const fn component_hash(value: u64) -> u64 {
    (value ^ (value >> 32)) & 0xffff_ffff
}
