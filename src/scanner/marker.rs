//! Shallow lookup of a repository's solution marker (build descriptor).
//!
//! Only the repository root and one level under each configured subfolder are
//! inspected. A discovered repository is never searched recursively.

use std::fs;
use std::path::{Path, PathBuf};

use crate::scanner::rules::ScanRules;

/// Locate the solution marker for `repo_dir`, if any.
///
/// Candidates in one directory are ordered by file name so the result does not
/// depend on `read_dir` order.
pub fn find_solution_marker(repo_dir: &Path, rules: &ScanRules) -> Option<PathBuf> {
    if let Some(found) = first_marker_in(repo_dir, rules) {
        return Some(found);
    }

    rules
        .marker_subfolders()
        .iter()
        .find_map(|sub| first_marker_in(&repo_dir.join(sub), rules))
}

fn first_marker_in(dir: &Path, rules: &ScanRules) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;

    let mut matches: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|ft| ft.is_file()))
        .filter(|entry| rules.is_marker_name(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.path())
        .collect();

    matches.sort_by_key(|p| p.file_name().map(|n| n.to_string_lossy().to_lowercase()));
    matches.into_iter().next()
}
