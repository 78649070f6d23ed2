//! Group-key derivation from a repository's position under the scan root.

use std::path::{Component, Path};

use crate::core::paths::display_name;

/// Compute the display group for `repo_path` discovered under `root`.
///
/// The path relative to `root` is split into non-empty segments. An index of
/// zero or less selects the first segment. A positive index counts from the
/// end: `1` is the repository folder itself, `2` its parent, and so on toward
/// the root. An index past the start falls back to the second-to-last segment
/// (or the only one). A repository sitting at the root itself is grouped
/// under its own name.
#[must_use]
pub fn group_key(root: &Path, repo_path: &Path, grouping_segment_index: i32) -> String {
    let relative = repo_path.strip_prefix(root).unwrap_or(repo_path);
    let segments: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect();

    if segments.is_empty() {
        return display_name(repo_path);
    }

    if grouping_segment_index <= 0 {
        return segments[0].clone();
    }

    let from_end = usize::try_from(grouping_segment_index).unwrap_or(usize::MAX);
    match segments.len().checked_sub(from_end) {
        Some(idx) => segments[idx].clone(),
        None if segments.len() >= 2 => segments[segments.len() - 2].clone(),
        None => segments[0].clone(),
    }
}

/// Sort key for the presentation order: group, then name, case-insensitively.
///
/// The path breaks ties so two same-named repositories in one group still
/// order deterministically.
#[must_use]
pub fn presentation_key(group_key: &str, name: &str, path: &Path) -> (String, String, String) {
    (
        group_key.to_lowercase(),
        name.to_lowercase(),
        path.to_string_lossy().to_lowercase(),
    )
}
