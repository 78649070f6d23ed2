//! Shared path manipulation utilities.
//!
//! Path comparisons across repodex are case-insensitive on every platform. A
//! case-sensitive filesystem holding two repositories whose paths differ only
//! by case will see them collapse into one cache entry; that is the documented
//! policy, not an accident.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Resolve a path to an absolute, normalized path.
///
/// If `fs::canonicalize` succeeds (path exists), it is used to resolve symlinks
/// and normalize components.
///
/// If it fails (e.g. path does not exist), the path is made absolute relative
/// to CWD and `..`/`.` components are resolved syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return strip_trailing_separators(&canonical);
    }

    strip_trailing_separators(&normalize_syntactic(&absolute))
}

/// Drop trailing separators while keeping a bare root (`/`, `C:\`) intact.
pub fn strip_trailing_separators(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    let trimmed = raw.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() || trimmed.ends_with(':') {
        return path.to_path_buf();
    }
    if trimmed.len() == raw.len() {
        path.to_path_buf()
    } else {
        PathBuf::from(trimmed)
    }
}

/// Case-folded comparison key for a path.
#[must_use]
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// Final path segment, falling back to the whole path for roots.
#[must_use]
pub fn display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.to_string_lossy().into_owned(),
        |name| name.to_string_lossy().into_owned(),
    )
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}
