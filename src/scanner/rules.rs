//! Exclusion fragments and category overrides, compiled once per scan.
//!
//! A scan works from an immutable [`ScanRules`] snapshot taken when it starts,
//! so a configuration reload mid-scan is never observed by running workers.

use std::path::Path;

use regex::Regex;

use crate::core::config::ScannerConfig;
use crate::core::errors::{RdxError, Result};

/// Override rule with fragments already case-folded.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CompiledOverride {
    category: String,
    fragments: Vec<String>,
}

/// Immutable snapshot of the discovery rules for one scan.
#[derive(Debug, Clone)]
pub struct ScanRules {
    excluded: Vec<String>,
    overrides: Vec<CompiledOverride>,
    marker_pattern: Regex,
    marker_subfolders: Vec<String>,
    follow_symlinks: bool,
}

impl ScanRules {
    /// Snapshot the rules from scanner configuration.
    pub fn from_config(config: &ScannerConfig) -> Result<Self> {
        let marker_pattern =
            Regex::new(&config.marker_pattern).map_err(|error| RdxError::InvalidConfig {
                details: format!("scanner.marker_pattern does not compile: {error}"),
            })?;

        let overrides = config
            .category_overrides
            .iter()
            .filter(|rule| !rule.category.trim().is_empty())
            .map(|rule| CompiledOverride {
                category: rule.category.trim().to_string(),
                fragments: fold_fragments(&rule.fragments),
            })
            .filter(|rule| !rule.fragments.is_empty())
            .collect();

        Ok(Self {
            excluded: fold_fragments(&config.excluded_fragments),
            overrides,
            marker_pattern,
            marker_subfolders: config
                .marker_subfolders
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            follow_symlinks: config.follow_symlinks,
        })
    }

    /// Whether any exclusion fragment occurs in `text` (case-insensitive).
    #[must_use]
    pub fn is_excluded_text(&self, text: &str) -> bool {
        if self.excluded.is_empty() {
            return false;
        }
        let folded = text.to_lowercase();
        self.excluded.iter().any(|frag| folded.contains(frag))
    }

    /// [`Self::is_excluded_text`] over the full path.
    #[must_use]
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.is_excluded_text(&path.to_string_lossy())
    }

    /// Category of the first override rule matching the repository path, the
    /// marker path, or the marker's base file name.
    #[must_use]
    pub fn category_override(&self, repo_path: &Path, marker: Option<&Path>) -> Option<&str> {
        if self.overrides.is_empty() {
            return None;
        }

        let mut haystacks = vec![repo_path.to_string_lossy().to_lowercase()];
        if let Some(marker) = marker {
            haystacks.push(marker.to_string_lossy().to_lowercase());
            if let Some(stem) = marker.file_stem() {
                haystacks.push(stem.to_string_lossy().to_lowercase());
            }
        }

        self.overrides
            .iter()
            .find(|rule| {
                rule.fragments
                    .iter()
                    .any(|frag| haystacks.iter().any(|h| h.contains(frag)))
            })
            .map(|rule| rule.category.as_str())
    }

    /// Whether a file name matches `scanner.marker_pattern`.
    #[must_use]
    pub fn is_marker_name(&self, file_name: &str) -> bool {
        self.marker_pattern.is_match(file_name)
    }

    /// Subfolders searched one level deep for a marker.
    #[must_use]
    pub fn marker_subfolders(&self) -> &[String] {
        &self.marker_subfolders
    }

    /// Whether symlinked directories are descended into.
    #[must_use]
    pub const fn follow_symlinks(&self) -> bool {
        self.follow_symlinks
    }
}

fn fold_fragments(fragments: &[String]) -> Vec<String> {
    fragments
        .iter()
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty())
        .collect()
}
