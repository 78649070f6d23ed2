//! Configuration system: TOML file + env var overrides + smart defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{RdxError, Result};

/// Upper bound accepted for an explicit `scanner.parallelism`.
const MAX_PARALLELISM: usize = 64;

/// Full repodex configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    /// `[scanner]`: discovery rules.
    pub scanner: ScannerConfig,
    /// `[paths]`: where state lives.
    pub paths: PathsConfig,
    /// `[logging]`: activity log.
    pub logging: LoggingConfig,
}

/// Discovery rules and worker-pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerConfig {
    /// Case-insensitive substrings; any directory whose path contains one is skipped.
    pub excluded_fragments: Vec<String>,
    /// Ordered group-key overrides. First match wins.
    pub category_overrides: Vec<CategoryOverride>,
    /// Which path segment becomes the group key (see `scanner::grouping`).
    pub grouping_segment_index: i32,
    /// Worker threads per scan. `0` picks a value from available parallelism.
    pub parallelism: usize,
    /// Descend into symlinked directories (cycles are detected).
    pub follow_symlinks: bool,
    /// Regex matched against file names when looking for a solution marker.
    pub marker_pattern: String,
    /// Subfolders searched (one level) when the repository root has no marker.
    pub marker_subfolders: Vec<String>,
}

/// Replace the computed group key with `category` when any fragment matches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct CategoryOverride {
    /// Group key assigned on a match.
    pub category: String,
    /// Case-insensitive substrings tested against repository and marker paths.
    pub fragments: Vec<String>,
}

/// Filesystem paths used by repodex.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    /// Config file read when `--config` is not given.
    pub config_file: PathBuf,
    /// Directory holding one `<root_key>.json` per root.
    pub cache_dir: PathBuf,
    /// JSONL activity log file.
    pub activity_log: PathBuf,
}

/// JSONL activity log tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write the activity log during `refresh`.
    pub enabled: bool,
    /// Rotate once the live file would exceed this size.
    pub max_size_bytes: u64,
    /// Rotated files kept.
    pub max_rotated_files: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            excluded_fragments: vec![
                "node_modules".to_string(),
                "$recycle.bin".to_string(),
            ],
            category_overrides: Vec::new(),
            grouping_segment_index: 1,
            parallelism: 0,
            follow_symlinks: false,
            marker_pattern: r"(?i)\.sln$".to_string(),
            marker_subfolders: vec!["src".to_string()],
        }
    }
}

impl ScannerConfig {
    /// Worker count actually used by a scan.
    #[must_use]
    pub fn effective_parallelism(&self) -> usize {
        if self.parallelism == 0 {
            std::thread::available_parallelism().map_or(2, |n| n.get().clamp(2, 8))
        } else {
            self.parallelism.min(MAX_PARALLELISM)
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[RDX-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("repodex").join("config.toml");
        let data = home_dir.join(".local").join("share").join("repodex");
        Self {
            config_file: cfg,
            cache_dir: data.join("cache"),
            activity_log: data.join("activity.jsonl"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_bytes: 16 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| RdxError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(RdxError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for activity logging.
    ///
    /// FNV-1a over the canonical JSON so the value is stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("REPODEX_SCANNER_GROUPING_SEGMENT_INDEX") {
            self.scanner.grouping_segment_index =
                raw.trim()
                    .parse::<i32>()
                    .map_err(|error| RdxError::ConfigParse {
                        context: "env",
                        details: format!("REPODEX_SCANNER_GROUPING_SEGMENT_INDEX={raw:?}: {error}"),
                    })?;
        }

        if let Some(raw) = lookup("REPODEX_SCANNER_PARALLELISM") {
            self.scanner.parallelism = parse_env_usize("REPODEX_SCANNER_PARALLELISM", &raw)?;
        }

        if let Some(raw) = lookup("REPODEX_SCANNER_FOLLOW_SYMLINKS") {
            self.scanner.follow_symlinks =
                parse_env_bool("REPODEX_SCANNER_FOLLOW_SYMLINKS", &raw)?;
        }

        if let Some(raw) = lookup("REPODEX_SCANNER_MARKER_PATTERN") {
            self.scanner.marker_pattern = raw;
        }

        // Comma-separated; replaces the configured list rather than extending it.
        if let Some(raw) = lookup("REPODEX_SCANNER_EXCLUDED_FRAGMENTS") {
            self.scanner.excluded_fragments = raw.split(',').map(str::to_string).collect();
        }

        if let Some(raw) = lookup("REPODEX_CACHE_DIR") {
            self.paths.cache_dir = PathBuf::from(raw);
        }

        if let Some(raw) = lookup("REPODEX_ACTIVITY_LOG") {
            self.paths.activity_log = PathBuf::from(raw);
        }

        if let Some(raw) = lookup("REPODEX_LOGGING_ENABLED") {
            self.logging.enabled = parse_env_bool("REPODEX_LOGGING_ENABLED", &raw)?;
        }

        Ok(())
    }

    /// Trim fragments and drop blanks so matching never sees padding.
    fn normalize(&mut self) {
        self.scanner.excluded_fragments = normalize_fragments(&self.scanner.excluded_fragments);
        for rule in &mut self.scanner.category_overrides {
            rule.category = rule.category.trim().to_string();
            rule.fragments = normalize_fragments(&rule.fragments);
        }
        self.scanner.marker_subfolders = normalize_fragments(&self.scanner.marker_subfolders);
    }

    fn validate(&self) -> Result<()> {
        if self.scanner.parallelism > MAX_PARALLELISM {
            return Err(RdxError::InvalidConfig {
                details: format!(
                    "scanner.parallelism must be <= {MAX_PARALLELISM}, got {}",
                    self.scanner.parallelism
                ),
            });
        }

        if let Err(error) = regex::Regex::new(&self.scanner.marker_pattern) {
            return Err(RdxError::InvalidConfig {
                details: format!("scanner.marker_pattern does not compile: {error}"),
            });
        }

        for (idx, rule) in self.scanner.category_overrides.iter().enumerate() {
            if rule.category.trim().is_empty() {
                return Err(RdxError::InvalidConfig {
                    details: format!("scanner.category_overrides[{idx}].category is empty"),
                });
            }
            if rule.fragments.iter().all(|f| f.trim().is_empty()) {
                return Err(RdxError::InvalidConfig {
                    details: format!(
                        "scanner.category_overrides[{idx}] ({}) needs at least one fragment",
                        rule.category
                    ),
                });
            }
        }

        if self.logging.enabled && self.logging.max_size_bytes == 0 {
            return Err(RdxError::InvalidConfig {
                details: "logging.max_size_bytes must be > 0 when logging is enabled".to_string(),
            });
        }

        Ok(())
    }
}

fn normalize_fragments(fragments: &[String]) -> Vec<String> {
    fragments
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_usize(name: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|error| RdxError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.trim()
        .parse::<bool>()
        .map_err(|error| RdxError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

#[cfg(test)]
mod tests {
    use super::{CategoryOverride, Config, RdxError};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.scanner.grouping_segment_index, 1);
    }

    #[test]
    fn auto_parallelism_is_clamped() {
        let cfg = Config::default();
        let workers = cfg.scanner.effective_parallelism();
        assert!((2..=8).contains(&workers), "got {workers}");
    }

    #[test]
    fn explicit_parallelism_is_respected() {
        let mut cfg = Config::default();
        cfg.scanner.parallelism = 3;
        assert_eq!(cfg.scanner.effective_parallelism(), 3);
    }

    #[test]
    fn oversized_parallelism_rejected() {
        let mut cfg = Config::default();
        cfg.scanner.parallelism = 500;
        let err = cfg.validate().expect_err("expected parallelism error");
        assert!(err.to_string().contains("parallelism"));
    }

    #[test]
    fn bad_marker_pattern_rejected() {
        let mut cfg = Config::default();
        cfg.scanner.marker_pattern = "(unclosed".to_string();
        let err = cfg.validate().expect_err("expected regex error");
        assert!(err.to_string().contains("marker_pattern"));
    }

    #[test]
    fn override_without_fragments_rejected() {
        let mut cfg = Config::default();
        cfg.scanner.category_overrides.push(CategoryOverride {
            category: "Tools".to_string(),
            fragments: vec!["   ".to_string()],
        });
        let err = cfg.validate().expect_err("expected override error");
        match err {
            RdxError::InvalidConfig { details } => assert!(details.contains("Tools")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn normalize_trims_and_drops_blank_fragments() {
        let mut cfg = Config::default();
        cfg.scanner.excluded_fragments = vec![
            "  legacy ".to_string(),
            String::new(),
            "\tarchive".to_string(),
        ];
        cfg.scanner.category_overrides.push(CategoryOverride {
            category: " Infra ".to_string(),
            fragments: vec![" terraform ".to_string(), " ".to_string()],
        });

        cfg.normalize();

        assert_eq!(cfg.scanner.excluded_fragments, vec!["legacy", "archive"]);
        assert_eq!(cfg.scanner.category_overrides[0].category, "Infra");
        assert_eq!(cfg.scanner.category_overrides[0].fragments, vec!["terraform"]);
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("REPODEX_SCANNER_GROUPING_SEGMENT_INDEX", "3"),
            ("REPODEX_SCANNER_PARALLELISM", "4"),
            ("REPODEX_SCANNER_EXCLUDED_FRAGMENTS", "vendor, archive"),
            ("REPODEX_CACHE_DIR", "/tmp/rdx-cache"),
            ("REPODEX_LOGGING_ENABLED", "false"),
        ]);

        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("env overrides should parse");
        cfg.normalize();

        assert_eq!(cfg.scanner.grouping_segment_index, 3);
        assert_eq!(cfg.scanner.parallelism, 4);
        assert_eq!(cfg.scanner.excluded_fragments, vec!["vendor", "archive"]);
        assert_eq!(cfg.paths.cache_dir, PathBuf::from("/tmp/rdx-cache"));
        assert!(!cfg.logging.enabled);
    }

    #[test]
    fn env_invalid_boolean_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("REPODEX_SCANNER_FOLLOW_SYMLINKS", "sometimes")]);

        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("invalid bool should fail");
        match err {
            RdxError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("REPODEX_SCANNER_FOLLOW_SYMLINKS"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parses_toml_with_override_rules_in_order() {
        let raw = r#"
            [scanner]
            excluded_fragments = ["archive"]
            grouping_segment_index = 2

            [[scanner.category_overrides]]
            category = "Infra"
            fragments = ["terraform", "ansible"]

            [[scanner.category_overrides]]
            category = "Web"
            fragments = ["frontend"]
        "#;
        let cfg: Config = toml::from_str(raw).expect("toml should parse");
        assert_eq!(cfg.scanner.grouping_segment_index, 2);
        assert_eq!(cfg.scanner.category_overrides.len(), 2);
        assert_eq!(cfg.scanner.category_overrides[0].category, "Infra");
        assert_eq!(cfg.scanner.category_overrides[1].category, "Web");
        assert_eq!(cfg.scanner.marker_pattern, r"(?i)\.sln$");
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scanner]\nparallelism = 2\n").expect("write config");

        let cfg = Config::load(Some(&path)).expect("config should load");
        assert_eq!(cfg.scanner.parallelism, 2);
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/repodex/config.toml")));
        assert!(matches!(result, Err(RdxError::MissingConfig { .. })));
    }

    #[test]
    fn stable_hash_tracks_changes() {
        let cfg = Config::default();
        assert_eq!(cfg.stable_hash().unwrap(), cfg.stable_hash().unwrap());
        let mut modified = Config::default();
        modified.scanner.grouping_segment_index += 1;
        assert_ne!(cfg.stable_hash().unwrap(), modified.stable_hash().unwrap());
    }
}
