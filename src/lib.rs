#![forbid(unsafe_code)]

//! repodex: discover git repositories under a root folder and keep a cached,
//! grouped view of them in sync with the filesystem.
//!
//! Pipeline:
//! 1. **Scanner**: a parallel tree walk that yields every git-backed working
//!    tree, its optional solution marker, and its display group
//! 2. **Signature**: a cheap per-repository fingerprint from two timestamps
//! 3. **Reconciliation**: diffs a fresh scan against the stored cache and
//!    reports only upserts and removals
//!
//! # Library usage
//!
//! ```rust,no_run
//! use repodex::prelude::*;
//!
//! # fn main() -> repodex::core::errors::Result<()> {
//! let config = Config::load(None)?;
//! let scanner = RepoScanner::from_config(&config.scanner)?;
//! let service = ReconciliationService::new(FileCacheStore::new(config.paths.cache_dir), scanner);
//!
//! let summary = service.refresh(
//!     std::path::Path::new("/home/me/src"),
//!     config.scanner.grouping_segment_index,
//!     |repo| println!("+ {} [{}]", repo.name, repo.group_key),
//!     |path| println!("- {}", path.display()),
//!     &CancellationToken::new(),
//! )?;
//! println!("{} repositories", summary.total);
//! # Ok(())
//! # }
//! ```

pub mod prelude;

pub mod cache;
pub mod core;
pub mod logger;
pub mod scanner;
