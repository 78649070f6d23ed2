//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use repodex::prelude::*;
//! ```

// Core
pub use crate::core::cancel::CancellationToken;
pub use crate::core::config::Config;
pub use crate::core::errors::{RdxError, Result};

// Scanner
pub use crate::scanner::rules::ScanRules;
pub use crate::scanner::signature::Signature;
pub use crate::scanner::walker::{DiscoveredRepository, RepoScanner, ScanStats, ScanStream};

// Cache
pub use crate::cache::model::{CachedRepository, RootCache};
pub use crate::cache::reconcile::{ReconciliationService, RefreshSummary};
pub use crate::cache::store::{CacheStore, FileCacheStore, MemoryCacheStore, root_cache_key};

// Logging
pub use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, spawn_activity_logger};
