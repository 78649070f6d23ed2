//! RDX-prefixed error types with structured error codes.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, RdxError>;

/// Top-level error type for repodex.
#[derive(Debug, Error)]
pub enum RdxError {
    /// Configuration loaded but failed validation.
    #[error("[RDX-1001] invalid configuration: {details}")]
    InvalidConfig {
        /// Which setting is wrong and why.
        details: String,
    },

    /// An explicitly requested config file does not exist.
    #[error("[RDX-1002] missing configuration file: {path}")]
    MissingConfig {
        /// Path that was requested.
        path: PathBuf,
    },

    /// Config file or environment override could not be parsed.
    #[error("[RDX-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        /// Source being parsed (`toml`, `env`).
        context: &'static str,
        /// Parser message.
        details: String,
    },

    /// JSON encoding or decoding failed, including an unreadable cache file.
    #[error("[RDX-2001] serialization failure in {context}: {details}")]
    Serialization {
        /// Codec or component involved.
        context: &'static str,
        /// Codec message.
        details: String,
    },

    /// A cache file decoded but does not belong to the key it was read under.
    #[error("[RDX-2002] cache entry {key} is inconsistent: {details}")]
    CacheCorrupt {
        /// Store key that was read.
        key: String,
        /// What did not match.
        details: String,
    },

    /// Filesystem failure at a known path.
    #[error("[RDX-3001] IO failure at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A background thread went away before delivering its results.
    #[error("[RDX-3002] channel closed in component {component}")]
    ChannelClosed {
        /// Component whose channel closed.
        component: &'static str,
    },

    /// The cancellation token was tripped.
    #[error("[RDX-3100] operation cancelled")]
    Cancelled,

    /// Any other runtime failure, such as a thread that could not be spawned.
    #[error("[RDX-3900] runtime failure: {details}")]
    Runtime {
        /// Failure description.
        details: String,
    },
}

impl RdxError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "RDX-1001",
            Self::MissingConfig { .. } => "RDX-1002",
            Self::ConfigParse { .. } => "RDX-1003",
            Self::Serialization { .. } => "RDX-2001",
            Self::CacheCorrupt { .. } => "RDX-2002",
            Self::Io { .. } => "RDX-3001",
            Self::ChannelClosed { .. } => "RDX-3002",
            Self::Cancelled => "RDX-3100",
            Self::Runtime { .. } => "RDX-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::ChannelClosed { .. } | Self::Runtime { .. }
        )
    }

    /// Cancellation is an outcome, not a failure; callers usually branch on it.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for RdxError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for RdxError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
