//! Cooperative cancellation shared between callers, scan workers, and the
//! reconciliation loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::errors::{RdxError, Result};

/// Cloneable cancellation flag. All clones observe the same state.
///
/// Checked at loop boundaries only; nothing is interrupted preemptively.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once cancellation has been requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RdxError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Underlying flag, for wiring into OS signal handlers.
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        assert!(matches!(clone.check(), Err(RdxError::Cancelled)));
    }

    #[test]
    fn flag_handle_trips_token() {
        let token = CancellationToken::new();
        token.flag().store(true, Ordering::Relaxed);
        assert!(token.check().is_err());
    }
}
