//! Persisted per-root repository caches and their reconciliation.

pub mod model;
pub mod reconcile;
pub mod store;
