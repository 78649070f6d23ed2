//! Core types: errors, configuration, cancellation, path helpers.

pub mod cancel;
pub mod config;
pub mod errors;
pub mod paths;
