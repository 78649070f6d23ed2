//! Activity logging: JSONL records written by a background thread.

pub mod activity;
pub mod jsonl;
