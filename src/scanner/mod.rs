//! Repository scanner: concurrent tree walk, grouping rules, solution markers, signatures.

pub mod grouping;
pub mod marker;
pub mod rules;
pub mod signature;
pub mod walker;
