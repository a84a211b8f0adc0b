//! Utility functions and helpers.
//!
//! Common functionality used across multiple trellis crates.

pub mod names;

// Re-export commonly used utilities
pub use names::{is_wildcard, matches_package_pattern, split_list};
