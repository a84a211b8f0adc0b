//! Trellis benchmarking suite
//!
//! Benchmarks for resolving synthetic bundle sets and for parsing versions,
//! filters and trellis.toml files.

pub mod common;

pub use common::*;
