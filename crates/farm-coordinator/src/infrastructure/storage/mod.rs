//! Storage infrastructure: configuration file loading.
//!
//! The `config` sub-module reads the TOML configuration (worker catalog,
//! port ranges, timeouts) and falls back to defaults when no file exists.

pub mod config;
