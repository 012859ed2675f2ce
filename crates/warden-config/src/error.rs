//! Error types for configuration loading and reloading.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while building a configuration snapshot.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file exists but could not be read.
    #[error("failed to read configuration file '{path}': {reason}")]
    FileRead {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O failure.
        reason: String,
    },

    /// Configuration file could not be parsed as TOML.
    #[error("failed to parse configuration file '{path}': {reason}")]
    FileParse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Parser diagnostics.
        reason: String,
    },

    /// A value had the wrong type for its key.
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue {
        /// Dotted key path of the offending value.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
}
