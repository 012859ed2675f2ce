//! Error types for the warden-tools crate
//!
//! This module provides structured error types using thiserror for the
//! execution pipeline. Every variant maps onto exactly one [`ErrorKind`]
//! of the wire taxonomy, and carries enough context to build an
//! [`warden_types::ErrorContext`] without re-deriving anything.

use thiserror::Error;
use warden_types::ErrorKind;

/// Failure of one step of the execution pipeline.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The target is outside the allowed-target policy.
    #[error("target '{target}' not allowed: {reason}")]
    TargetNotAllowed {
        /// The rejected target.
        target: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Argument sanitization or a per-tool semantic rule failed.
    #[error("invalid arguments: {reason}")]
    InvalidArguments {
        /// Why the arguments were rejected.
        reason: String,
    },

    /// The tool's binary could not be resolved on PATH.
    #[error("command '{command}' not found on PATH")]
    CommandNotFound {
        /// The unresolved binary name.
        command: String,
    },

    /// The OS refused to spawn the child.
    #[error("failed to spawn '{command}': {reason}")]
    SpawnFailed {
        /// The binary that failed to spawn.
        command: String,
        /// Underlying OS error.
        reason: String,
    },

    /// The watchdog terminated the child; partial output is preserved.
    #[error("execution timed out after {timeout_sec}s")]
    Timeout {
        /// The enforced timeout in seconds.
        timeout_sec: f64,
        /// Output captured before termination.
        stdout: String,
        /// Stderr captured before termination.
        stderr: String,
        /// Whether stdout hit its byte cap before the kill.
        truncated_stdout: bool,
        /// Whether stderr hit its byte cap before the kill.
        truncated_stderr: bool,
        /// Wall-clock seconds from spawn to forced termination.
        elapsed_sec: f64,
    },

    /// The concurrency gate refused the call.
    #[error("resource limit reached: {reason}")]
    ResourceExhausted {
        /// Which gate refused and why.
        reason: String,
    },

    /// Unexpected internal failure on the execution path.
    #[error("internal execution error: {reason}")]
    Internal {
        /// Description of the fault.
        reason: String,
    },
}

impl ToolError {
    /// The wire-taxonomy kind this error maps to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::TargetNotAllowed { .. } | ToolError::InvalidArguments { .. } => {
                ErrorKind::Validation
            }
            ToolError::CommandNotFound { .. } => ErrorKind::NotFound,
            ToolError::SpawnFailed { .. } => ErrorKind::Execution,
            ToolError::Timeout { .. } => ErrorKind::Timeout,
            ToolError::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            ToolError::Internal { .. } => ErrorKind::Unknown,
        }
    }

    /// Whether the breaker should count this error toward its threshold.
    ///
    /// Validation rejections are the caller's fault, not the tool's; they
    /// never reach the breaker anyway, but the classification is kept total
    /// so the call site cannot misuse it.
    pub fn counts_toward_breaker(&self) -> bool {
        !matches!(
            self,
            ToolError::TargetNotAllowed { .. } | ToolError::InvalidArguments { .. }
        )
    }
}
