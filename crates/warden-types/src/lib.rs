#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **warden-types** – Shared primitive data structures for Warden.
//!
//! The crate is dependency‐light and sits at the very bottom of the crate
//! graph so that *every* other crate can depend on it without causing cycles.
//! It carries the transport-visible invocation/result records, the error
//! taxonomy with its frozen returncode and wire-code mappings, and the
//! safety bounds shared by the execution core.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

//─────────────────────────────
//  Safety bounds
//─────────────────────────────

/// Maximum allowed byte length for caller-supplied extra arguments.
pub const MAX_EXTRA_ARGS_LEN: usize = 2048;

/// Maximum stdout bytes retained from a subprocess before truncation.
pub const MAX_STDOUT_BYTES: usize = 1_048_576; // 1 MiB

/// Maximum stderr bytes retained from a subprocess before truncation.
pub const MAX_STDERR_BYTES: usize = 262_144; // 256 KiB

/// Default per-tool execution timeout in seconds.
pub const DEFAULT_TIMEOUT_SEC: f64 = 300.0;

/// Default number of simultaneous subprocesses allowed per tool.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Returncode reserved for executions terminated by the timeout watchdog.
pub const TIMEOUT_RETURNCODE: i32 = 124;

/// Returncode reserved for commands that could not be resolved on PATH.
pub const NOT_FOUND_RETURNCODE: i32 = 127;

/// Characters that must never appear in caller-supplied argument strings.
///
/// Arguments are passed to subprocesses as a vector and never interpreted by
/// a shell, but these characters have no legitimate use in any supported
/// tool's flags and rejecting them up front keeps the policy auditable.
pub const SHELL_METACHARACTERS: &[char] = &[';', '&', '|', '`', '$', '>', '<', '\n', '\r'];

//─────────────────────────────
//  Error taxonomy
//─────────────────────────────

/// Classification tag carried in [`ToolOutput::error_type`].
///
/// The mapping from kind to subprocess returncode, HTTP status, and JSON-RPC
/// error code is part of the wire contract and must not drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Input failed target policy, argument sanitization, or a per-tool rule.
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    /// The tool's binary could not be resolved on PATH.
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    /// The subprocess exceeded its timeout and was terminated.
    #[serde(rename = "TIMEOUT")]
    Timeout,
    /// The subprocess ran but failed, or a non-specific execution fault.
    #[serde(rename = "EXECUTION_ERROR")]
    Execution,
    /// A concurrency or resource gate refused the call.
    #[serde(rename = "RESOURCE_EXHAUSTED")]
    ResourceExhausted,
    /// The tool's circuit breaker rejected the call without executing it.
    #[serde(rename = "CIRCUIT_BREAKER_OPEN")]
    CircuitBreakerOpen,
    /// Unexpected internal failure caught at the handler boundary.
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl ErrorKind {
    /// Wire tag carried in serialized results and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Execution => "EXECUTION_ERROR",
            ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorKind::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }

    /// Subprocess-style returncode reported for this kind when no child ran.
    pub fn returncode(&self) -> i32 {
        match self {
            ErrorKind::NotFound => NOT_FOUND_RETURNCODE,
            ErrorKind::Timeout => TIMEOUT_RETURNCODE,
            _ => 1,
        }
    }

    /// HTTP status code the HTTP transport maps this kind to.
    ///
    /// Execution outcomes (a child that ran, timed out, or whose binary was
    /// missing) are still structured results and travel as 200; only policy
    /// rejections and internal faults surface as error statuses.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 200,
            ErrorKind::Timeout => 200,
            ErrorKind::Execution => 200,
            ErrorKind::ResourceExhausted => 503,
            ErrorKind::CircuitBreakerOpen => 503,
            ErrorKind::Unknown => 500,
        }
    }

    /// JSON-RPC 2.0 error code the stdio transport maps this kind to.
    pub fn jsonrpc_code(&self) -> i32 {
        match self {
            ErrorKind::Validation => -32602,
            ErrorKind::CircuitBreakerOpen => -32001,
            _ => -32000,
        }
    }

    /// One-line operator guidance appropriate to this kind.
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            ErrorKind::Validation => {
                "check the target (RFC1918 or .lab.internal) and the allowed flags for this tool"
            }
            ErrorKind::NotFound => "install the tool binary or adjust PATH for the server process",
            ErrorKind::Timeout => "increase timeout_sec or reduce the scope of the operation",
            ErrorKind::Execution => "inspect stderr for the tool's own diagnostics",
            ErrorKind::ResourceExhausted => "retry after in-flight executions of this tool drain",
            ErrorKind::CircuitBreakerOpen => {
                "wait for the recovery timeout to elapse or check service health"
            }
            ErrorKind::Unknown => "check server logs for the correlation id of this call",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//─────────────────────────────
//  Invocation record
//─────────────────────────────

/// A single tool invocation as received from a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInput {
    /// Scan/test target; must satisfy the target policy before execution.
    pub target: String,
    /// Free-form extra arguments, sanitized against the tool's flag policy.
    #[serde(default)]
    pub extra_args: String,
    /// Optional caller timeout in seconds; capped by the tool's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_sec: Option<f64>,
    /// Opaque per-call identifier; the server supplies one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ToolInput {
    /// Create an invocation record for `target` with empty extra arguments.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            extra_args: String::new(),
            timeout_sec: None,
            correlation_id: None,
        }
    }

    /// Attach extra arguments.
    pub fn with_extra_args(mut self, extra_args: impl Into<String>) -> Self {
        self.extra_args = extra_args.into();
        self
    }

    /// Attach a caller timeout.
    pub fn with_timeout(mut self, timeout_sec: f64) -> Self {
        self.timeout_sec = Some(timeout_sec);
        self
    }
}

//─────────────────────────────
//  Result record
//─────────────────────────────

/// Structured result of one tool invocation.
///
/// Invariants: `metadata` serializes as a mapping even when empty;
/// `timed_out == true` if and only if `returncode == 124`; a missing binary
/// always reports returncode 127 with `error_type = NOT_FOUND`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Captured standard output, possibly truncated.
    pub stdout: String,
    /// Captured standard error, possibly truncated.
    pub stderr: String,
    /// Child exit code, or a reserved code for non-spawn failures.
    pub returncode: i32,
    /// Whether stdout exceeded the byte cap and was cut.
    pub truncated_stdout: bool,
    /// Whether stderr exceeded the byte cap and was cut.
    pub truncated_stderr: bool,
    /// Whether the timeout watchdog terminated the child.
    pub timed_out: bool,
    /// Short human-readable failure message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure classification, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorKind>,
    /// Wall-clock seconds from just before spawn to child termination.
    pub execution_time: f64,
    /// Per-call identifier echoed from the input or generated by the server.
    pub correlation_id: String,
    /// Free-form per-call annotations; never absent, empty when unused.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolOutput {
    /// Result for a child that was spawned and exited on its own.
    pub fn completed(
        stdout: String,
        stderr: String,
        returncode: i32,
        execution_time: f64,
        correlation_id: String,
    ) -> Self {
        let error_type = if returncode != 0 {
            Some(ErrorKind::Execution)
        } else {
            None
        };
        Self {
            stdout,
            stderr,
            returncode,
            truncated_stdout: false,
            truncated_stderr: false,
            timed_out: false,
            error: None,
            error_type,
            execution_time,
            correlation_id,
            metadata: HashMap::new(),
        }
    }

    /// Result for a failure that happened before or instead of a spawn.
    pub fn failure(kind: ErrorKind, message: impl Into<String>, correlation_id: String) -> Self {
        let message = message.into();
        Self {
            stdout: String::new(),
            stderr: message.clone(),
            returncode: kind.returncode(),
            truncated_stdout: false,
            truncated_stderr: false,
            timed_out: matches!(kind, ErrorKind::Timeout),
            error: Some(message),
            error_type: Some(kind),
            execution_time: 0.0,
            correlation_id,
            metadata: HashMap::new(),
        }
    }

    /// Result for a child the watchdog had to terminate, keeping partial output.
    pub fn timed_out(
        stdout: String,
        stderr: String,
        execution_time: f64,
        correlation_id: String,
    ) -> Self {
        Self {
            stdout,
            stderr,
            returncode: TIMEOUT_RETURNCODE,
            truncated_stdout: false,
            truncated_stderr: false,
            timed_out: true,
            error: Some("execution timed out".to_string()),
            error_type: Some(ErrorKind::Timeout),
            execution_time,
            correlation_id,
            metadata: HashMap::new(),
        }
    }

    /// Whether the invocation succeeded (child exited zero, nothing flagged).
    pub fn success(&self) -> bool {
        self.returncode == 0 && self.error_type.is_none()
    }

    /// Insert a metadata entry.
    pub fn annotate(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }
}

//─────────────────────────────
//  Error context
//─────────────────────────────

/// Rich failure context produced on every error path.
///
/// Carried in logs and, selectively, in result metadata so operators can
/// act on a failure without reverse-engineering it from counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Failure classification.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// One-line guidance for recovering from this failure.
    pub recovery_suggestion: String,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
    /// Tool the failure belongs to.
    pub tool_name: String,
    /// Target of the failed invocation.
    pub target: String,
    /// Free-form annotations.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ErrorContext {
    /// Build a context for `kind` with the taxonomy's stock suggestion.
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        tool_name: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            recovery_suggestion: kind.recovery_suggestion().to_string(),
            timestamp: Utc::now(),
            tool_name: tool_name.into(),
            target: target.into(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
