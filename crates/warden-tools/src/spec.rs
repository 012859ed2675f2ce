//! Immutable per-tool descriptors.
//!
//! A [`ToolSpec`] is built once from a configuration snapshot and never
//! mutated; configuration reloads build new descriptors. Everything the
//! shared pipeline needs (flag policy, bounds, breaker thresholds) lives
//! here so concrete tools only contribute their semantic rules.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use warden_breaker::BreakerSettings;
use warden_config::Config;

/// Immutable policy descriptor for one tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Registry name (the tool's class name, e.g. `PortSweep`).
    pub name: String,
    /// External binary the tool wraps.
    pub command: String,
    /// One-line description for discovery endpoints.
    pub description: String,
    /// Permitted flag prefixes; a caller flag must extend one of these.
    pub allowed_flags: Vec<String>,
    /// Flags that consume the following token as their value.
    pub flags_requiring_value: Vec<String>,
    /// Non-flag tokens accepted verbatim (modes, optimizer injections).
    pub extra_allowed_tokens: Vec<String>,
    /// Default and maximum execution timeout in seconds.
    pub default_timeout_sec: f64,
    /// Upper bound on simultaneous subprocesses of this tool.
    pub concurrency: usize,
    /// Byte cap on caller-supplied extra arguments.
    pub max_args_len: usize,
    /// Stdout capture cap in bytes.
    pub max_stdout_bytes: usize,
    /// Stderr capture cap in bytes.
    pub max_stderr_bytes: usize,
    /// Breaker thresholds for this tool.
    pub breaker: BreakerSettings,
    /// Whether the larger (still bounded) flag/script sets are enabled.
    pub intrusive: bool,
}

impl ToolSpec {
    /// Start a descriptor from the shared sections of a config snapshot.
    ///
    /// Concrete tools fill in their name, command, and flag policy, then
    /// override whatever their class needs (timeout, concurrency).
    pub fn from_config(name: &str, command: &str, config: &Config) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            description: String::new(),
            allowed_flags: Vec::new(),
            flags_requiring_value: Vec::new(),
            extra_allowed_tokens: Vec::new(),
            default_timeout_sec: config.tool.default_timeout_sec,
            concurrency: config.tool.default_concurrency,
            max_args_len: config.tool.max_args_len,
            max_stdout_bytes: config.tool.max_stdout_bytes,
            max_stderr_bytes: config.tool.max_stderr_bytes,
            breaker: BreakerSettings {
                failure_threshold: config.circuit_breaker.failure_threshold,
                recovery_timeout: Duration::from_secs_f64(
                    config.circuit_breaker.recovery_timeout_sec,
                ),
                max_recovery_timeout: Duration::from_secs_f64(
                    config.circuit_breaker.max_recovery_timeout_sec,
                ),
                half_open_max_in_flight: config.circuit_breaker.half_open_max_in_flight,
            },
            intrusive: config.security.allow_intrusive,
        }
    }

    /// Effective timeout for a call: the caller may shorten, never extend.
    pub fn effective_timeout(&self, requested_sec: Option<f64>) -> Duration {
        let timeout = match requested_sec {
            Some(requested) if requested > 0.0 => requested.min(self.default_timeout_sec),
            _ => self.default_timeout_sec,
        };
        Duration::from_secs_f64(timeout)
    }
}

/// Serializable introspection record exposed by discovery endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    /// Registry name.
    pub name: String,
    /// External binary.
    pub command: String,
    /// One-line description.
    pub description: String,
    /// Simultaneous-subprocess bound.
    pub concurrency: usize,
    /// Default/maximum timeout in seconds.
    pub timeout_sec: f64,
    /// Permitted flag prefixes.
    pub allowed_flags: Vec<String>,
    /// Whether intrusive extensions are active.
    pub intrusive: bool,
    /// Breaker failure threshold.
    pub circuit_breaker_threshold: u32,
    /// Breaker base recovery timeout in seconds.
    pub circuit_breaker_recovery_sec: f64,
    /// Tool-class specific effective limits.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, serde_json::Value>,
}

impl ToolInfo {
    /// Build the shared part of the record from a descriptor.
    pub fn from_spec(spec: &ToolSpec) -> Self {
        Self {
            name: spec.name.clone(),
            command: spec.command.clone(),
            description: spec.description.clone(),
            concurrency: spec.concurrency,
            timeout_sec: spec.default_timeout_sec,
            allowed_flags: spec.allowed_flags.clone(),
            intrusive: spec.intrusive,
            circuit_breaker_threshold: spec.breaker.failure_threshold,
            circuit_breaker_recovery_sec: spec.breaker.recovery_timeout.as_secs_f64(),
            limits: BTreeMap::new(),
        }
    }

    /// Attach a tool-class specific limit.
    pub fn with_limit(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.limits.insert(key.into(), value);
        self
    }
}
