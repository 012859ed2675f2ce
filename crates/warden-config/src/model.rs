//! Configuration snapshot model.
//!
//! The snapshot is a plain data bag: every component reads its bounds from
//! here and nothing here performs I/O. All numeric fields carry documented
//! safe ranges; [`Config::clamp_to_safe_ranges`] replaces out-of-range values
//! with the nearest bound and logs a warning per substitution.

use serde::{Deserialize, Serialize};
use tracing::warn;
use warden_types::{DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT_SEC, MAX_EXTRA_ARGS_LEN, MAX_STDERR_BYTES, MAX_STDOUT_BYTES};

/// Transport the server skeleton speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Newline-delimited JSON-RPC 2.0 on stdin/stdout.
    Stdio,
    /// HTTP/JSON on a listening socket.
    Http,
}

impl std::str::FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdio" => Ok(Transport::Stdio),
            "http" => Ok(Transport::Http),
            other => Err(format!("unknown transport '{other}' (expected stdio or http)")),
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Stdio => f.write_str("stdio"),
            Transport::Http => f.write_str("http"),
        }
    }
}

/// Listener and lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP transport.
    pub host: String,
    /// Bind port for the HTTP transport. Safe range 1..=65535.
    pub port: u16,
    /// Selected transport.
    pub transport: Transport,
    /// Seconds to wait for in-flight executions on shutdown. Safe range 0..=300.
    pub shutdown_grace_sec: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            transport: Transport::Stdio,
            shutdown_grace_sec: 30.0,
        }
    }
}

/// Defaults and bounds shared by every tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Default execution timeout in seconds. Safe range 1..=3600.
    pub default_timeout_sec: f64,
    /// Default simultaneous subprocesses per tool. Safe range 1..=64.
    pub default_concurrency: usize,
    /// Maximum byte length of caller-supplied extra arguments. Safe range 16..=8192.
    pub max_args_len: usize,
    /// Stdout capture cap in bytes. Safe range 1024..=16 MiB.
    pub max_stdout_bytes: usize,
    /// Stderr capture cap in bytes. Safe range 1024..=16 MiB.
    pub max_stderr_bytes: usize,
    /// Tool class names to register; empty means all builtins.
    pub include: Vec<String>,
    /// Tool class names to skip at registration.
    pub exclude: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            default_timeout_sec: DEFAULT_TIMEOUT_SEC,
            default_concurrency: DEFAULT_CONCURRENCY,
            max_args_len: MAX_EXTRA_ARGS_LEN,
            max_stdout_bytes: MAX_STDOUT_BYTES,
            max_stderr_bytes: MAX_STDERR_BYTES,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

/// Target and intensity policy knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Whether tools may use their larger (still bounded) flag/script sets.
    pub allow_intrusive: bool,
    /// Global ceiling on scanner packet rates. Safe range 100..=1_000_000.
    pub max_scan_rate: u32,
    /// Extra allowed-target glob patterns layered on the built-in policy.
    pub target_allowlist: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allow_intrusive: false,
            max_scan_rate: 100_000,
            target_allowlist: Vec::new(),
        }
    }
}

/// Per-tool circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive counted failures before the breaker opens. Safe range 1..=100.
    pub failure_threshold: u32,
    /// Base recovery timeout in seconds. Safe range 1..=3600.
    pub recovery_timeout_sec: f64,
    /// Ceiling on the adaptive recovery timeout in seconds. Safe range 1..=86400.
    pub max_recovery_timeout_sec: f64,
    /// Concurrent trial calls admitted while HALF_OPEN. Safe range 1..=10.
    pub half_open_max_in_flight: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_sec: 60.0,
            max_recovery_timeout_sec: 3600.0,
            half_open_max_in_flight: 1,
        }
    }
}

/// Health monitor cadence and thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Seconds between check sweeps. Safe range 5..=300.
    pub check_interval_sec: f64,
    /// CPU usage percentage above which resources are unhealthy. Safe range 1..=100.
    pub cpu_threshold: f32,
    /// Memory usage percentage above which resources are unhealthy. Safe range 1..=100.
    pub memory_threshold: f32,
    /// Disk usage percentage above which resources are unhealthy. Safe range 1..=100.
    pub disk_threshold: f32,
    /// Per-check timeout in seconds. Safe range 1..=60.
    pub check_timeout_sec: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_sec: 30.0,
            cpu_threshold: 85.0,
            memory_threshold: 85.0,
            disk_threshold: 90.0,
            check_timeout_sec: 10.0,
        }
    }
}

/// Metrics collection switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Master switch for execution recording.
    pub enabled: bool,
    /// Whether the Prometheus text exposition endpoint is served.
    pub prometheus_enabled: bool,
    /// Seconds between background stat collections. Safe range 5..=300.
    pub collection_interval_sec: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prometheus_enabled: true,
            collection_interval_sec: 15.0,
        }
    }
}

/// Log emission settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum level: trace, debug, info, warn, error.
    pub level: String,
    /// Output format: pretty or json.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Complete immutable configuration snapshot.
///
/// Built by [`crate::ConfigService`]; components hold an `Arc` to a snapshot
/// and never observe partial updates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listener and lifecycle settings.
    pub server: ServerConfig,
    /// Shared tool execution bounds.
    pub tool: ToolConfig,
    /// Target and intensity policy.
    pub security: SecurityConfig,
    /// Breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Health monitor settings.
    pub health: HealthConfig,
    /// Metrics switches.
    pub metrics: MetricsConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

fn clamp_f64(key: &str, value: f64, min: f64, max: f64) -> f64 {
    if !value.is_finite() || value < min || value > max {
        let clamped = if value.is_finite() { value.clamp(min, max) } else { min };
        warn!(key, value, clamped, "configuration value out of safe range, clamping");
        clamped
    } else {
        value
    }
}

fn clamp_f32(key: &str, value: f32, min: f32, max: f32) -> f32 {
    clamp_f64(key, f64::from(value), f64::from(min), f64::from(max)) as f32
}

fn clamp_u32(key: &str, value: u32, min: u32, max: u32) -> u32 {
    if value < min || value > max {
        let clamped = value.clamp(min, max);
        warn!(key, value, clamped, "configuration value out of safe range, clamping");
        clamped
    } else {
        value
    }
}

fn clamp_usize(key: &str, value: usize, min: usize, max: usize) -> usize {
    if value < min || value > max {
        let clamped = value.clamp(min, max);
        warn!(key, value, clamped, "configuration value out of safe range, clamping");
        clamped
    } else {
        value
    }
}

impl Config {
    /// Replace every out-of-range numeric with the nearest in-range value.
    ///
    /// Ranges are the ones documented on each field. Substitutions are
    /// logged; the snapshot is always usable afterwards.
    pub fn clamp_to_safe_ranges(&mut self) {
        self.server.shutdown_grace_sec =
            clamp_f64("server.shutdown_grace_sec", self.server.shutdown_grace_sec, 0.0, 300.0);

        self.tool.default_timeout_sec =
            clamp_f64("tool.default_timeout_sec", self.tool.default_timeout_sec, 1.0, 3600.0);
        self.tool.default_concurrency =
            clamp_usize("tool.default_concurrency", self.tool.default_concurrency, 1, 64);
        self.tool.max_args_len = clamp_usize("tool.max_args_len", self.tool.max_args_len, 16, 8192);
        self.tool.max_stdout_bytes =
            clamp_usize("tool.max_stdout_bytes", self.tool.max_stdout_bytes, 1024, 16 * 1024 * 1024);
        self.tool.max_stderr_bytes =
            clamp_usize("tool.max_stderr_bytes", self.tool.max_stderr_bytes, 1024, 16 * 1024 * 1024);

        self.security.max_scan_rate =
            clamp_u32("security.max_scan_rate", self.security.max_scan_rate, 100, 1_000_000);

        self.circuit_breaker.failure_threshold = clamp_u32(
            "circuit_breaker.failure_threshold",
            self.circuit_breaker.failure_threshold,
            1,
            100,
        );
        self.circuit_breaker.recovery_timeout_sec = clamp_f64(
            "circuit_breaker.recovery_timeout_sec",
            self.circuit_breaker.recovery_timeout_sec,
            1.0,
            3600.0,
        );
        self.circuit_breaker.max_recovery_timeout_sec = clamp_f64(
            "circuit_breaker.max_recovery_timeout_sec",
            self.circuit_breaker.max_recovery_timeout_sec,
            self.circuit_breaker.recovery_timeout_sec,
            86_400.0,
        );
        self.circuit_breaker.half_open_max_in_flight = clamp_usize(
            "circuit_breaker.half_open_max_in_flight",
            self.circuit_breaker.half_open_max_in_flight,
            1,
            10,
        );

        self.health.check_interval_sec =
            clamp_f64("health.check_interval_sec", self.health.check_interval_sec, 5.0, 300.0);
        self.health.cpu_threshold =
            clamp_f32("health.cpu_threshold", self.health.cpu_threshold, 1.0, 100.0);
        self.health.memory_threshold =
            clamp_f32("health.memory_threshold", self.health.memory_threshold, 1.0, 100.0);
        self.health.disk_threshold =
            clamp_f32("health.disk_threshold", self.health.disk_threshold, 1.0, 100.0);
        self.health.check_timeout_sec =
            clamp_f64("health.check_timeout_sec", self.health.check_timeout_sec, 1.0, 60.0);

        self.metrics.collection_interval_sec = clamp_f64(
            "metrics.collection_interval_sec",
            self.metrics.collection_interval_sec,
            5.0,
            300.0,
        );
    }
}
