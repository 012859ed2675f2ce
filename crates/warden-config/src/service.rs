//! Snapshot construction and publication.
//!
//! Sources are merged low-to-high: built-in defaults, then the TOML
//! configuration file, then the process environment. The result is clamped
//! to safe ranges and published as an immutable `Arc` snapshot. Reload is
//! explicit: it either publishes a new snapshot or leaves the previous one
//! in place.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{error, info, warn};

use crate::error::ConfigError;
use crate::model::{Config, Transport};

/// Owns the current configuration snapshot and its sources.
pub struct ConfigService {
    file_path: Option<PathBuf>,
    current: RwLock<Arc<Config>>,
}

impl ConfigService {
    /// Build the initial snapshot from defaults, `file_path` (optional), and
    /// the process environment.
    ///
    /// A missing file is not an error; an unreadable or unparseable one is,
    /// since at startup there is no previous snapshot to fall back to.
    pub fn load(file_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let snapshot = build_snapshot(file_path.as_deref(), &process_env())?;
        Ok(Self {
            file_path,
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// The current snapshot. Cheap; callers keep the `Arc` for the call.
    pub fn current(&self) -> Arc<Config> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Rebuild from the same sources and publish on success.
    ///
    /// On failure the previous snapshot stays published and the error is
    /// returned for the caller to report.
    pub fn reload(&self) -> Result<Arc<Config>, ConfigError> {
        match build_snapshot(self.file_path.as_deref(), &process_env()) {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                *self
                    .current
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = snapshot.clone();
                info!("configuration reloaded");
                Ok(snapshot)
            }
            Err(err) => {
                error!(error = %err, "configuration reload failed, keeping previous snapshot");
                Err(err)
            }
        }
    }

    /// Log a secrets-free one-line summary per section.
    pub fn log_summary(&self) {
        let config = self.current();
        info!(
            host = %config.server.host,
            port = config.server.port,
            transport = %config.server.transport,
            shutdown_grace_sec = config.server.shutdown_grace_sec,
            "config.server"
        );
        info!(
            default_timeout_sec = config.tool.default_timeout_sec,
            default_concurrency = config.tool.default_concurrency,
            max_args_len = config.tool.max_args_len,
            "config.tool"
        );
        info!(
            allow_intrusive = config.security.allow_intrusive,
            max_scan_rate = config.security.max_scan_rate,
            "config.security"
        );
        info!(
            failure_threshold = config.circuit_breaker.failure_threshold,
            recovery_timeout_sec = config.circuit_breaker.recovery_timeout_sec,
            half_open_max_in_flight = config.circuit_breaker.half_open_max_in_flight,
            "config.circuit_breaker"
        );
        info!(
            check_interval_sec = config.health.check_interval_sec,
            cpu_threshold = config.health.cpu_threshold,
            memory_threshold = config.health.memory_threshold,
            disk_threshold = config.health.disk_threshold,
            "config.health"
        );
        info!(
            enabled = config.metrics.enabled,
            prometheus_enabled = config.metrics.prometheus_enabled,
            "config.metrics"
        );
    }
}

/// Capture the process environment as a map, for uniform testability.
fn process_env() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Merge defaults, file, and environment into a clamped snapshot.
pub fn build_snapshot(
    file: Option<&Path>,
    env: &HashMap<String, String>,
) -> Result<Config, ConfigError> {
    let mut config = Config::default();

    if let Some(path) = file {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let value: toml::Value =
                    toml::from_str(&text).map_err(|e| ConfigError::FileParse {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    })?;
                apply_file(&mut config, &value)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "configuration file not found, using defaults and environment");
            }
            Err(e) => {
                return Err(ConfigError::FileRead {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }
    }

    apply_env(&mut config, env)?;
    config.clamp_to_safe_ranges();
    Ok(config)
}

fn string_value(value: &toml::Value, key: &str) -> Result<String, ConfigError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("expected string, got {value}"),
        })
}

fn bool_value(value: &toml::Value, key: &str) -> Result<bool, ConfigError> {
    value.as_bool().ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("expected boolean, got {value}"),
    })
}

fn string_array(value: &toml::Value, key: &str) -> Result<Vec<String>, ConfigError> {
    let items = value.as_array().ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("expected array of strings, got {value}"),
    })?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("expected string entry, got {item}"),
                })
        })
        .collect()
}

fn numeric_f64(value: &toml::Value, key: &str) -> Result<f64, ConfigError> {
    value
        .as_float()
        .or_else(|| value.as_integer().map(|v| v as f64))
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("expected number, got {value}"),
        })
}

/// Apply the well-known keys of a parsed TOML tree onto `config`.
///
/// Unknown sections and keys are ignored with a log line so that a file
/// shared between deployments of different versions keeps loading.
fn apply_file(config: &mut Config, value: &toml::Value) -> Result<(), ConfigError> {
    let root = match value.as_table() {
        Some(table) => table,
        None => return Ok(()),
    };

    for (section, body) in root {
        let table = match body.as_table() {
            Some(table) => table,
            None => {
                warn!(section = %section, "ignoring non-table configuration section");
                continue;
            }
        };
        match section.as_str() {
            "server" => {
                for (key, entry) in table {
                    match key.as_str() {
                        "host" => {
                            config.server.host = string_value(entry, "server.host")?;
                        }
                        "port" => {
                            let port = numeric_f64(entry, "server.port")?;
                            config.server.port = port as u16;
                        }
                        "transport" => {
                            let raw = string_value(entry, "server.transport")?;
                            config.server.transport =
                                raw.parse::<Transport>().map_err(|reason| {
                                    ConfigError::InvalidValue {
                                        key: "server.transport".to_string(),
                                        reason,
                                    }
                                })?;
                        }
                        "shutdown_grace_sec" => {
                            config.server.shutdown_grace_sec =
                                numeric_f64(entry, "server.shutdown_grace_sec")?;
                        }
                        other => info!(section = %section, key = other, "ignoring unknown configuration key"),
                    }
                }
            }
            "tool" => {
                for (key, entry) in table {
                    match key.as_str() {
                        "default_timeout_sec" => {
                            config.tool.default_timeout_sec =
                                numeric_f64(entry, "tool.default_timeout_sec")?;
                        }
                        "default_concurrency" => {
                            config.tool.default_concurrency =
                                numeric_f64(entry, "tool.default_concurrency")? as usize;
                        }
                        "max_args_len" => {
                            config.tool.max_args_len =
                                numeric_f64(entry, "tool.max_args_len")? as usize;
                        }
                        "max_stdout_bytes" => {
                            config.tool.max_stdout_bytes =
                                numeric_f64(entry, "tool.max_stdout_bytes")? as usize;
                        }
                        "max_stderr_bytes" => {
                            config.tool.max_stderr_bytes =
                                numeric_f64(entry, "tool.max_stderr_bytes")? as usize;
                        }
                        "include" => config.tool.include = string_array(entry, "tool.include")?,
                        "exclude" => config.tool.exclude = string_array(entry, "tool.exclude")?,
                        other => info!(section = %section, key = other, "ignoring unknown configuration key"),
                    }
                }
            }
            "security" => {
                for (key, entry) in table {
                    match key.as_str() {
                        "allow_intrusive" => {
                            config.security.allow_intrusive =
                                bool_value(entry, "security.allow_intrusive")?;
                        }
                        "max_scan_rate" => {
                            config.security.max_scan_rate =
                                numeric_f64(entry, "security.max_scan_rate")? as u32;
                        }
                        "target_allowlist" => {
                            config.security.target_allowlist =
                                string_array(entry, "security.target_allowlist")?;
                        }
                        other => info!(section = %section, key = other, "ignoring unknown configuration key"),
                    }
                }
            }
            "circuit_breaker" => {
                for (key, entry) in table {
                    match key.as_str() {
                        "failure_threshold" => {
                            config.circuit_breaker.failure_threshold =
                                numeric_f64(entry, "circuit_breaker.failure_threshold")? as u32;
                        }
                        "recovery_timeout_sec" => {
                            config.circuit_breaker.recovery_timeout_sec =
                                numeric_f64(entry, "circuit_breaker.recovery_timeout_sec")?;
                        }
                        "max_recovery_timeout_sec" => {
                            config.circuit_breaker.max_recovery_timeout_sec =
                                numeric_f64(entry, "circuit_breaker.max_recovery_timeout_sec")?;
                        }
                        "half_open_max_in_flight" => {
                            config.circuit_breaker.half_open_max_in_flight =
                                numeric_f64(entry, "circuit_breaker.half_open_max_in_flight")?
                                    as usize;
                        }
                        other => info!(section = %section, key = other, "ignoring unknown configuration key"),
                    }
                }
            }
            "health" => {
                for (key, entry) in table {
                    match key.as_str() {
                        "check_interval_sec" => {
                            config.health.check_interval_sec =
                                numeric_f64(entry, "health.check_interval_sec")?;
                        }
                        "cpu_threshold" => {
                            config.health.cpu_threshold =
                                numeric_f64(entry, "health.cpu_threshold")? as f32;
                        }
                        "memory_threshold" => {
                            config.health.memory_threshold =
                                numeric_f64(entry, "health.memory_threshold")? as f32;
                        }
                        "disk_threshold" => {
                            config.health.disk_threshold =
                                numeric_f64(entry, "health.disk_threshold")? as f32;
                        }
                        "check_timeout_sec" => {
                            config.health.check_timeout_sec =
                                numeric_f64(entry, "health.check_timeout_sec")?;
                        }
                        other => info!(section = %section, key = other, "ignoring unknown configuration key"),
                    }
                }
            }
            "metrics" => {
                for (key, entry) in table {
                    match key.as_str() {
                        "enabled" => {
                            config.metrics.enabled = bool_value(entry, "metrics.enabled")?;
                        }
                        "prometheus_enabled" => {
                            config.metrics.prometheus_enabled =
                                bool_value(entry, "metrics.prometheus_enabled")?;
                        }
                        "collection_interval_sec" => {
                            config.metrics.collection_interval_sec =
                                numeric_f64(entry, "metrics.collection_interval_sec")?;
                        }
                        other => info!(section = %section, key = other, "ignoring unknown configuration key"),
                    }
                }
            }
            "logging" => {
                for (key, entry) in table {
                    match key.as_str() {
                        "level" => {
                            config.logging.level = string_value(entry, "logging.level")?;
                        }
                        "format" => {
                            config.logging.format = string_value(entry, "logging.format")?;
                        }
                        other => info!(section = %section, key = other, "ignoring unknown configuration key"),
                    }
                }
            }
            other => info!(section = other, "ignoring unknown configuration section"),
        }
    }
    Ok(())
}

fn env_bool(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn env_parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("'{raw}': {e}"),
    })
}

fn env_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Apply the recognized environment variables onto `config`.
fn apply_env(config: &mut Config, env: &HashMap<String, String>) -> Result<(), ConfigError> {
    if let Some(raw) = env.get("MCP_SERVER_TRANSPORT") {
        config.server.transport =
            raw.parse::<Transport>().map_err(|reason| ConfigError::InvalidValue {
                key: "MCP_SERVER_TRANSPORT".to_string(),
                reason,
            })?;
    }
    if let Some(raw) = env.get("MCP_SERVER_HOST") {
        config.server.host = raw.clone();
    }
    if let Some(raw) = env.get("MCP_SERVER_PORT") {
        config.server.port = env_parse("MCP_SERVER_PORT", raw)?;
    }
    if let Some(raw) = env.get("MCP_SERVER_SHUTDOWN_GRACE_PERIOD") {
        config.server.shutdown_grace_sec = env_parse("MCP_SERVER_SHUTDOWN_GRACE_PERIOD", raw)?;
    }

    if let Some(raw) = env.get("TOOLS_INCLUDE") {
        config.tool.include = env_csv(raw);
    }
    if let Some(raw) = env.get("TOOLS_EXCLUDE") {
        config.tool.exclude = env_csv(raw);
    }
    if let Some(raw) = env.get("MCP_MAX_ARGS_LEN") {
        config.tool.max_args_len = env_parse("MCP_MAX_ARGS_LEN", raw)?;
    }
    if let Some(raw) = env.get("MCP_MAX_STDOUT_BYTES") {
        config.tool.max_stdout_bytes = env_parse("MCP_MAX_STDOUT_BYTES", raw)?;
    }
    if let Some(raw) = env.get("MCP_MAX_STDERR_BYTES") {
        config.tool.max_stderr_bytes = env_parse("MCP_MAX_STDERR_BYTES", raw)?;
    }
    if let Some(raw) = env.get("MCP_DEFAULT_TIMEOUT_SEC") {
        config.tool.default_timeout_sec = env_parse("MCP_DEFAULT_TIMEOUT_SEC", raw)?;
    }
    if let Some(raw) = env.get("MCP_DEFAULT_CONCURRENCY") {
        config.tool.default_concurrency = env_parse("MCP_DEFAULT_CONCURRENCY", raw)?;
    }

    if let Some(raw) = env.get("MCP_CIRCUIT_BREAKER_FAILURE_THRESHOLD") {
        config.circuit_breaker.failure_threshold =
            env_parse("MCP_CIRCUIT_BREAKER_FAILURE_THRESHOLD", raw)?;
    }
    if let Some(raw) = env.get("MCP_CIRCUIT_BREAKER_RECOVERY_TIMEOUT") {
        config.circuit_breaker.recovery_timeout_sec =
            env_parse("MCP_CIRCUIT_BREAKER_RECOVERY_TIMEOUT", raw)?;
    }

    if let Some(raw) = env.get("MCP_HEALTH_CHECK_INTERVAL") {
        config.health.check_interval_sec = env_parse("MCP_HEALTH_CHECK_INTERVAL", raw)?;
    }
    if let Some(raw) = env.get("MCP_HEALTH_CPU_THRESHOLD") {
        config.health.cpu_threshold = env_parse("MCP_HEALTH_CPU_THRESHOLD", raw)?;
    }
    if let Some(raw) = env.get("MCP_HEALTH_MEMORY_THRESHOLD") {
        config.health.memory_threshold = env_parse("MCP_HEALTH_MEMORY_THRESHOLD", raw)?;
    }
    if let Some(raw) = env.get("MCP_HEALTH_DISK_THRESHOLD") {
        config.health.disk_threshold = env_parse("MCP_HEALTH_DISK_THRESHOLD", raw)?;
    }
    if let Some(raw) = env.get("MCP_HEALTH_CHECK_TIMEOUT") {
        config.health.check_timeout_sec = env_parse("MCP_HEALTH_CHECK_TIMEOUT", raw)?;
    }

    if let Some(raw) = env.get("MCP_METRICS_ENABLED") {
        config.metrics.enabled = env_bool(raw);
        config.metrics.prometheus_enabled = env_bool(raw);
    }
    if let Some(raw) = env.get("MCP_SECURITY_ALLOW_INTRUSIVE") {
        config.security.allow_intrusive = env_bool(raw);
    }
    if let Some(raw) = env.get("MCP_SECURITY_MAX_SCAN_RATE") {
        config.security.max_scan_rate = env_parse("MCP_SECURITY_MAX_SCAN_RATE", raw)?;
    }
    if let Some(raw) = env.get("LOG_LEVEL") {
        config.logging.level = raw.to_ascii_lowercase();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn defaults_when_no_sources() {
        let config = build_snapshot(None, &no_env()).expect("load");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config =
            build_snapshot(Some(Path::new("/nonexistent/warden.toml")), &no_env()).expect("load");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn file_overrides_defaults_and_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            r#"
[server]
transport = "http"
port = 9000

[security]
allow_intrusive = true
max_scan_rate = 5000
"#
        )
        .expect("write");

        let mut env = no_env();
        env.insert("MCP_SERVER_PORT".to_string(), "9100".to_string());

        let config = build_snapshot(Some(file.path()), &env).expect("load");
        assert_eq!(config.server.transport, Transport::Http);
        assert_eq!(config.server.port, 9100); // env wins
        assert!(config.security.allow_intrusive);
        assert_eq!(config.security.max_scan_rate, 5000);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            r#"
[server]
port = 9000
experimental_flag = true

[future_section]
key = 1
"#
        )
        .expect("write");

        let config = build_snapshot(Some(file.path()), &no_env()).expect("load");
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn unparseable_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "this is not toml [[[").expect("write");
        let result = build_snapshot(Some(file.path()), &no_env());
        assert!(matches!(result, Err(ConfigError::FileParse { .. })));
    }

    #[test]
    fn invalid_env_value_is_an_error() {
        let mut env = no_env();
        env.insert("MCP_SERVER_PORT".to_string(), "not-a-port".to_string());
        let result = build_snapshot(None, &env);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn env_csv_and_bool_shapes() {
        let mut env = no_env();
        env.insert("TOOLS_INCLUDE".to_string(), "PortSweep, ServiceScan".to_string());
        env.insert("MCP_SECURITY_ALLOW_INTRUSIVE".to_string(), "yes".to_string());
        let config = build_snapshot(None, &env).expect("load");
        assert_eq!(config.tool.include, vec!["PortSweep", "ServiceScan"]);
        assert!(config.security.allow_intrusive);
    }

    #[test]
    fn out_of_range_file_values_are_clamped_not_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            r#"
[tool]
default_concurrency = 100000
"#
        )
        .expect("write");
        let config = build_snapshot(Some(file.path()), &no_env()).expect("load");
        assert_eq!(config.tool.default_concurrency, 64);
    }
}
