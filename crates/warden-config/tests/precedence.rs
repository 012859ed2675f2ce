//! Source-precedence matrix: defaults, file, environment.

use std::collections::HashMap;
use std::io::Write;

use warden_config::{build_snapshot, Config, Transport};

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn the_full_environment_surface_is_recognized() {
    let env = env(&[
        ("MCP_SERVER_TRANSPORT", "http"),
        ("MCP_SERVER_HOST", "0.0.0.0"),
        ("MCP_SERVER_PORT", "9090"),
        ("MCP_SERVER_SHUTDOWN_GRACE_PERIOD", "12.5"),
        ("TOOLS_INCLUDE", "PortSweep,ServiceScan"),
        ("TOOLS_EXCLUDE", "ServiceScan"),
        ("MCP_MAX_ARGS_LEN", "1024"),
        ("MCP_MAX_STDOUT_BYTES", "65536"),
        ("MCP_MAX_STDERR_BYTES", "32768"),
        ("MCP_DEFAULT_TIMEOUT_SEC", "120"),
        ("MCP_DEFAULT_CONCURRENCY", "3"),
        ("MCP_CIRCUIT_BREAKER_FAILURE_THRESHOLD", "7"),
        ("MCP_CIRCUIT_BREAKER_RECOVERY_TIMEOUT", "90"),
        ("MCP_HEALTH_CHECK_INTERVAL", "15"),
        ("MCP_HEALTH_CPU_THRESHOLD", "70"),
        ("MCP_HEALTH_MEMORY_THRESHOLD", "75"),
        ("MCP_HEALTH_DISK_THRESHOLD", "80"),
        ("MCP_HEALTH_CHECK_TIMEOUT", "5"),
        ("MCP_METRICS_ENABLED", "false"),
        ("MCP_SECURITY_ALLOW_INTRUSIVE", "true"),
        ("MCP_SECURITY_MAX_SCAN_RATE", "5000"),
        ("LOG_LEVEL", "DEBUG"),
    ]);

    let config = build_snapshot(None, &env).expect("load");
    assert_eq!(config.server.transport, Transport::Http);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.server.shutdown_grace_sec, 12.5);
    assert_eq!(config.tool.include, vec!["PortSweep", "ServiceScan"]);
    assert_eq!(config.tool.exclude, vec!["ServiceScan"]);
    assert_eq!(config.tool.max_args_len, 1024);
    assert_eq!(config.tool.max_stdout_bytes, 65536);
    assert_eq!(config.tool.max_stderr_bytes, 32768);
    assert_eq!(config.tool.default_timeout_sec, 120.0);
    assert_eq!(config.tool.default_concurrency, 3);
    assert_eq!(config.circuit_breaker.failure_threshold, 7);
    assert_eq!(config.circuit_breaker.recovery_timeout_sec, 90.0);
    assert_eq!(config.health.check_interval_sec, 15.0);
    assert_eq!(config.health.cpu_threshold, 70.0);
    assert_eq!(config.health.memory_threshold, 75.0);
    assert_eq!(config.health.disk_threshold, 80.0);
    assert_eq!(config.health.check_timeout_sec, 5.0);
    assert!(!config.metrics.enabled);
    assert!(config.security.allow_intrusive);
    assert_eq!(config.security.max_scan_rate, 5000);
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn every_layer_wins_over_the_one_below() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(
        file,
        r#"
[tool]
default_timeout_sec = 100
default_concurrency = 8

[logging]
level = "warn"
format = "json"
"#
    )
    .expect("write");

    // Defaults < file.
    let config = build_snapshot(Some(file.path()), &env(&[])).expect("load");
    assert_eq!(config.tool.default_timeout_sec, 100.0);
    assert_eq!(config.tool.default_concurrency, 8);
    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.logging.format, "json");

    // File < environment, per key; untouched file keys survive.
    let config = build_snapshot(
        Some(file.path()),
        &env(&[("MCP_DEFAULT_TIMEOUT_SEC", "50")]),
    )
    .expect("load");
    assert_eq!(config.tool.default_timeout_sec, 50.0);
    assert_eq!(config.tool.default_concurrency, 8);
}

#[test]
fn environment_values_are_clamped_like_any_other_source() {
    let config = build_snapshot(None, &env(&[("MCP_DEFAULT_CONCURRENCY", "100000")])).expect("load");
    assert_eq!(config.tool.default_concurrency, 64);

    let config = build_snapshot(None, &env(&[("MCP_SECURITY_MAX_SCAN_RATE", "1")])).expect("load");
    assert_eq!(config.security.max_scan_rate, 100);
}

#[test]
fn snapshot_is_deterministic_for_identical_sources() {
    let env = env(&[("MCP_SERVER_PORT", "9000")]);
    let a = build_snapshot(None, &env).expect("load");
    let b = build_snapshot(None, &env).expect("load");
    assert_eq!(a, b);
    assert_ne!(a, Config::default());
}
