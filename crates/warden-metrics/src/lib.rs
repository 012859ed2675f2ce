#![forbid(unsafe_code)]

//! **warden-metrics** – Metrics collection and export for Warden.
//!
//! One [`MetricsRegistry`] is constructed per process (owned by the tool
//! registry) and holds every Prometheus family; per-tool [`ToolMetrics`]
//! wrappers bind label values against those families. Recording is
//! best-effort by contract: a metrics failure is logged and dropped and can
//! never fail the execution it describes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use serde::Serialize;
use tracing::warn;
use warden_types::ErrorKind;

/// Final status of one recorded execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Child exited zero with nothing flagged.
    Success,
    /// Any failure other than a watchdog timeout.
    Failure,
    /// The watchdog terminated the child.
    Timeout,
}

impl ExecutionStatus {
    /// Stable label value for the `status` dimension.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failure => "failure",
            ExecutionStatus::Timeout => "timeout",
        }
    }
}

/// In-memory execution statistics for one tool.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolStats {
    /// Total recorded executions.
    pub count: u64,
    /// Executions that finished successfully.
    pub success_count: u64,
    /// Executions that failed for any non-timeout reason.
    pub failure_count: u64,
    /// Executions terminated by the watchdog.
    pub timeout_count: u64,
    /// Shortest observed execution in seconds.
    pub min_sec: Option<f64>,
    /// Longest observed execution in seconds.
    pub max_sec: Option<f64>,
    /// Sum of execution durations in seconds.
    pub sum_sec: f64,
    /// Timestamp of the most recent recorded execution.
    pub last_execution: Option<DateTime<Utc>>,
}

impl ToolStats {
    /// Mean execution duration in seconds, if anything was recorded.
    pub fn mean_sec(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum_sec / self.count as f64)
    }

    fn record(&mut self, status: ExecutionStatus, duration_sec: f64) {
        self.count += 1;
        match status {
            ExecutionStatus::Success => self.success_count += 1,
            ExecutionStatus::Failure => self.failure_count += 1,
            ExecutionStatus::Timeout => self.timeout_count += 1,
        }
        self.min_sec = Some(self.min_sec.map_or(duration_sec, |m| m.min(duration_sec)));
        self.max_sec = Some(self.max_sec.map_or(duration_sec, |m| m.max(duration_sec)));
        self.sum_sec += duration_sec;
        self.last_execution = Some(Utc::now());
    }

    fn merge_into(&self, total: &mut ToolStats) {
        total.count += self.count;
        total.success_count += self.success_count;
        total.failure_count += self.failure_count;
        total.timeout_count += self.timeout_count;
        total.sum_sec += self.sum_sec;
        total.min_sec = match (total.min_sec, self.min_sec) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        total.max_sec = match (total.max_sec, self.max_sec) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        total.last_execution = match (total.last_execution, self.last_execution) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Process-wide owner of every Prometheus family.
///
/// Families are created exactly once, in the constructor; wrappers only take
/// label values against them (label-stable by construction).
pub struct MetricsRegistry {
    registry: Registry,
    executions: IntCounterVec,
    duration: HistogramVec,
    active: IntGaugeVec,
    errors: IntCounterVec,
    stats: Mutex<HashMap<String, ToolStats>>,
}

impl MetricsRegistry {
    /// Create and register the metric families.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let executions = IntCounterVec::new(
            Opts::new(
                "warden_tool_executions_total",
                "Tool executions by status and error type",
            ),
            &["tool", "status", "error_type"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "warden_tool_execution_seconds",
                "Tool execution wall-clock duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
            &["tool"],
        )?;
        let active = IntGaugeVec::new(
            Opts::new("warden_tool_active_executions", "Currently running subprocesses"),
            &["tool"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("warden_tool_errors_total", "Tool failures by error type"),
            &["tool", "error_type"],
        )?;

        registry.register(Box::new(executions.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(active.clone()))?;
        registry.register(Box::new(errors.clone()))?;

        Ok(Self {
            registry,
            executions,
            duration,
            active,
            errors,
            stats: Mutex::new(HashMap::new()),
        })
    }

    /// Bind a per-tool wrapper against the shared families.
    pub fn for_tool(self: &Arc<Self>, tool: impl Into<String>) -> ToolMetrics {
        ToolMetrics {
            registry: Arc::clone(self),
            tool: tool.into(),
        }
    }

    /// In-memory statistics for one tool.
    pub fn tool_stats(&self, tool: &str) -> ToolStats {
        self.lock_stats().get(tool).cloned().unwrap_or_default()
    }

    /// In-memory statistics for every tool that recorded anything.
    pub fn all_tool_stats(&self) -> HashMap<String, ToolStats> {
        self.lock_stats().clone()
    }

    /// Process-wide aggregate over every tool.
    pub fn aggregate_stats(&self) -> ToolStats {
        let mut total = ToolStats::default();
        for stats in self.lock_stats().values() {
            stats.merge_into(&mut total);
        }
        total
    }

    /// Prometheus text exposition of every family.
    ///
    /// Encoding problems are logged and yield an empty body rather than an
    /// error: the exposition endpoint must never take the server down.
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&families, &mut buffer) {
            warn!(error = %err, "failed to encode metrics exposition");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_else(|err| {
            warn!(error = %err, "metrics exposition was not valid UTF-8");
            String::new()
        })
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, HashMap<String, ToolStats>> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("tools", &self.lock_stats().len())
            .finish()
    }
}

/// Per-tool handle binding label values against the shared families.
#[derive(Clone)]
pub struct ToolMetrics {
    registry: Arc<MetricsRegistry>,
    tool: String,
}

impl ToolMetrics {
    /// Tool name these metrics are labelled with.
    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Mark an execution as started; the guard decrements the active gauge
    /// when dropped, on every path.
    pub fn begin_execution(&self) -> ActiveExecution {
        self.registry.active.with_label_values(&[self.tool.as_str()]).inc();
        ActiveExecution {
            registry: Arc::clone(&self.registry),
            tool: self.tool.clone(),
        }
    }

    /// Record one finished execution.
    ///
    /// Never fails; any internal problem is logged and dropped.
    pub fn record_execution(
        &self,
        status: ExecutionStatus,
        error_kind: Option<ErrorKind>,
        duration_sec: f64,
    ) {
        let error_label = error_kind.map_or("none", |kind| kind.as_str());
        self.registry
            .executions
            .with_label_values(&[self.tool.as_str(), status.as_str(), error_label])
            .inc();
        self.registry
            .duration
            .with_label_values(&[self.tool.as_str()])
            .observe(duration_sec);
        if let Some(kind) = error_kind {
            self.registry
                .errors
                .with_label_values(&[self.tool.as_str(), kind.as_str()])
                .inc();
        }

        self.registry
            .lock_stats()
            .entry(self.tool.clone())
            .or_default()
            .record(status, duration_sec);
    }

    /// In-memory statistics for this tool.
    pub fn stats(&self) -> ToolStats {
        self.registry.tool_stats(&self.tool)
    }
}

impl std::fmt::Debug for ToolMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolMetrics").field("tool", &self.tool).finish()
    }
}

/// RAII guard for the active-executions gauge.
pub struct ActiveExecution {
    registry: Arc<MetricsRegistry>,
    tool: String,
}

impl Drop for ActiveExecution {
    fn drop(&mut self) {
        self.registry.active.with_label_values(&[self.tool.as_str()]).dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<MetricsRegistry> {
        Arc::new(MetricsRegistry::new().expect("metric families"))
    }

    #[test]
    fn records_counts_and_durations() {
        let registry = registry();
        let metrics = registry.for_tool("PortSweep");

        metrics.record_execution(ExecutionStatus::Success, None, 1.0);
        metrics.record_execution(ExecutionStatus::Timeout, Some(ErrorKind::Timeout), 5.0);
        metrics.record_execution(ExecutionStatus::Failure, Some(ErrorKind::Execution), 0.5);

        let stats = metrics.stats();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.timeout_count, 1);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.min_sec, Some(0.5));
        assert_eq!(stats.max_sec, Some(5.0));
        assert!((stats.mean_sec().unwrap() - (6.5 / 3.0)).abs() < 1e-9);
        assert!(stats.last_execution.is_some());
    }

    #[test]
    fn active_gauge_follows_guard_lifetime() {
        let registry = registry();
        let metrics = registry.for_tool("ServiceScan");

        let guard = metrics.begin_execution();
        let exposition = registry.gather_text();
        assert!(exposition.contains("warden_tool_active_executions{tool=\"ServiceScan\"} 1"));

        drop(guard);
        let exposition = registry.gather_text();
        assert!(exposition.contains("warden_tool_active_executions{tool=\"ServiceScan\"} 0"));
    }

    #[test]
    fn exposition_contains_labelled_counters() {
        let registry = registry();
        registry
            .for_tool("WebEnum")
            .record_execution(ExecutionStatus::Success, None, 2.0);

        let exposition = registry.gather_text();
        assert!(exposition.contains("warden_tool_executions_total"));
        assert!(exposition.contains("tool=\"WebEnum\""));
        assert!(exposition.contains("status=\"success\""));
    }

    #[test]
    fn aggregate_sums_across_tools() {
        let registry = registry();
        registry
            .for_tool("a")
            .record_execution(ExecutionStatus::Success, None, 1.0);
        registry
            .for_tool("b")
            .record_execution(ExecutionStatus::Failure, Some(ErrorKind::Execution), 3.0);

        let total = registry.aggregate_stats();
        assert_eq!(total.count, 2);
        assert_eq!(total.success_count, 1);
        assert_eq!(total.failure_count, 1);
        assert_eq!(total.min_sec, Some(1.0));
        assert_eq!(total.max_sec, Some(3.0));
    }
}
