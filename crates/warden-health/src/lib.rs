#![forbid(unsafe_code)]

//! **warden-health** – Priority-tagged health checks for Warden.
//!
//! Checks are evaluated on a fixed interval with a per-check timeout and
//! aggregated worst-first: a failed critical check makes the process
//! unhealthy, a failed important check degrades it, informational checks are
//! reported but never change the aggregate. A bounded history of status
//! transitions is retained for operators.

mod checks;
mod monitor;

pub use checks::{
    BreakerStateCheck, BreakerStateSource, LivenessCheck, ResourceThresholds, SystemResourcesCheck,
    ToolAvailabilityCheck, WorkspaceCheck,
};
pub use monitor::{HealthMonitor, MonitorSettings};

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Aggregated or per-check health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Everything within thresholds.
    Healthy,
    /// Operating with reduced capacity or confidence.
    Degraded,
    /// A critical condition failed.
    Unhealthy,
}

impl HealthStatus {
    /// Worst of two statuses.
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        use HealthStatus::*;
        match (self, other) {
            (Unhealthy, _) | (_, Unhealthy) => Unhealthy,
            (Degraded, _) | (_, Degraded) => Degraded,
            _ => Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => f.write_str("healthy"),
            HealthStatus::Degraded => f.write_str("degraded"),
            HealthStatus::Unhealthy => f.write_str("unhealthy"),
        }
    }
}

/// Evaluation priority; lower values gate the aggregate harder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckPriority {
    /// Process liveness; failure means the service cannot serve at all.
    Critical = 0,
    /// Resource and dependency conditions; failure degrades service.
    Important = 1,
    /// Advisory conditions; reported, never aggregated.
    Informational = 2,
}

/// Outcome of one check evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// Check status.
    pub status: HealthStatus,
    /// One-line human-readable summary.
    pub message: String,
    /// Structured details for operators.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, serde_json::Value>,
}

impl CheckResult {
    /// Healthy outcome with a summary line.
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: message.into(),
            details: HashMap::new(),
        }
    }

    /// Degraded outcome with a summary line.
    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            message: message.into(),
            details: HashMap::new(),
        }
    }

    /// Unhealthy outcome with a summary line.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: message.into(),
            details: HashMap::new(),
        }
    }

    /// Attach a structured detail.
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

/// One health probe.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Stable name used as the key in reports.
    fn name(&self) -> &str;

    /// Aggregation priority.
    fn priority(&self) -> CheckPriority;

    /// Evaluate the check once.
    async fn check(&self) -> CheckResult;
}

/// Result of one check as embedded in a report.
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    /// Check status.
    pub status: HealthStatus,
    /// Summary line.
    pub message: String,
    /// Aggregation priority of the producing check.
    pub priority: CheckPriority,
    /// How long the evaluation took, in seconds.
    pub duration_sec: f64,
    /// Structured details.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, serde_json::Value>,
}

/// Aggregated snapshot of one full check sweep.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Aggregate status.
    pub status: HealthStatus,
    /// When the sweep finished.
    pub timestamp: DateTime<Utc>,
    /// Seconds since the monitor started.
    pub uptime_sec: f64,
    /// Per-check outcomes, keyed by check name.
    pub checks: BTreeMap<String, CheckOutcome>,
}

/// One recorded aggregate-status transition.
#[derive(Debug, Clone, Serialize)]
pub struct StatusTransition {
    /// Status before the transition.
    pub from: HealthStatus,
    /// Status after the transition.
    pub to: HealthStatus,
    /// When the transition was observed.
    pub timestamp: DateTime<Utc>,
}
