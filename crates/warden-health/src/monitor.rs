//! Interval evaluation and aggregation of the registered checks.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::{
    CheckOutcome, CheckPriority, HealthCheck, HealthReport, HealthStatus, StatusTransition,
};

/// Transitions retained for operators.
const HISTORY_LIMIT: usize = 32;

/// Monitor cadence settings.
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    /// Time between sweeps.
    pub check_interval: Duration,
    /// Budget for one check evaluation; overruns count as unhealthy.
    pub check_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            check_timeout: Duration::from_secs(10),
        }
    }
}

/// Owns the checks, the latest report, and the transition history.
pub struct HealthMonitor {
    settings: MonitorSettings,
    checks: Vec<Arc<dyn HealthCheck>>,
    current: RwLock<Option<Arc<HealthReport>>>,
    history: Mutex<VecDeque<StatusTransition>>,
    started_at: Instant,
}

impl HealthMonitor {
    /// Create a monitor with no checks registered.
    pub fn new(settings: MonitorSettings) -> Self {
        Self {
            settings,
            checks: Vec::new(),
            current: RwLock::new(None),
            history: Mutex::new(VecDeque::new()),
            started_at: Instant::now(),
        }
    }

    /// Register a check. Only callable before the monitor is shared.
    pub fn register(&mut self, check: Arc<dyn HealthCheck>) {
        debug!(check = check.name(), priority = ?check.priority(), "registered health check");
        self.checks.push(check);
    }

    /// The most recent report, if a sweep has completed.
    pub fn current(&self) -> Option<Arc<HealthReport>> {
        self.current
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Recorded aggregate-status transitions, oldest first.
    pub fn history(&self) -> Vec<StatusTransition> {
        self.history
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Run every check once and publish the aggregated report.
    pub async fn run_once(&self) -> Arc<HealthReport> {
        let mut outcomes = BTreeMap::new();
        let mut aggregate = HealthStatus::Healthy;

        for check in &self.checks {
            let started = Instant::now();
            let result = match tokio::time::timeout(self.settings.check_timeout, check.check()).await
            {
                Ok(result) => result,
                Err(_) => crate::CheckResult::unhealthy(format!(
                    "check timed out after {:?}",
                    self.settings.check_timeout
                )),
            };
            let duration_sec = started.elapsed().as_secs_f64();

            // Informational checks report, but never move the aggregate.
            match check.priority() {
                CheckPriority::Critical if result.status != HealthStatus::Healthy => {
                    aggregate = HealthStatus::Unhealthy;
                }
                CheckPriority::Important if result.status != HealthStatus::Healthy => {
                    aggregate = aggregate.worst(HealthStatus::Degraded);
                }
                _ => {}
            }

            outcomes.insert(
                check.name().to_string(),
                CheckOutcome {
                    status: result.status,
                    message: result.message,
                    priority: check.priority(),
                    duration_sec,
                    details: result.details,
                },
            );
        }

        let report = Arc::new(HealthReport {
            status: aggregate,
            timestamp: Utc::now(),
            uptime_sec: self.started_at.elapsed().as_secs_f64(),
            checks: outcomes,
        });

        let previous = {
            let mut current = self.current.write().unwrap_or_else(|p| p.into_inner());
            std::mem::replace(&mut *current, Some(report.clone()))
        };
        let previous_status = previous.map(|r| r.status);
        if previous_status != Some(report.status) {
            if let Some(from) = previous_status {
                info!(from = %from, to = %report.status, "health status transition");
                let mut history = self.history.lock().unwrap_or_else(|p| p.into_inner());
                history.push_back(StatusTransition {
                    from,
                    to: report.status,
                    timestamp: report.timestamp,
                });
                while history.len() > HISTORY_LIMIT {
                    history.pop_front();
                }
            }
            if report.status != HealthStatus::Healthy {
                warn!(status = %report.status, "service health is not nominal");
            }
        }

        report
    }

    /// Run sweeps forever at the configured interval.
    ///
    /// Spawn this on the runtime; it is the only writer of the report.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.settings.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }
}
