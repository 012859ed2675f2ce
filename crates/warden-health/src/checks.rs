//! Built-in health checks.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use sysinfo::{Disks, System};
use warden_breaker::BreakerState;

use crate::{CheckPriority, CheckResult, HealthCheck};

/// Critical check: the scheduler is alive and not wedged.
///
/// Measures the latency of yielding back to the runtime; a cooperative loop
/// that cannot schedule a trivial task within the threshold is effectively
/// down for every other handler too.
pub struct LivenessCheck {
    /// Yield latency above this many milliseconds is unhealthy.
    pub max_loop_lag_ms: u64,
}

impl Default for LivenessCheck {
    fn default() -> Self {
        Self { max_loop_lag_ms: 250 }
    }
}

#[async_trait]
impl HealthCheck for LivenessCheck {
    fn name(&self) -> &str {
        "process"
    }

    fn priority(&self) -> CheckPriority {
        CheckPriority::Critical
    }

    async fn check(&self) -> CheckResult {
        let start = Instant::now();
        tokio::task::yield_now().await;
        let lag = start.elapsed();
        let lag_ms = lag.as_millis() as u64;
        if lag_ms > self.max_loop_lag_ms {
            CheckResult::unhealthy(format!("scheduler lag {lag_ms}ms"))
                .with_detail("loop_lag_ms", json!(lag_ms))
        } else {
            CheckResult::healthy("process alive").with_detail("loop_lag_ms", json!(lag_ms))
        }
    }
}

/// Thresholds for [`SystemResourcesCheck`], expressed as used percentages.
#[derive(Debug, Clone, Copy)]
pub struct ResourceThresholds {
    /// CPU usage percentage above which the check degrades.
    pub cpu_percent: f32,
    /// Memory usage percentage above which the check degrades.
    pub memory_percent: f32,
    /// Disk usage percentage above which the check degrades.
    pub disk_percent: f32,
}

/// Important check: CPU, memory, and disk below configured thresholds.
pub struct SystemResourcesCheck {
    thresholds: ResourceThresholds,
    system: Mutex<System>,
}

impl SystemResourcesCheck {
    /// Create the check with the configured thresholds.
    pub fn new(thresholds: ResourceThresholds) -> Self {
        Self {
            thresholds,
            system: Mutex::new(System::new()),
        }
    }
}

#[async_trait]
impl HealthCheck for SystemResourcesCheck {
    fn name(&self) -> &str {
        "system_resources"
    }

    fn priority(&self) -> CheckPriority {
        CheckPriority::Important
    }

    async fn check(&self) -> CheckResult {
        let (cpu, memory) = {
            let mut system = self.system.lock().unwrap_or_else(|p| p.into_inner());
            system.refresh_cpu_usage();
            system.refresh_memory();
            let cpu = system.global_cpu_usage();
            let memory = if system.total_memory() > 0 {
                (system.used_memory() as f32 / system.total_memory() as f32) * 100.0
            } else {
                0.0
            };
            (cpu, memory)
        };

        let disks = Disks::new_with_refreshed_list();
        let (total, available) = disks.iter().fold((0u64, 0u64), |(t, a), disk| {
            (t + disk.total_space(), a + disk.available_space())
        });
        let disk = if total > 0 {
            ((total - available) as f32 / total as f32) * 100.0
        } else {
            0.0
        };

        let mut breaches = Vec::new();
        if cpu > self.thresholds.cpu_percent {
            breaches.push(format!("cpu {cpu:.1}% > {:.1}%", self.thresholds.cpu_percent));
        }
        if memory > self.thresholds.memory_percent {
            breaches.push(format!(
                "memory {memory:.1}% > {:.1}%",
                self.thresholds.memory_percent
            ));
        }
        if disk > self.thresholds.disk_percent {
            breaches.push(format!("disk {disk:.1}% > {:.1}%", self.thresholds.disk_percent));
        }

        let result = if breaches.is_empty() {
            CheckResult::healthy(format!(
                "cpu {cpu:.1}%, memory {memory:.1}%, disk {disk:.1}%"
            ))
        } else {
            CheckResult::unhealthy(breaches.join("; "))
        };
        result
            .with_detail("cpu_percent", json!(cpu))
            .with_detail("memory_percent", json!(memory))
            .with_detail("disk_percent", json!(disk))
    }
}

/// Important check: the execution prerequisites every tool shares.
///
/// The subprocess layer needs a usable PATH for command resolution and a
/// writable temporary directory for scratch files; losing either breaks all
/// tools at once, independent of any one binary.
pub struct WorkspaceCheck;

#[async_trait]
impl HealthCheck for WorkspaceCheck {
    fn name(&self) -> &str {
        "dependencies"
    }

    fn priority(&self) -> CheckPriority {
        CheckPriority::Important
    }

    async fn check(&self) -> CheckResult {
        if std::env::var_os("PATH").map_or(true, |path| path.is_empty()) {
            return CheckResult::unhealthy("PATH is empty; no tool binary can resolve");
        }
        let probe = std::env::temp_dir().join(format!("warden-health-{}", std::process::id()));
        match std::fs::write(&probe, b"probe") {
            Ok(()) => {
                let _ = std::fs::remove_file(&probe);
                CheckResult::healthy("PATH set, temp dir writable")
            }
            Err(err) => CheckResult::unhealthy(format!(
                "temp dir {} not writable: {err}",
                std::env::temp_dir().display()
            )),
        }
    }
}

/// Informational check: each registered tool's binary resolves on PATH.
pub struct ToolAvailabilityCheck {
    tools: Vec<(String, String)>,
}

impl ToolAvailabilityCheck {
    /// `tools` pairs each registered tool name with its binary name.
    pub fn new(tools: Vec<(String, String)>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl HealthCheck for ToolAvailabilityCheck {
    fn name(&self) -> &str {
        "tool_availability"
    }

    fn priority(&self) -> CheckPriority {
        CheckPriority::Informational
    }

    async fn check(&self) -> CheckResult {
        let mut missing = Vec::new();
        let mut result = CheckResult::healthy("");
        for (tool, command) in &self.tools {
            let resolved = which::which(command).is_ok();
            result = result.with_detail(tool.clone(), json!(resolved));
            if !resolved {
                missing.push(format!("{tool} ({command})"));
            }
        }
        if missing.is_empty() {
            result.message = format!("{} tool binaries resolve", self.tools.len());
            result
        } else {
            result.status = crate::HealthStatus::Degraded;
            result.message = format!("missing binaries: {}", missing.join(", "));
            result
        }
    }
}

/// Supplies current breaker states without coupling health to the registry.
pub type BreakerStateSource =
    Arc<dyn Fn() -> Vec<(String, BreakerState)> + Send + Sync + 'static>;

/// Informational check mapping breaker states onto health statuses.
///
/// HALF_OPEN means a tool is being probed (degraded); OPEN means it is
/// currently rejecting every call (unhealthy). Neither changes the process
/// aggregate, by design of the priority tiers.
pub struct BreakerStateCheck {
    source: BreakerStateSource,
}

impl BreakerStateCheck {
    /// Create the check over a state source.
    pub fn new(source: BreakerStateSource) -> Self {
        Self { source }
    }
}

#[async_trait]
impl HealthCheck for BreakerStateCheck {
    fn name(&self) -> &str {
        "circuit_breakers"
    }

    fn priority(&self) -> CheckPriority {
        CheckPriority::Informational
    }

    async fn check(&self) -> CheckResult {
        let states = (self.source)();
        let mut worst = crate::HealthStatus::Healthy;
        let mut notes = Vec::new();
        let mut result = CheckResult::healthy("");
        for (tool, state) in &states {
            result = result.with_detail(tool.clone(), json!(state.to_string()));
            match state {
                BreakerState::Closed => {}
                BreakerState::HalfOpen => {
                    worst = worst.worst(crate::HealthStatus::Degraded);
                    notes.push(format!("{tool} HALF_OPEN"));
                }
                BreakerState::Open => {
                    worst = worst.worst(crate::HealthStatus::Unhealthy);
                    notes.push(format!("{tool} OPEN"));
                }
            }
        }
        result.status = worst;
        result.message = if notes.is_empty() {
            format!("{} breakers closed", states.len())
        } else {
            notes.join(", ")
        };
        result
    }
}
