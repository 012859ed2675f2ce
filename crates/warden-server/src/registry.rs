//! Process-wide tool registry.
//!
//! The registry owns every per-tool singleton: the executor (tool + lazy
//! semaphore), the circuit breaker, and the metrics wrapper, all built from
//! one configuration snapshot. The tool map is immutable after
//! construction; only the per-tool enabled bit flips at runtime.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use warden_breaker::{BreakerState, CircuitBreaker};
use warden_config::Config;
use warden_metrics::MetricsRegistry;
use warden_tools::tools::{CredTest, InjectionTest, PortSweep, ServiceScan, WebEnum};
use warden_tools::{ExecutableTool, ToolExecutor, ToolInfo};
use warden_types::{ToolInput, ToolOutput};

struct RegisteredTool {
    executor: ToolExecutor,
    enabled: AtomicBool,
}

/// Result of routing one invocation.
#[derive(Debug)]
pub enum ExecuteOutcome {
    /// No tool registered under that name.
    UnknownTool,
    /// The tool exists but its enabled bit is off.
    Disabled,
    /// The tool ran the pipeline and produced a structured result.
    Completed(Box<ToolOutput>),
}

/// One row of the discovery listing.
#[derive(Debug, Clone, Serialize)]
pub struct ToolListing {
    /// Registry name.
    pub name: String,
    /// Whether the router will currently dispatch to it.
    pub enabled: bool,
    /// External binary.
    pub command: String,
    /// One-line description.
    pub description: String,
    /// Simultaneous-subprocess bound.
    pub concurrency: usize,
    /// Default/maximum timeout in seconds.
    pub timeout: f64,
    /// Whether executions are recorded in metrics.
    pub has_metrics: bool,
    /// Always true: every tool runs behind a breaker.
    pub has_circuit_breaker: bool,
    /// Effective per-tool limits.
    pub info: ToolInfo,
}

/// Owner of tools, breakers, and metric wrappers.
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
    metrics: Arc<MetricsRegistry>,
    config: Arc<Config>,
}

impl ToolRegistry {
    /// Build every enabled builtin tool from a configuration snapshot.
    pub fn from_config(config: Arc<Config>) -> anyhow::Result<Self> {
        let metrics = Arc::new(MetricsRegistry::new()?);
        let mut tools = BTreeMap::new();

        for tool in builtin_tools(&config) {
            let name = tool.spec().name.clone();
            if !selected(&name, &config) {
                info!(tool = %name, "tool filtered out by include/exclude");
                continue;
            }
            let breaker = CircuitBreaker::new(name.clone(), tool.spec().breaker.clone());
            let tool_metrics = config.metrics.enabled.then(|| metrics.for_tool(name.clone()));
            let executor = ToolExecutor::new(tool, breaker, tool_metrics);
            info!(tool = %name, "registered tool");
            tools.insert(
                name,
                RegisteredTool {
                    executor,
                    enabled: AtomicBool::new(true),
                },
            );
        }

        Ok(Self {
            tools,
            metrics,
            config,
        })
    }

    /// The configuration snapshot the registry was built from.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// The process-wide metrics registry.
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Route one invocation to its tool.
    pub async fn execute(&self, name: &str, input: ToolInput) -> ExecuteOutcome {
        let Some(registered) = self.tools.get(name) else {
            return ExecuteOutcome::UnknownTool;
        };
        if !registered.enabled.load(Ordering::Acquire) {
            return ExecuteOutcome::Disabled;
        }
        ExecuteOutcome::Completed(Box::new(registered.executor.run(input).await))
    }

    /// Discovery listing for both transports.
    pub fn list(&self) -> Vec<ToolListing> {
        self.tools
            .iter()
            .map(|(name, registered)| {
                let spec = registered.executor.tool().spec();
                ToolListing {
                    name: name.clone(),
                    enabled: registered.enabled.load(Ordering::Acquire),
                    command: spec.command.clone(),
                    description: spec.description.clone(),
                    concurrency: spec.concurrency,
                    timeout: spec.default_timeout_sec,
                    has_metrics: self.config.metrics.enabled,
                    has_circuit_breaker: true,
                    info: registered.executor.tool().tool_info(),
                }
            })
            .collect()
    }

    /// Flip a tool's enabled bit. Returns false for unknown names.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.tools.get(name) {
            Some(registered) => {
                registered.enabled.store(enabled, Ordering::Release);
                info!(tool = %name, enabled, "tool state changed");
                true
            }
            None => false,
        }
    }

    /// Current breaker state per tool, for health checks and SSE events.
    pub fn breaker_states(&self) -> Vec<(String, BreakerState)> {
        self.tools
            .iter()
            .map(|(name, registered)| (name.clone(), registered.executor.breaker().state()))
            .collect()
    }

    /// `(tool, command)` pairs for the availability health check.
    pub fn tool_commands(&self) -> Vec<(String, String)> {
        self.tools
            .iter()
            .map(|(name, registered)| {
                (name.clone(), registered.executor.tool().spec().command.clone())
            })
            .collect()
    }

    /// Log, once at startup, which tool binaries actually resolve.
    ///
    /// Informational only: a missing binary keeps its tool registered and
    /// failing fast with NOT_FOUND until the operator installs it.
    pub fn log_binary_availability(&self) {
        for (name, command) in self.tool_commands() {
            match which::which(&command) {
                Ok(path) => info!(tool = %name, command = %command, path = %path.display(), "tool binary resolved"),
                Err(_) => warn!(tool = %name, command = %command, "tool binary not found on PATH"),
            }
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The compile-time builtin list; discovery happens here, not by scanning.
fn builtin_tools(config: &Config) -> Vec<Arc<dyn ExecutableTool>> {
    vec![
        Arc::new(PortSweep::new(config)),
        Arc::new(ServiceScan::new(config)),
        Arc::new(WebEnum::new(config)),
        Arc::new(CredTest::new(config)),
        Arc::new(InjectionTest::new(config)),
    ]
}

fn selected(name: &str, config: &Config) -> bool {
    let include = &config.tool.include;
    let exclude = &config.tool.exclude;
    if !include.is_empty() && !include.iter().any(|n| n == name) {
        return false;
    }
    !exclude.iter().any(|n| n == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::ErrorKind;

    fn registry_with(config: Config) -> ToolRegistry {
        ToolRegistry::from_config(Arc::new(config)).expect("registry")
    }

    #[tokio::test]
    async fn registers_all_builtins_by_default() {
        let registry = registry_with(Config::default());
        let names: Vec<String> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec!["CredTest", "InjectionTest", "PortSweep", "ServiceScan", "WebEnum"]
        );
    }

    #[tokio::test]
    async fn include_exclude_filters_apply() {
        let mut config = Config::default();
        config.tool.include = vec!["PortSweep".to_string(), "WebEnum".to_string()];
        config.tool.exclude = vec!["WebEnum".to_string()];
        let registry = registry_with(config);
        let names: Vec<String> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["PortSweep"]);
    }

    #[tokio::test]
    async fn unknown_tool_and_disabled_tool_are_distinguished() {
        let registry = registry_with(Config::default());
        assert!(matches!(
            registry.execute("NoSuchTool", ToolInput::new("10.0.0.1")).await,
            ExecuteOutcome::UnknownTool
        ));

        assert!(registry.set_enabled("PortSweep", false));
        assert!(matches!(
            registry.execute("PortSweep", ToolInput::new("10.0.0.1")).await,
            ExecuteOutcome::Disabled
        ));
        assert!(registry.set_enabled("PortSweep", true));
        assert!(!registry.set_enabled("NoSuchTool", true));
    }

    #[tokio::test]
    async fn execution_routes_through_the_pipeline() {
        let registry = registry_with(Config::default());
        // Public target: the pipeline rejects it before spawning anything,
        // which keeps this test independent of installed scanners.
        let outcome = registry
            .execute("PortSweep", ToolInput::new("8.8.8.8"))
            .await;
        match outcome {
            ExecuteOutcome::Completed(output) => {
                assert_eq!(output.error_type, Some(ErrorKind::Validation));
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn listing_carries_policy_introspection() {
        let registry = registry_with(Config::default());
        let listing = registry.list();
        let sweep = listing.iter().find(|t| t.name == "PortSweep").expect("PortSweep");
        assert_eq!(sweep.command, "masscan");
        assert!(sweep.has_circuit_breaker);
        assert!(sweep.info.limits.contains_key("max_rate"));
    }
}
