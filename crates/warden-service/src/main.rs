//! **warden** – Tool-orchestration server for lab network/security utilities.
//!
//! The binary wires the pieces together: configuration snapshot, tool
//! registry, health monitor, and the selected transport. It owns signal
//! handling and the shutdown grace window.
//!
//! Exit codes: 0 on normal shutdown, 1 when startup validation fails,
//! 2 on an unrecoverable runtime error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use warden_config::{Config, ConfigService, Transport};
use warden_health::{
    BreakerStateCheck, HealthMonitor, LivenessCheck, MonitorSettings, ResourceThresholds,
    SystemResourcesCheck, ToolAvailabilityCheck, WorkspaceCheck,
};
use warden_server::{http, stdio, ServerState, ToolRegistry};

//─────────────────────────────
//  CLI structure
//─────────────────────────────

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Bounded tool-orchestration server for lab network/security utilities")]
#[command(version)]
struct Cli {
    /// Transport to serve: stdio or http (overrides config and environment)
    #[arg(long)]
    transport: Option<String>,

    /// Force debug-level logging
    #[arg(long)]
    debug: bool,

    /// Configuration file path
    #[arg(long, default_value = "warden.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (service, config) = match startup(&cli) {
        Ok(built) => built,
        Err(err) => {
            // Tracing may not be initialized yet on this path.
            eprintln!("warden: startup failed: {err:#}");
            return ExitCode::from(1);
        }
    };

    match run(service, config).await {
        Ok(()) => {
            info!("shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "unrecoverable runtime error");
            ExitCode::from(2)
        }
    }
}

//─────────────────────────────
//  Startup
//─────────────────────────────

/// Load configuration, apply CLI overrides, and initialize tracing.
fn startup(cli: &Cli) -> Result<(ConfigService, Arc<Config>)> {
    let service =
        ConfigService::load(Some(cli.config.clone())).context("loading configuration")?;

    let mut config = (*service.current()).clone();
    if let Some(raw) = &cli.transport {
        config.server.transport = raw
            .parse::<Transport>()
            .map_err(|reason| anyhow::anyhow!(reason))
            .context("parsing --transport")?;
    }
    if cli.debug {
        config.logging.level = "debug".to_string();
    }

    init_tracing(&config)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = %config.server.transport,
        config_file = %cli.config.display(),
        "warden starting"
    );
    service.log_summary();

    Ok((service, Arc::new(config)))
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.logging.format.eq_ignore_ascii_case("json") {
        // The stdio transport owns stdout; logs must stay on stderr.
        builder.json().with_writer(std::io::stderr).try_init()
    } else {
        builder.with_writer(std::io::stderr).try_init()
    };
    result.map_err(|e| anyhow::anyhow!("initializing tracing: {e}"))
}

//─────────────────────────────
//  Runtime
//─────────────────────────────

async fn run(service: ConfigService, config: Arc<Config>) -> Result<()> {
    let registry = Arc::new(ToolRegistry::from_config(config.clone()).context("building registry")?);
    registry.log_binary_availability();

    let (registry_tx, registry_rx) = tokio::sync::watch::channel(registry);
    let health = Arc::new(build_health_monitor(&config, registry_rx.clone()));
    tokio::spawn(Arc::clone(&health).run());

    let state = ServerState::from_parts(registry_rx, Arc::clone(&health));
    spawn_reload_listener(service, registry_tx);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let shutdown = {
        let mut rx = shutdown_rx.clone();
        async move {
            let _ = rx.wait_for(|stop| *stop).await;
        }
    };

    let mut serve_task = match config.server.transport {
        Transport::Http => {
            let addr = format!("{}:{}", config.server.host, config.server.port)
                .parse()
                .context("parsing listen address")?;
            tokio::spawn(http::serve(state, addr, shutdown))
        }
        Transport::Stdio => tokio::spawn(stdio::serve(state, shutdown)),
    };

    tokio::select! {
        result = &mut serve_task => {
            // Transport finished on its own (e.g. stdin closed).
            return result.context("transport task")?;
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs_f64(config.server.shutdown_grace_sec);
    match tokio::time::timeout(grace, serve_task).await {
        Ok(result) => result.context("transport task")?,
        Err(_) => {
            warn!(grace_sec = grace.as_secs_f64(), "shutdown grace elapsed, aborting in-flight work");
            Ok(())
        }
    }
}

fn build_health_monitor(
    config: &Config,
    registry: tokio::sync::watch::Receiver<Arc<ToolRegistry>>,
) -> HealthMonitor {
    let mut monitor = HealthMonitor::new(MonitorSettings {
        check_interval: Duration::from_secs_f64(config.health.check_interval_sec),
        check_timeout: Duration::from_secs_f64(config.health.check_timeout_sec),
    });
    monitor.register(Arc::new(LivenessCheck::default()));
    monitor.register(Arc::new(SystemResourcesCheck::new(ResourceThresholds {
        cpu_percent: config.health.cpu_threshold,
        memory_percent: config.health.memory_threshold,
        disk_percent: config.health.disk_threshold,
    })));
    monitor.register(Arc::new(WorkspaceCheck));
    monitor.register(Arc::new(ToolAvailabilityCheck::new(
        registry.borrow().tool_commands(),
    )));
    monitor.register(Arc::new(BreakerStateCheck::new(Arc::new(move || {
        registry.borrow().breaker_states()
    }))));
    monitor
}

/// Rebuild the registry from freshly-loaded configuration on SIGHUP.
///
/// A failed reload keeps the previous snapshot and registry; in-flight
/// executions on the old registry finish untouched.
fn spawn_reload_listener(
    service: ConfigService,
    registry_tx: tokio::sync::watch::Sender<Arc<ToolRegistry>>,
) {
    #[cfg(unix)]
    tokio::spawn(async move {
        let mut sighup =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                Ok(signal) => signal,
                Err(err) => {
                    warn!(error = %err, "failed to listen for SIGHUP, reload disabled");
                    return;
                }
            };
        while sighup.recv().await.is_some() {
            match service.reload() {
                Ok(config) => match ToolRegistry::from_config(config) {
                    Ok(registry) => {
                        service.log_summary();
                        let _ = registry_tx.send(Arc::new(registry));
                        info!("registry rebuilt from reloaded configuration");
                    }
                    Err(err) => {
                        warn!(error = %format!("{err:#}"), "registry rebuild failed, keeping previous tools");
                    }
                },
                Err(err) => {
                    warn!(error = %err, "configuration reload failed, keeping previous snapshot");
                }
            }
        }
    });

    #[cfg(not(unix))]
    {
        let _ = (service, registry_tx);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}
