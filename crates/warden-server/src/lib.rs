//! **warden-server** – Registry and transports.
//!
//! The registry owns the tools, their breakers, and the metrics registry;
//! the two transports (HTTP/JSON and newline-delimited JSON-RPC on stdio)
//! expose the same logical operations over it. Configuration reload swaps
//! in a freshly-built registry; transports always read the current one.

use std::sync::Arc;

use tokio::sync::watch;
use warden_health::HealthMonitor;

pub mod http;
pub mod registry;
pub mod stdio;

pub use registry::{ExecuteOutcome, ToolListing, ToolRegistry};

/// Shared state handed to both transports.
#[derive(Clone)]
pub struct ServerState {
    registry: watch::Receiver<Arc<ToolRegistry>>,
    /// The health monitor feeding `/health` and `/events`.
    pub health: Arc<HealthMonitor>,
}

impl ServerState {
    /// Build the state around an initial registry.
    ///
    /// The returned sender publishes replacement registries (configuration
    /// reload); transports pick up the swap on their next request.
    pub fn new(
        registry: Arc<ToolRegistry>,
        health: Arc<HealthMonitor>,
    ) -> (watch::Sender<Arc<ToolRegistry>>, Self) {
        let (sender, receiver) = watch::channel(registry);
        (
            sender,
            Self {
                registry: receiver,
                health,
            },
        )
    }

    /// Build the state from an existing registry channel.
    ///
    /// Used when other components (health checks, the reload listener)
    /// need their own receiver before the state is assembled.
    pub fn from_parts(
        registry: watch::Receiver<Arc<ToolRegistry>>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self { registry, health }
    }

    /// The current registry snapshot.
    pub fn registry(&self) -> Arc<ToolRegistry> {
        self.registry.borrow().clone()
    }
}
