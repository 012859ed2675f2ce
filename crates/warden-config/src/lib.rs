#![forbid(unsafe_code)]

//! **warden-config** – Typed, validated, reloadable configuration for Warden.
//!
//! A snapshot is built from three sources, low-to-high precedence: built-in
//! defaults, a TOML configuration file, and the process environment. The
//! snapshot is immutable and shared as an `Arc`; [`ConfigService::reload`]
//! either publishes a fresh snapshot or leaves the previous one in place.
//!
//! Every numeric field is clamped to a documented safe range; out-of-range
//! values are replaced with the nearest bound and logged, never rejected.

mod error;
mod model;
mod service;

pub use error::ConfigError;
pub use model::{
    CircuitBreakerConfig, Config, HealthConfig, LoggingConfig, MetricsConfig, SecurityConfig,
    ServerConfig, ToolConfig, Transport,
};
pub use service::{build_snapshot, ConfigService};
