//! Fast port sweep (masscan).

use serde_json::json;
use warden_config::Config;

use crate::args::{self, clamp_numeric_flag, parse_port_spec};
use crate::base::ExecutableTool;
use crate::errors::ToolError;
use crate::spec::{ToolInfo, ToolSpec};
use crate::target::{self, ParsedTarget};

/// Addresses a sweep may cover by default (a /16).
const DEFAULT_MAX_NETWORK_HOSTS: u64 = 65_536;

/// Large-network mode multiplies the ceiling by this factor.
const LARGE_NETWORK_FACTOR: u64 = 4;

/// Hard floor and ceiling on the packet rate.
const MIN_RATE: u32 = 100;
const MAX_RATE: u32 = 100_000;
const DEFAULT_RATE: u32 = 1000;

const DEFAULT_PORTS: &str = "21,22,23,25,80,110,143,443,445,3306,3389,8080";
const INTRUSIVE_PORTS: &str = "1-1024,1433,1521,3306,3389,5432,5900,6379,8000-8100,8443,9200,27017";

/// Fast TCP port sweep across a private network.
pub struct PortSweep {
    spec: ToolSpec,
    max_network_hosts: u64,
    max_rate: u32,
    default_ports: &'static str,
}

impl PortSweep {
    /// Registry name.
    pub const NAME: &'static str = "PortSweep";

    /// Build the descriptor from a configuration snapshot.
    pub fn new(config: &Config) -> Self {
        let mut spec = ToolSpec::from_config(Self::NAME, "masscan", config);
        spec.description = "Fast TCP port sweep over RFC1918 networks".to_string();
        spec.allowed_flags = ["-p", "--ports", "--rate", "--wait", "--retries", "--exclude"]
            .map(String::from)
            .to_vec();
        if spec.intrusive {
            // Banner grabbing completes connections instead of stealth
            // probing them.
            spec.allowed_flags.push("--banners".to_string());
        }
        spec.flags_requiring_value = ["-p", "--ports", "--rate", "--wait", "--retries", "--exclude"]
            .map(String::from)
            .to_vec();
        // Sweeps are cheap but noisy; keep a short leash by default.
        spec.default_timeout_sec = spec.default_timeout_sec.min(300.0);

        let max_network_hosts = if spec.intrusive {
            DEFAULT_MAX_NETWORK_HOSTS * LARGE_NETWORK_FACTOR
        } else {
            DEFAULT_MAX_NETWORK_HOSTS
        };
        Self {
            spec,
            max_network_hosts,
            max_rate: MAX_RATE.min(config.security.max_scan_rate),
            default_ports: if config.security.allow_intrusive {
                INTRUSIVE_PORTS
            } else {
                DEFAULT_PORTS
            },
        }
    }
}

impl ExecutableTool for PortSweep {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    /// Sweeps take addresses and networks only; hostnames would force a
    /// resolver dependency the scanner itself does not have.
    fn validate_target(&self, raw: &str) -> Result<ParsedTarget, ToolError> {
        let parsed = target::parse_host_target(raw)?;
        match &parsed {
            ParsedTarget::Hostname(_) | ParsedTarget::Url(_) => {
                return Err(ToolError::TargetNotAllowed {
                    target: raw.to_string(),
                    reason: "sweeps take an IPv4 address or CIDR network".to_string(),
                })
            }
            _ => {}
        }
        if parsed.host_count() > self.max_network_hosts {
            return Err(ToolError::TargetNotAllowed {
                target: raw.to_string(),
                reason: format!(
                    "network too large: {} addresses (max {})",
                    parsed.host_count(),
                    self.max_network_hosts
                ),
            });
        }
        Ok(parsed)
    }

    fn validate_tokens(
        &self,
        mut tokens: Vec<String>,
        _target: &ParsedTarget,
    ) -> Result<Vec<String>, ToolError> {
        for ports_flag in ["-p", "--ports"] {
            if let Some(ports) = args::flag_value(&tokens, ports_flag) {
                parse_port_spec(ports)
                    .map_err(|reason| ToolError::InvalidArguments { reason })?;
            }
        }
        if let Some(rate) = args::flag_value(&tokens, "--rate") {
            let clamped =
                clamp_numeric_flag(rate, "--rate", u64::from(MIN_RATE), u64::from(self.max_rate))?;
            args::set_flag_value(&mut tokens, "--rate", &clamped.to_string());
        }
        if let Some(wait) = args::flag_value(&tokens, "--wait") {
            let clamped = clamp_numeric_flag(wait, "--wait", 0, 30)?;
            args::set_flag_value(&mut tokens, "--wait", &clamped.to_string());
        }
        if let Some(retries) = args::flag_value(&tokens, "--retries") {
            let clamped = clamp_numeric_flag(retries, "--retries", 0, 5)?;
            args::set_flag_value(&mut tokens, "--retries", &clamped.to_string());
        }
        if let Some(exclusions) = args::flag_value(&tokens, "--exclude") {
            // Exclusions stay inside the same authorized space; a public
            // exclusion is a typo worth failing loudly on.
            for exclusion in exclusions.split(',') {
                target::parse_host_target(exclusion.trim()).map_err(|_| {
                    ToolError::InvalidArguments {
                        reason: format!(
                            "exclusion '{}' is not a private address or network",
                            exclusion.trim()
                        ),
                    }
                })?;
            }
        }
        Ok(tokens)
    }

    fn shape_args(&self, mut tokens: Vec<String>) -> Vec<String> {
        if !args::has_flag(&tokens, "--rate") {
            tokens.push("--rate".to_string());
            tokens.push(DEFAULT_RATE.min(self.max_rate).to_string());
        }
        if !args::has_flag(&tokens, "--wait") {
            tokens.push("--wait".to_string());
            tokens.push("1".to_string());
        }
        if !args::has_flag(&tokens, "--retries") {
            tokens.push("--retries".to_string());
            tokens.push("1".to_string());
        }
        if !args::has_flag(&tokens, "-p") && !args::has_flag(&tokens, "--ports") {
            tokens.push("-p".to_string());
            tokens.push(self.default_ports.to_string());
        }
        tokens
    }

    fn tool_info(&self) -> ToolInfo {
        ToolInfo::from_spec(&self.spec)
            .with_limit("max_network_hosts", json!(self.max_network_hosts))
            .with_limit("min_rate", json!(MIN_RATE))
            .with_limit("max_rate", json!(self.max_rate))
            .with_limit("default_rate", json!(DEFAULT_RATE.min(self.max_rate)))
    }
}
