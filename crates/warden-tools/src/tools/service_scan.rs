//! Service and version detection (nmap).

use serde_json::json;
use warden_config::Config;

use crate::args::{self, clamp_numeric_flag, parse_port_spec};
use crate::base::ExecutableTool;
use crate::errors::ToolError;
use crate::spec::{ToolInfo, ToolSpec};
use crate::target::{self, ParsedTarget};

/// Addresses one detection scan may cover.
const MAX_NETWORK_HOSTS: u64 = 1024;

/// Script categories that are always allowed.
const SCRIPT_CATEGORIES: &[&str] = &["safe", "default", "discovery", "version"];

/// Individual scripts that are always allowed, `*` suffix meaning prefix
/// match.
const SCRIPT_ALLOWLIST: &[&str] = &[
    "banner",
    "ssh-hostkey",
    "ssl-cert",
    "http-title",
    "http-headers",
    "http-*",
    "ssl-*",
];

/// Categories additionally allowed in intrusive mode.
const INTRUSIVE_CATEGORIES: &[&str] = &["vuln", "auth", "brute"];

const DEFAULT_TOP_PORTS: u64 = 1000;
const MAX_TOP_PORTS: u64 = 5000;

/// Service/version detection scan against a small private scope.
pub struct ServiceScan {
    spec: ToolSpec,
}

impl ServiceScan {
    /// Registry name.
    pub const NAME: &'static str = "ServiceScan";

    /// Build the descriptor from a configuration snapshot.
    pub fn new(config: &Config) -> Self {
        let mut spec = ToolSpec::from_config(Self::NAME, "nmap", config);
        spec.description = "Service and version detection on private hosts".to_string();
        spec.allowed_flags = ["-sV", "-sC", "-sT", "-p", "--top-ports", "--script", "-T", "-Pn", "-n"]
            .map(String::from)
            .to_vec();
        if spec.intrusive {
            // OS detection and the aggressive preset stay behind the
            // intrusive bit; both probe far harder than version detection.
            spec.allowed_flags.push("-O".to_string());
            spec.allowed_flags.push("-A".to_string());
        }
        spec.allowed_flags.push("--version-intensity".to_string());
        spec.flags_requiring_value = ["-p", "--top-ports", "--script", "--version-intensity"]
            .map(String::from)
            .to_vec();
        // Version probing on slow services takes a while; one scan at a time
        // per scope keeps the noise floor predictable.
        spec.default_timeout_sec = spec.default_timeout_sec.min(600.0);
        Self { spec }
    }

    fn script_allowed(&self, script: &str) -> bool {
        if SCRIPT_CATEGORIES.contains(&script) {
            return true;
        }
        if self.spec.intrusive && INTRUSIVE_CATEGORIES.contains(&script) {
            return true;
        }
        SCRIPT_ALLOWLIST.iter().any(|entry| match entry.strip_suffix('*') {
            Some(prefix) => script.starts_with(prefix),
            None => script == *entry,
        })
    }
}

impl ExecutableTool for ServiceScan {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn validate_target(&self, raw: &str) -> Result<ParsedTarget, ToolError> {
        let parsed = target::parse_host_target(raw)?;
        if let ParsedTarget::Url(_) = parsed {
            return Err(ToolError::TargetNotAllowed {
                target: raw.to_string(),
                reason: "detection scans take a host or network, not a URL".to_string(),
            });
        }
        if parsed.host_count() > MAX_NETWORK_HOSTS {
            return Err(ToolError::TargetNotAllowed {
                target: raw.to_string(),
                reason: format!(
                    "network too large: {} addresses (max {MAX_NETWORK_HOSTS})",
                    parsed.host_count()
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
        if let Some(ports) = args::flag_value(&tokens, "-p") {
            parse_port_spec(ports).map_err(|reason| ToolError::InvalidArguments { reason })?;
        }
        if let Some(top) = args::flag_value(&tokens, "--top-ports") {
            let clamped = clamp_numeric_flag(top, "--top-ports", 1, MAX_TOP_PORTS)?;
            args::set_flag_value(&mut tokens, "--top-ports", &clamped.to_string());
        }
        if let Some(intensity) = args::flag_value(&tokens, "--version-intensity") {
            let clamped = clamp_numeric_flag(intensity, "--version-intensity", 0, 9)?;
            args::set_flag_value(&mut tokens, "--version-intensity", &clamped.to_string());
        }
        if let Some(scripts) = args::flag_value(&tokens, "--script") {
            for script in scripts.split(',') {
                let script = script.trim();
                if script.is_empty() || !self.script_allowed(script) {
                    return Err(ToolError::InvalidArguments {
                        reason: format!(
                            "script '{script}' is not in the allowed categories or allowlist"
                        ),
                    });
                }
            }
        }
        for token in &tokens {
            if let Some(level) = token.strip_prefix("-T") {
                if !matches!(level, "0" | "1" | "2" | "3" | "4") {
                    return Err(ToolError::InvalidArguments {
                        reason: format!("timing template '{token}' not allowed (use -T0..-T4)"),
                    });
                }
            }
        }
        Ok(tokens)
    }

    fn shape_args(&self, mut tokens: Vec<String>) -> Vec<String> {
        if !args::has_flag(&tokens, "-T") {
            tokens.push("-T3".to_string());
        }
        if !args::has_flag(&tokens, "-p") && !args::has_flag(&tokens, "--top-ports") {
            tokens.push("--top-ports".to_string());
            tokens.push(DEFAULT_TOP_PORTS.to_string());
        }
        tokens
    }

    fn tool_info(&self) -> ToolInfo {
        ToolInfo::from_spec(&self.spec)
            .with_limit("max_network_hosts", json!(MAX_NETWORK_HOSTS))
            .with_limit("script_categories", json!(SCRIPT_CATEGORIES))
            .with_limit(
                "intrusive_categories",
                json!(if self.spec.intrusive { INTRUSIVE_CATEGORIES } else { &[] as &[&str] }),
            )
            .with_limit("max_top_ports", json!(MAX_TOP_PORTS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> ServiceScan {
        ServiceScan::new(&Config::default())
    }

    fn validate(tool: &ServiceScan, target: &str, extra: &str) -> Result<Vec<String>, ToolError> {
        let parsed = tool.validate_target(target)?;
        let tokens = crate::args::sanitize_extra_args(extra, tool.spec())?;
        tool.validate_tokens(tokens, &parsed)
    }

    #[test]
    fn accepts_hosts_small_networks_and_lab_hostnames() {
        assert!(tool().validate_target("192.168.1.1").is_ok());
        assert!(tool().validate_target("10.1.0.0/22").is_ok());
        assert!(tool().validate_target("db.lab.internal").is_ok());
    }

    #[test]
    fn rejects_networks_over_1024_addresses() {
        assert!(tool().validate_target("10.1.0.0/21").is_err());
    }

    #[test]
    fn script_policy_enforces_the_allowlist() {
        assert!(validate(&tool(), "192.168.1.1", "--script safe").is_ok());
        assert!(validate(&tool(), "192.168.1.1", "--script default,version").is_ok());
        assert!(validate(&tool(), "192.168.1.1", "--script http-enum").is_ok()); // http-*
        assert!(validate(&tool(), "192.168.1.1", "--script vuln").is_err());
        assert!(validate(&tool(), "192.168.1.1", "--script exploit").is_err());
    }

    #[test]
    fn intrusive_mode_unlocks_extra_categories() {
        let mut config = Config::default();
        config.security.allow_intrusive = true;
        let tool = ServiceScan::new(&config);
        assert!(validate(&tool, "192.168.1.1", "--script vuln").is_ok());
        // Still not a free-for-all.
        assert!(validate(&tool, "192.168.1.1", "--script exploit").is_err());
    }

    #[test]
    fn os_detection_flags_require_intrusive_mode() {
        assert!(validate(&tool(), "192.168.1.1", "-O").is_err());
        assert!(validate(&tool(), "192.168.1.1", "-A").is_err());

        let mut config = Config::default();
        config.security.allow_intrusive = true;
        let intrusive = ServiceScan::new(&config);
        assert!(validate(&intrusive, "192.168.1.1", "-O").is_ok());
        assert!(validate(&intrusive, "192.168.1.1", "-A").is_ok());
    }

    #[test]
    fn timing_templates_are_bounded() {
        assert!(validate(&tool(), "192.168.1.1", "-T3").is_ok());
        assert!(validate(&tool(), "192.168.1.1", "-T5").is_err());
    }

    #[test]
    fn version_intensity_is_clamped() {
        let tokens =
            validate(&tool(), "192.168.1.1", "-sV --version-intensity 15").expect("validate");
        assert_eq!(args::flag_value(&tokens, "--version-intensity"), Some("9"));
    }

    #[test]
    fn optimizer_adds_conservative_timing_and_top_ports() {
        let tool = tool();
        let shaped = tool.shape_args(vec!["-sV".into()]);
        assert!(shaped.contains(&"-T3".to_string()));
        assert_eq!(args::flag_value(&shaped, "--top-ports"), Some("1000"));

        let shaped = tool.shape_args(vec!["-T4".into(), "-p".into(), "80".into()]);
        assert!(!shaped.contains(&"-T3".to_string()));
        assert!(!shaped.contains(&"--top-ports".to_string()));
    }

    #[test]
    fn shaped_args_survive_revalidation() {
        let tool = tool();
        let shaped = tool.shape_args(vec!["-sV".into()]);
        assert!(crate::args::check_flag_policy(&shaped, tool.spec()).is_ok());
    }
}
