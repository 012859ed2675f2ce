//! Credential testing (hydra).

use std::io::BufRead;
use std::net::Ipv4Addr;
use std::path::Path;

use serde_json::json;
use warden_config::Config;

use crate::args::{self, clamp_numeric_flag};
use crate::base::ExecutableTool;
use crate::errors::ToolError;
use crate::spec::{ToolInfo, ToolSpec};
use crate::target::{self, ParsedTarget};

/// Services the tester may speak.
const SERVICE_ALLOWLIST: &[&str] = &[
    "ssh", "ftp", "telnet", "smtp", "pop3", "imap", "mysql", "postgres", "vnc", "rdp", "smb",
    "http-get", "http-head", "https-get",
];

/// Flags of which at least one must be present.
const AUTH_FLAGS: &[&str] = &["-l", "-L", "-p", "-P"];

const MAX_THREADS: u64 = 16;
const DEFAULT_THREADS: u64 = 4;
const MAX_WAIT_SEC: u64 = 5;
const MAX_LIST_LINES: u64 = 10_000;

/// Credential testing against enumerated services on lab hosts.
pub struct CredTest {
    spec: ToolSpec,
}

impl CredTest {
    /// Registry name.
    pub const NAME: &'static str = "CredTest";

    /// Build the descriptor from a configuration snapshot.
    pub fn new(config: &Config) -> Self {
        let mut spec = ToolSpec::from_config(Self::NAME, "hydra", config);
        spec.description = "Credential testing against allowlisted services".to_string();
        spec.allowed_flags = ["-l", "-L", "-p", "-P", "-t", "-w", "-s", "-f", "-u", "-e"]
            .map(String::from)
            .to_vec();
        spec.flags_requiring_value = ["-l", "-L", "-p", "-P", "-t", "-w", "-s", "-e"]
            .map(String::from)
            .to_vec();
        // Password sprays run one at a time; parallel sprays trip lockouts.
        spec.concurrency = spec.concurrency.min(1);
        Self { spec }
    }

    /// Split `host:service`, `host:port:service`, or `service://host[:port]`.
    fn split_target(raw: &str) -> Result<(String, Option<u16>, String), ToolError> {
        let invalid = |reason: String| ToolError::TargetNotAllowed {
            target: raw.to_string(),
            reason,
        };
        if let Some((service, rest)) = raw.split_once("://") {
            let (host, port) = match rest.split_once(':') {
                Some((host, port_text)) => {
                    let port = port_text
                        .parse::<u16>()
                        .map_err(|_| invalid(format!("'{port_text}' is not a port")))?;
                    (host, Some(port))
                }
                None => (rest, None),
            };
            if host.is_empty() {
                return Err(invalid("missing host".to_string()));
            }
            return Ok((host.to_string(), port, service.to_string()));
        }
        let pieces: Vec<&str> = raw.split(':').collect();
        match pieces.as_slice() {
            [host, service] => Ok(((*host).to_string(), None, (*service).to_string())),
            [host, port_text, service] => {
                let port = port_text
                    .parse::<u16>()
                    .map_err(|_| invalid(format!("'{port_text}' is not a port")))?;
                Ok(((*host).to_string(), Some(port), (*service).to_string()))
            }
            _ => Err(invalid(
                "expected host:service, host:port:service, or service://host[:port]".to_string(),
            )),
        }
    }

    fn validate_list(&self, path_text: &str, flag: &str) -> Result<(), ToolError> {
        let invalid = |reason: String| ToolError::InvalidArguments { reason };
        if path_text.contains("..") {
            return Err(invalid(format!("{flag} path must not contain '..'")));
        }
        let path = Path::new(path_text);
        let file = std::fs::File::open(path)
            .map_err(|e| invalid(format!("{flag} list '{path_text}' unreadable: {e}")))?;
        let mut lines: u64 = 0;
        for line in std::io::BufReader::new(file).lines() {
            line.map_err(|e| invalid(format!("{flag} list '{path_text}' unreadable: {e}")))?;
            lines += 1;
            if lines > MAX_LIST_LINES {
                return Err(invalid(format!(
                    "{flag} list '{path_text}' has more than {MAX_LIST_LINES} lines"
                )));
            }
        }
        Ok(())
    }
}

impl ExecutableTool for CredTest {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn validate_target(&self, raw: &str) -> Result<ParsedTarget, ToolError> {
        let (host, port, service) = Self::split_target(raw)?;
        if port == Some(0) {
            return Err(ToolError::TargetNotAllowed {
                target: raw.to_string(),
                reason: "port zero is not connectable".to_string(),
            });
        }
        if !SERVICE_ALLOWLIST.contains(&service.as_str()) {
            return Err(ToolError::TargetNotAllowed {
                target: raw.to_string(),
                reason: format!("service '{service}' is not in the allowlist"),
            });
        }
        if let Ok(addr) = host.parse::<Ipv4Addr>() {
            if target::is_private_address(addr) {
                return Ok(ParsedTarget::Address(addr));
            }
            return Err(ToolError::TargetNotAllowed {
                target: raw.to_string(),
                reason: "host is not RFC1918 or loopback".to_string(),
            });
        }
        if target::is_lab_hostname(&host) {
            return Ok(ParsedTarget::Hostname(host));
        }
        Err(ToolError::TargetNotAllowed {
            target: raw.to_string(),
            reason: format!(
                "host must be RFC1918 or end in {}",
                target::LAB_DOMAIN_SUFFIX
            ),
        })
    }

    fn validate_tokens(
        &self,
        mut tokens: Vec<String>,
        _target: &ParsedTarget,
    ) -> Result<Vec<String>, ToolError> {
        if !AUTH_FLAGS.iter().any(|flag| args::has_flag(&tokens, flag)) {
            return Err(ToolError::InvalidArguments {
                reason: "at least one of -l/-L/-p/-P is required".to_string(),
            });
        }
        if let Some(threads) = args::flag_value(&tokens, "-t") {
            let clamped = clamp_numeric_flag(threads, "-t", 1, MAX_THREADS)?;
            args::set_flag_value(&mut tokens, "-t", &clamped.to_string());
        }
        if let Some(wait) = args::flag_value(&tokens, "-w") {
            let clamped = clamp_numeric_flag(wait, "-w", 1, MAX_WAIT_SEC)?;
            args::set_flag_value(&mut tokens, "-w", &clamped.to_string());
        }
        for list_flag in ["-P", "-L"] {
            if let Some(path) = args::flag_value(&tokens, list_flag) {
                self.validate_list(path, list_flag)?;
            }
        }
        if let Some(port) = args::flag_value(&tokens, "-s") {
            let parsed: u32 = port.parse().map_err(|_| ToolError::InvalidArguments {
                reason: format!("'-s {port}' is not a port"),
            })?;
            if parsed == 0 || parsed > 65535 {
                return Err(ToolError::InvalidArguments {
                    reason: format!("'-s {port}' is out of range"),
                });
            }
        }
        if let Some(modes) = args::flag_value(&tokens, "-e") {
            // hydra's extra checks: n (null), s (same-as-login), r (reversed).
            if modes.is_empty() || !modes.chars().all(|c| matches!(c, 'n' | 's' | 'r')) {
                return Err(ToolError::InvalidArguments {
                    reason: format!("'-e {modes}' must use letters from nsr"),
                });
            }
        }
        Ok(tokens)
    }

    fn shape_args(&self, mut tokens: Vec<String>) -> Vec<String> {
        if !args::has_flag(&tokens, "-t") {
            tokens.push("-t".to_string());
            tokens.push(DEFAULT_THREADS.to_string());
        }
        tokens
    }

    fn tool_info(&self) -> ToolInfo {
        ToolInfo::from_spec(&self.spec)
            .with_limit("services", json!(SERVICE_ALLOWLIST))
            .with_limit("max_threads", json!(MAX_THREADS))
            .with_limit("max_wait_sec", json!(MAX_WAIT_SEC))
            .with_limit("max_list_lines", json!(MAX_LIST_LINES))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tool() -> CredTest {
        CredTest::new(&Config::default())
    }

    fn validate(tool: &CredTest, target: &str, extra: &str) -> Result<Vec<String>, ToolError> {
        let parsed = tool.validate_target(target)?;
        let tokens = crate::args::sanitize_extra_args(extra, tool.spec())?;
        tool.validate_tokens(tokens, &parsed)
    }

    #[test]
    fn accepts_the_three_target_shapes() {
        assert!(tool().validate_target("192.168.1.5:ssh").is_ok());
        assert!(tool().validate_target("192.168.1.5:2222:ssh").is_ok());
        assert!(tool().validate_target("ssh://192.168.1.5").is_ok());
        assert!(tool().validate_target("ssh://git.lab.internal:2222").is_ok());
    }

    #[test]
    fn rejects_public_hosts_and_unknown_services() {
        assert!(tool().validate_target("8.8.8.8:ssh").is_err());
        assert!(tool().validate_target("192.168.1.5:gopher").is_err());
        assert!(tool().validate_target("example.com:ssh").is_err());
        assert!(tool().validate_target("192.168.1.5").is_err());
    }

    #[test]
    fn requires_an_authentication_flag() {
        let err = validate(&tool(), "192.168.1.5:ssh", "-t 4").unwrap_err();
        assert!(err.to_string().contains("-l/-L/-p/-P"));
        assert!(validate(&tool(), "192.168.1.5:ssh", "-l root -p toor").is_ok());
    }

    #[test]
    fn threads_and_wait_are_clamped() {
        let tokens = validate(&tool(), "192.168.1.5:ssh", "-l root -p x -t 64 -w 30")
            .expect("validate");
        assert_eq!(args::flag_value(&tokens, "-t"), Some("16"));
        assert_eq!(args::flag_value(&tokens, "-w"), Some("5"));
    }

    #[test]
    fn port_override_and_extra_check_modes_are_validated() {
        assert!(validate(&tool(), "192.168.1.5:ssh", "-l root -p x -s 2222").is_ok());
        assert!(validate(&tool(), "192.168.1.5:ssh", "-l root -p x -s 0").is_err());
        assert!(validate(&tool(), "192.168.1.5:ssh", "-l root -p x -s 99999").is_err());
        assert!(validate(&tool(), "192.168.1.5:ssh", "-l root -P /dev/null -e nsr").is_ok());
        assert!(validate(&tool(), "192.168.1.5:ssh", "-l root -p x -e xyz").is_err());
    }

    #[test]
    fn password_lists_are_bounded() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        for i in 0..100 {
            writeln!(file, "password{i}").expect("write");
        }
        let path = file.path().to_str().expect("utf8 path").to_string();
        assert!(validate(&tool(), "192.168.1.5:ssh", &format!("-l root -P {path}")).is_ok());
        assert!(validate(&tool(), "192.168.1.5:ssh", "-l root -P /nonexistent/rockyou.txt").is_err());
        assert!(validate(&tool(), "192.168.1.5:ssh", "-l root -P ../../etc/shadow").is_err());
    }

    #[test]
    fn optimizer_adds_thread_default_only_when_absent() {
        let tool = tool();
        let shaped = tool.shape_args(vec!["-l".into(), "root".into(), "-p".into(), "x".into()]);
        assert_eq!(args::flag_value(&shaped, "-t"), Some("4"));
        let shaped = tool.shape_args(vec!["-t".into(), "8".into()]);
        assert_eq!(args::flag_value(&shaped, "-t"), Some("8"));
        assert!(crate::args::check_flag_policy(&shaped, tool.spec()).is_ok());
    }

    #[test]
    fn spray_concurrency_is_pinned_to_one() {
        assert_eq!(tool().spec().concurrency, 1);
    }
}
