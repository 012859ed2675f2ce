//! Web content, DNS, and vhost enumeration (gobuster).

use std::io::BufRead;
use std::path::Path;

use serde_json::json;
use warden_config::Config;

use crate::args::{self, clamp_numeric_flag};
use crate::base::ExecutableTool;
use crate::errors::ToolError;
use crate::spec::{ToolInfo, ToolSpec};
use crate::target::{self, ParsedTarget};

/// Wordlist bounds.
const MAX_WORDLIST_BYTES: u64 = 50 * 1024 * 1024;
const MAX_WORDLIST_LINES: u64 = 1_000_000;

/// Extensions accepted outside intrusive mode.
const SAFE_EXTENSIONS: &[&str] = &["html", "htm", "php", "asp", "aspx", "jsp", "js", "txt", "json", "xml"];

/// Enumeration modes, their thread caps, and their defaults.
const MODES: &[(&str, u64, u64)] = &[("dir", 30, 10), ("dns", 50, 20), ("vhost", 20, 10)];

fn mode_limits(mode: &str) -> Option<(u64, u64)> {
    MODES
        .iter()
        .find(|(name, _, _)| *name == mode)
        .map(|(_, max, default)| (*max, *default))
}

/// Directory, DNS, and virtual-host enumeration against lab scopes.
pub struct WebEnum {
    spec: ToolSpec,
}

impl WebEnum {
    /// Registry name.
    pub const NAME: &'static str = "WebEnum";

    /// Build the descriptor from a configuration snapshot.
    pub fn new(config: &Config) -> Self {
        let mut spec = ToolSpec::from_config(Self::NAME, "gobuster", config);
        spec.description = "Content, DNS, and vhost enumeration in lab scopes".to_string();
        spec.allowed_flags = ["-w", "-t", "-x", "-q"].map(String::from).to_vec();
        spec.flags_requiring_value = ["-w", "-t", "-x"].map(String::from).to_vec();
        spec.extra_allowed_tokens = MODES.iter().map(|(name, _, _)| name.to_string()).collect();
        Self { spec }
    }

    fn mode_of(tokens: &[String]) -> Result<&'static str, ToolError> {
        let mut found = None;
        for token in tokens {
            if let Some((name, _, _)) = MODES.iter().find(|(name, _, _)| name == token) {
                if found.is_some() {
                    return Err(ToolError::InvalidArguments {
                        reason: "more than one enumeration mode given".to_string(),
                    });
                }
                found = Some(*name);
            }
        }
        Ok(found.unwrap_or("dir"))
    }

    fn validate_wordlist(&self, path_text: &str) -> Result<(), ToolError> {
        let invalid = |reason: String| ToolError::InvalidArguments { reason };
        if path_text.contains("..") {
            return Err(invalid("wordlist path must not contain '..'".to_string()));
        }
        let path = Path::new(path_text);
        let metadata = std::fs::metadata(path)
            .map_err(|e| invalid(format!("wordlist '{path_text}' unreadable: {e}")))?;
        if !metadata.is_file() {
            return Err(invalid(format!("wordlist '{path_text}' is not a file")));
        }
        if metadata.len() > MAX_WORDLIST_BYTES {
            return Err(invalid(format!(
                "wordlist '{path_text}' too large: {} bytes (max {MAX_WORDLIST_BYTES})",
                metadata.len()
            )));
        }
        // The byte bound above keeps this scan cheap.
        let file = std::fs::File::open(path)
            .map_err(|e| invalid(format!("wordlist '{path_text}' unreadable: {e}")))?;
        let mut lines: u64 = 0;
        for line in std::io::BufReader::new(file).lines() {
            line.map_err(|e| invalid(format!("wordlist '{path_text}' unreadable: {e}")))?;
            lines += 1;
            if lines > MAX_WORDLIST_LINES {
                return Err(invalid(format!(
                    "wordlist '{path_text}' has more than {MAX_WORDLIST_LINES} lines"
                )));
            }
        }
        Ok(())
    }
}

impl ExecutableTool for WebEnum {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    /// The target shape depends on the mode, which lives in the tokens;
    /// here both lab shapes are accepted and the pairing is checked in
    /// [`ExecutableTool::validate_tokens`].
    fn validate_target(&self, raw: &str) -> Result<ParsedTarget, ToolError> {
        if raw.contains("://") {
            target::parse_url_target(raw)
        } else {
            match target::parse_host_target(raw)? {
                parsed @ (ParsedTarget::Hostname(_) | ParsedTarget::Address(_)) => Ok(parsed),
                _ => Err(ToolError::TargetNotAllowed {
                    target: raw.to_string(),
                    reason: "enumeration takes a URL or a single host, not a network".to_string(),
                }),
            }
        }
    }

    fn validate_tokens(
        &self,
        mut tokens: Vec<String>,
        target: &ParsedTarget,
    ) -> Result<Vec<String>, ToolError> {
        let mode = Self::mode_of(&tokens)?;

        match (mode, target) {
            ("dns", ParsedTarget::Hostname(_)) => {}
            ("dns", _) => {
                return Err(ToolError::InvalidArguments {
                    reason: "dns mode takes a hostname under .lab.internal".to_string(),
                })
            }
            (_, ParsedTarget::Url(_)) => {}
            (_, _) => {
                return Err(ToolError::InvalidArguments {
                    reason: format!("{mode} mode takes an http(s) URL"),
                })
            }
        }

        if let Some(wordlist) = args::flag_value(&tokens, "-w") {
            self.validate_wordlist(wordlist)?;
        }

        let (max_threads, _) = mode_limits(mode).unwrap_or((10, 10));
        if let Some(threads) = args::flag_value(&tokens, "-t") {
            let clamped = clamp_numeric_flag(threads, "-t", 1, max_threads)?;
            args::set_flag_value(&mut tokens, "-t", &clamped.to_string());
        }

        if let Some(extensions) = args::flag_value(&tokens, "-x") {
            if !self.spec.intrusive {
                for extension in extensions.split(',') {
                    let extension = extension.trim().trim_start_matches('.');
                    if !SAFE_EXTENSIONS.contains(&extension) {
                        return Err(ToolError::InvalidArguments {
                            reason: format!("extension '{extension}' is not in the safe set"),
                        });
                    }
                }
            }
        }
        Ok(tokens)
    }

    fn shape_args(&self, mut tokens: Vec<String>) -> Vec<String> {
        let mode = Self::mode_of(&tokens).unwrap_or("dir");
        if !tokens.iter().any(|t| mode_limits(t).is_some()) {
            tokens.insert(0, mode.to_string());
        }
        if !args::has_flag(&tokens, "-t") {
            let (_, default_threads) = mode_limits(mode).unwrap_or((10, 10));
            tokens.push("-t".to_string());
            tokens.push(default_threads.to_string());
        }
        if !args::has_flag(&tokens, "-q") {
            tokens.push("-q".to_string());
        }
        tokens
    }

    fn tool_info(&self) -> ToolInfo {
        ToolInfo::from_spec(&self.spec)
            .with_limit("modes", json!(["dir", "dns", "vhost"]))
            .with_limit("max_wordlist_bytes", json!(MAX_WORDLIST_BYTES))
            .with_limit("max_wordlist_lines", json!(MAX_WORDLIST_LINES))
            .with_limit(
                "max_threads",
                json!({ "dir": 30, "dns": 50, "vhost": 20 }),
            )
            .with_limit("safe_extensions", json!(SAFE_EXTENSIONS))
    }
}
