//! Argument sanitization and shaping helpers.
//!
//! Caller-supplied `extra_args` go through a fixed gauntlet: byte-length
//! bound, shell-metacharacter screen, POSIX tokenization (no shell ever
//! runs), per-token charset check, then flag whitelisting against the
//! tool's descriptor. Only tokens that survive all five steps reach the
//! argument vector.

use once_cell::sync::Lazy;
use regex::Regex;
use warden_types::SHELL_METACHARACTERS;

use crate::errors::ToolError;
use crate::spec::ToolSpec;

/// Characters a bare token may consist of.
static TOKEN_CHARSET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._:/=+,\-@%]+$").expect("token charset regex"));

fn invalid(reason: impl Into<String>) -> ToolError {
    ToolError::InvalidArguments { reason: reason.into() }
}

/// Sanitize `extra_args` against `spec` and return the surviving tokens.
pub fn sanitize_extra_args(extra_args: &str, spec: &ToolSpec) -> Result<Vec<String>, ToolError> {
    if extra_args.len() > spec.max_args_len {
        return Err(invalid(format!(
            "extra_args too long: {} bytes (max {})",
            extra_args.len(),
            spec.max_args_len
        )));
    }
    if let Some(bad) = extra_args.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
        return Err(invalid(format!("forbidden character {bad:?} in extra_args")));
    }

    let tokens = shell_words::split(extra_args)
        .map_err(|e| invalid(format!("unbalanced quoting in extra_args: {e}")))?;

    for token in &tokens {
        if !TOKEN_CHARSET.is_match(token) && !spec.extra_allowed_tokens.iter().any(|t| t == token) {
            return Err(invalid(format!("token '{token}' contains disallowed characters")));
        }
    }

    check_flag_policy(&tokens, spec)?;
    Ok(tokens)
}

/// Enforce the descriptor's flag whitelist over a token stream.
///
/// Also run after shaping: optimizer-injected tokens must already be
/// admissible, so re-validation is a no-op by construction.
pub fn check_flag_policy(tokens: &[String], spec: &ToolSpec) -> Result<(), ToolError> {
    let mut expecting_value_for: Option<&str> = None;
    for token in tokens {
        if expecting_value_for.take().is_some() {
            // Value position: charset already vetted, nothing else applies.
            continue;
        }
        if token.starts_with('-') {
            if !spec.allowed_flags.iter().any(|flag| token.starts_with(flag.as_str())) {
                return Err(invalid(format!(
                    "flag '{token}' is not allowed for {}",
                    spec.name
                )));
            }
            if spec.flags_requiring_value.iter().any(|flag| flag == token) {
                expecting_value_for = Some(token);
            }
        } else if !spec.extra_allowed_tokens.iter().any(|t| t == token) {
            return Err(invalid(format!("unexpected token '{token}'")));
        }
    }
    if let Some(flag) = expecting_value_for {
        return Err(invalid(format!("flag '{flag}' is missing its value")));
    }
    Ok(())
}

/// Whether any token equals `flag`, extends it with `=`, or (for short
/// flags) glues a value directly onto it, e.g. `-T3` against `-T`.
pub fn has_flag(tokens: &[String], flag: &str) -> bool {
    tokens
        .iter()
        .any(|t| t == flag || t.starts_with(&format!("{flag}=")) || (flag.len() == 2 && t.starts_with(flag)))
}

/// The value of `flag`: the following token, glued with `=`, or (for short
/// flags) glued directly, e.g. `-p80` against `-p`.
pub fn flag_value<'a>(tokens: &'a [String], flag: &str) -> Option<&'a str> {
    let glued = format!("{flag}=");
    for (index, token) in tokens.iter().enumerate() {
        if let Some(value) = token.strip_prefix(&glued) {
            return Some(value);
        }
        if token == flag {
            return tokens.get(index + 1).map(String::as_str);
        }
        if flag.len() == 2 {
            if let Some(value) = token.strip_prefix(flag) {
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Replace the value of `flag` in place, in whichever form it was given.
pub fn set_flag_value(tokens: &mut [String], flag: &str, new_value: &str) {
    let glued = format!("{flag}=");
    for index in 0..tokens.len() {
        if tokens[index].starts_with(&glued) {
            tokens[index] = format!("{flag}={new_value}");
            return;
        }
        if tokens[index] == flag {
            if let Some(slot) = tokens.get_mut(index + 1) {
                *slot = new_value.to_string();
            }
            return;
        }
        if flag.len() == 2 && tokens[index].starts_with(flag) && tokens[index].len() > 2 {
            tokens[index] = format!("{flag}{new_value}");
            return;
        }
    }
}

/// A parsed port specification: inclusive ranges, ports 1..=65535.
pub fn parse_port_spec(spec_text: &str) -> Result<Vec<(u16, u16)>, String> {
    const MAX_RANGES: usize = 64;
    let mut ranges = Vec::new();
    for piece in spec_text.split(',') {
        let piece = piece.trim();
        if piece.is_empty() {
            return Err("empty port range".to_string());
        }
        let (low_text, high_text) = match piece.split_once('-') {
            Some((low, high)) => (low, high),
            None => (piece, piece),
        };
        let low: u32 = low_text.parse().map_err(|_| format!("'{piece}' is not a port"))?;
        let high: u32 = high_text.parse().map_err(|_| format!("'{piece}' is not a port"))?;
        if low == 0 || high == 0 {
            return Err("port zero is not scannable".to_string());
        }
        if low > 65535 || high > 65535 {
            return Err(format!("port out of range in '{piece}'"));
        }
        if low > high {
            return Err(format!("inverted range '{piece}'"));
        }
        ranges.push((low as u16, high as u16));
        if ranges.len() > MAX_RANGES {
            return Err(format!("too many port ranges (max {MAX_RANGES})"));
        }
    }
    if ranges.is_empty() {
        return Err("empty port specification".to_string());
    }
    Ok(ranges)
}

/// Parse and clamp a numeric flag value into `[min, max]`.
pub fn clamp_numeric_flag(raw: &str, flag: &str, min: u64, max: u64) -> Result<u64, ToolError> {
    let value: u64 = raw
        .parse()
        .map_err(|_| invalid(format!("value '{raw}' for {flag} is not a number")))?;
    Ok(value.clamp(min, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_config::Config;

    fn spec() -> ToolSpec {
        let mut spec = ToolSpec::from_config("TestTool", "testtool", &Config::default());
        spec.allowed_flags = vec!["-p".into(), "--rate".into(), "-T".into()];
        spec.flags_requiring_value = vec!["-p".into(), "--rate".into()];
        spec.extra_allowed_tokens = vec!["dir".into()];
        spec
    }

    #[test]
    fn accepts_whitelisted_flags_with_values() {
        let tokens = sanitize_extra_args("-p 80,443 --rate 500 -T3", &spec()).expect("sanitize");
        assert_eq!(tokens, vec!["-p", "80,443", "--rate", "500", "-T3"]);
    }

    #[test]
    fn rejects_shell_metacharacters() {
        for bad in ["-p 80; rm -rf /", "a|b", "x > /tmp/out", "`id`", "a$b", "a\nb"] {
            let err = sanitize_extra_args(bad, &spec()).unwrap_err();
            assert!(matches!(err, ToolError::InvalidArguments { .. }), "{bad}");
        }
    }

    #[test]
    fn rejects_oversized_args() {
        let long = "a".repeat(4096);
        assert!(sanitize_extra_args(&long, &spec()).is_err());
    }

    #[test]
    fn rejects_unknown_flags_and_stray_tokens() {
        assert!(sanitize_extra_args("--exec evil", &spec()).is_err());
        assert!(sanitize_extra_args("stray", &spec()).is_err());
        // Allowed bare token passes.
        assert!(sanitize_extra_args("dir", &spec()).is_ok());
    }

    #[test]
    fn value_flags_consume_the_next_token() {
        // "80,443" alone would be a stray token; after -p it is a value.
        assert!(sanitize_extra_args("-p 80,443", &spec()).is_ok());
        let err = sanitize_extra_args("-p", &spec()).unwrap_err();
        assert!(err.to_string().contains("missing its value"));
    }

    #[test]
    fn charset_rejects_odd_tokens() {
        assert!(sanitize_extra_args("-p 80'", &spec()).is_err());
        assert!(sanitize_extra_args("--rate '5 00'", &spec()).is_err());
    }

    #[test]
    fn flag_lookup_helpers() {
        let tokens: Vec<String> =
            vec!["-p".into(), "80".into(), "--rate=500".into(), "-T3".into()];
        assert!(has_flag(&tokens, "-p"));
        assert!(has_flag(&tokens, "--rate"));
        assert!(has_flag(&tokens, "-T"));
        assert!(!has_flag(&tokens, "--wait"));
        assert_eq!(flag_value(&tokens, "-p"), Some("80"));
        assert_eq!(flag_value(&tokens, "--rate"), Some("500"));

        let mut tokens = tokens;
        set_flag_value(&mut tokens, "--rate", "100");
        assert_eq!(flag_value(&tokens, "--rate"), Some("100"));
        set_flag_value(&mut tokens, "-p", "443");
        assert_eq!(flag_value(&tokens, "-p"), Some("443"));
    }

    #[test]
    fn port_spec_parsing() {
        assert_eq!(parse_port_spec("80,443").unwrap(), vec![(80, 80), (443, 443)]);
        assert_eq!(parse_port_spec("1-1024").unwrap(), vec![(1, 1024)]);
        assert!(parse_port_spec("0").is_err());
        assert!(parse_port_spec("80,0").is_err());
        assert!(parse_port_spec("70000").is_err());
        assert!(parse_port_spec("100-1").is_err());
        assert!(parse_port_spec("").is_err());
    }

    #[test]
    fn numeric_clamp() {
        assert_eq!(clamp_numeric_flag("500", "--rate", 100, 1000).unwrap(), 500);
        assert_eq!(clamp_numeric_flag("5", "--rate", 100, 1000).unwrap(), 100);
        assert_eq!(clamp_numeric_flag("9999", "--rate", 100, 1000).unwrap(), 1000);
        assert!(clamp_numeric_flag("abc", "--rate", 100, 1000).is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Any input carrying a shell metacharacter is rejected, no
            /// matter where the character lands.
            #[test]
            fn metacharacters_never_survive(
                prefix in "[a-zA-Z0-9 .-]{0,32}",
                bad in proptest::sample::select(warden_types::SHELL_METACHARACTERS.to_vec()),
                suffix in "[a-zA-Z0-9 .-]{0,32}",
            ) {
                let input = format!("{prefix}{bad}{suffix}");
                prop_assert!(sanitize_extra_args(&input, &spec()).is_err());
            }

            /// Sanitized output never contains tokens outside the charset
            /// (unless explicitly allowlisted), and never panics.
            #[test]
            fn surviving_tokens_are_clean(input in "[ -~]{0,64}") {
                if let Ok(tokens) = sanitize_extra_args(&input, &spec()) {
                    for token in tokens {
                        prop_assert!(
                            TOKEN_CHARSET.is_match(&token)
                                || spec().extra_allowed_tokens.contains(&token)
                        );
                    }
                }
            }
        }
    }
}
