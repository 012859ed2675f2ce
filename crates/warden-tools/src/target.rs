//! Target authorization policy.
//!
//! Every tool only ever touches lab-scoped targets: RFC1918 or loopback
//! IPv4 addresses and networks, hostnames under `.lab.internal`, and (for
//! HTTP-oriented tools) URLs whose host satisfies the same constraint.
//! Anything else is rejected before any other validation runs.

use std::net::Ipv4Addr;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::errors::ToolError;

/// Required suffix for lab hostnames.
pub const LAB_DOMAIN_SUFFIX: &str = ".lab.internal";

/// Conservative hostname label shape (RFC 1123 label, no underscores).
static HOSTNAME_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?$").expect("label regex"));

/// An IPv4 network in CIDR form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Network {
    /// Network base address (host bits already masked off).
    pub network: Ipv4Addr,
    /// Prefix length, 0..=32.
    pub prefix: u8,
}

impl Ipv4Network {
    /// Parse `a.b.c.d/len`, masking host bits.
    pub fn parse(text: &str) -> Result<Self, String> {
        let (addr_text, prefix_text) = text
            .split_once('/')
            .ok_or_else(|| format!("'{text}' is not CIDR notation"))?;
        let addr: Ipv4Addr = addr_text
            .parse()
            .map_err(|_| format!("'{addr_text}' is not an IPv4 address"))?;
        let prefix: u8 = prefix_text
            .parse()
            .map_err(|_| format!("'{prefix_text}' is not a prefix length"))?;
        if prefix > 32 {
            return Err(format!("prefix /{prefix} out of range"));
        }
        let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
        Ok(Self {
            network: Ipv4Addr::from(u32::from(addr) & mask),
            prefix,
        })
    }

    /// Number of addresses covered by this network.
    pub fn host_count(&self) -> u64 {
        1u64 << (32 - self.prefix)
    }

    /// Last address of the network.
    pub fn broadcast(&self) -> Ipv4Addr {
        let mask = if self.prefix == 0 { 0 } else { u32::MAX << (32 - self.prefix) };
        Ipv4Addr::from(u32::from(self.network) | !mask)
    }
}

impl std::fmt::Display for Ipv4Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Whether an address is in RFC1918 or loopback space.
pub fn is_private_address(addr: Ipv4Addr) -> bool {
    addr.is_private() || addr.is_loopback()
}

/// Whether the entire network sits inside one private or loopback block.
///
/// A network that merely *starts* in private space is not enough; scanning
/// `10.0.0.0/7` would walk out of it.
pub fn is_private_network(network: &Ipv4Network) -> bool {
    is_private_address(network.network) && is_private_address(network.broadcast())
}

/// Whether `host` is a well-formed hostname under the lab suffix.
pub fn is_lab_hostname(host: &str) -> bool {
    let Some(stem) = host.strip_suffix(LAB_DOMAIN_SUFFIX) else {
        return false;
    };
    !stem.is_empty() && stem.split('.').all(|label| HOSTNAME_LABEL.is_match(label))
}

/// An authorized target, parsed into its policy shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedTarget {
    /// A single private or loopback IPv4 address.
    Address(Ipv4Addr),
    /// A fully private IPv4 network.
    Network(Ipv4Network),
    /// A hostname under `.lab.internal`.
    Hostname(String),
    /// An `http`/`https` URL whose host is private or lab-scoped.
    Url(Url),
}

impl ParsedTarget {
    /// Addresses covered: 1 for everything except networks.
    pub fn host_count(&self) -> u64 {
        match self {
            ParsedTarget::Network(network) => network.host_count(),
            _ => 1,
        }
    }
}

fn not_allowed(target: &str, reason: impl Into<String>) -> ToolError {
    ToolError::TargetNotAllowed {
        target: target.to_string(),
        reason: reason.into(),
    }
}

/// Validate a host-shaped target (address, CIDR, or lab hostname).
pub fn parse_host_target(target: &str) -> Result<ParsedTarget, ToolError> {
    if target.is_empty() {
        return Err(not_allowed(target, "empty target"));
    }
    if let Ok(addr) = target.parse::<Ipv4Addr>() {
        return if is_private_address(addr) {
            Ok(ParsedTarget::Address(addr))
        } else {
            Err(not_allowed(target, "address is not RFC1918 or loopback"))
        };
    }
    if target.contains('/') {
        let network = Ipv4Network::parse(target).map_err(|reason| not_allowed(target, reason))?;
        return if is_private_network(&network) {
            Ok(ParsedTarget::Network(network))
        } else {
            Err(not_allowed(target, "network extends outside RFC1918/loopback space"))
        };
    }
    if is_lab_hostname(target) {
        return Ok(ParsedTarget::Hostname(target.to_string()));
    }
    Err(not_allowed(
        target,
        format!("expected an RFC1918 address/network or a hostname under {LAB_DOMAIN_SUFFIX}"),
    ))
}

/// Validate a URL-shaped target for HTTP-oriented tools.
pub fn parse_url_target(target: &str) -> Result<ParsedTarget, ToolError> {
    let url = Url::parse(target).map_err(|e| not_allowed(target, format!("not a URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(not_allowed(target, format!("scheme '{other}' not allowed"))),
    }
    let host = url
        .host_str()
        .ok_or_else(|| not_allowed(target, "URL has no host"))?;
    if let Ok(addr) = host.parse::<Ipv4Addr>() {
        if !is_private_address(addr) {
            return Err(not_allowed(target, "URL host is not RFC1918 or loopback"));
        }
    } else if !is_lab_hostname(host) {
        return Err(not_allowed(
            target,
            format!("URL host must be RFC1918 or end in {LAB_DOMAIN_SUFFIX}"),
        ));
    }
    Ok(ParsedTarget::Url(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_addresses_pass() {
        for target in ["10.0.0.1", "172.16.5.4", "192.168.1.1", "127.0.0.1"] {
            assert!(parse_host_target(target).is_ok(), "{target}");
        }
    }

    #[test]
    fn public_addresses_fail() {
        for target in ["8.8.8.8", "1.1.1.1", "172.32.0.1", "192.169.0.1"] {
            assert!(parse_host_target(target).is_err(), "{target}");
        }
    }

    #[test]
    fn networks_must_be_entirely_private() {
        assert!(parse_host_target("10.0.0.0/8").is_ok());
        assert!(parse_host_target("192.168.1.0/24").is_ok());
        assert!(parse_host_target("172.16.0.0/12").is_ok());
        // 10.0.0.0/7 covers 11.0.0.0/8 too.
        assert!(parse_host_target("10.0.0.0/7").is_err());
        // 172.16.0.0/11 walks past 172.31.255.255.
        assert!(parse_host_target("172.16.0.0/11").is_err());
        assert!(parse_host_target("0.0.0.0/0").is_err());
    }

    #[test]
    fn host_bits_are_masked() {
        let network = Ipv4Network::parse("10.1.2.3/24").expect("parse");
        assert_eq!(network.network, Ipv4Addr::new(10, 1, 2, 0));
        assert_eq!(network.host_count(), 256);
        assert_eq!(network.broadcast(), Ipv4Addr::new(10, 1, 2, 255));
    }

    #[test]
    fn lab_hostnames_pass_and_others_fail() {
        assert!(parse_host_target("web01.lab.internal").is_ok());
        assert!(parse_host_target("db.tier2.lab.internal").is_ok());
        assert!(parse_host_target("example.com").is_err());
        assert!(parse_host_target(".lab.internal").is_err());
        assert!(parse_host_target("bad_host.lab.internal").is_err());
        assert!(parse_host_target("-dash.lab.internal").is_err());
    }

    #[test]
    fn url_targets_require_private_hosts() {
        assert!(parse_url_target("http://192.168.1.10/").is_ok());
        assert!(parse_url_target("https://app.lab.internal/login").is_ok());
        assert!(parse_url_target("https://example.com/").is_err());
        assert!(parse_url_target("ftp://192.168.1.10/").is_err());
        assert!(parse_url_target("not a url").is_err());
    }

    #[test]
    fn rejection_reason_names_the_policy() {
        let err = parse_url_target("https://example.com/").unwrap_err();
        let text = err.to_string();
        assert!(text.contains("RFC1918") || text.contains(LAB_DOMAIN_SUFFIX), "{text}");
    }
}
