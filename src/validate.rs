//! Input validation for pier identifiers and network endpoints.
//!
//! Endpoints take one of three shapes, each with an optional `:port`
//! suffix: a bracketed IPv6 address (`[::1]:8080`), a dotted IPv4 address
//! (`10.0.0.1:80`), or a DNS host name (`example.com:3000`).

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::models::pier::split_pier;

/// Characters that may not appear in either half of a pier id.
const FORBIDDEN_PIER_CHARS: &[char] = &['*', '/', '\\', '<', '>', ':', '|', '?'];

/// Check that `pier` has the form `owner/host`.
#[must_use]
pub fn is_valid_pier_name(pier: &str) -> bool {
    let Some((owner, host)) = split_pier(pier) else {
        return false;
    };
    is_valid_pier_part(owner) && is_valid_pier_part(host)
}

fn is_valid_pier_part(part: &str) -> bool {
    // Each half names a directory under the pier repository.
    !part.is_empty()
        && part != "."
        && part != ".."
        && !part
            .chars()
            .any(|c| c.is_whitespace() || FORBIDDEN_PIER_CHARS.contains(&c))
}

/// Check that `endpoint` is an IPv6, IPv4, or host name endpoint.
#[must_use]
pub fn is_network_endpoint(endpoint: &str) -> bool {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return false;
    }

    if let Some(rest) = endpoint.strip_prefix('[') {
        let Some((addr, tail)) = rest.split_once(']') else {
            return false;
        };
        return addr.parse::<Ipv6Addr>().is_ok() && is_port_suffix(tail);
    }

    let (host, port) = split_port(endpoint);
    if port.is_some_and(|p| p.parse::<u16>().is_err()) {
        return false;
    }

    if host.chars().all(|c| c.is_ascii_digit() || c == '.') {
        host.parse::<Ipv4Addr>().is_ok()
    } else {
        is_host_name(host)
    }
}

/// Check that `endpoint` is a dotted IPv4 address with an optional port.
#[must_use]
pub fn is_ipv4_endpoint(endpoint: &str) -> bool {
    let (host, port) = split_port(endpoint.trim());
    host.parse::<Ipv4Addr>().is_ok() && port.is_none_or(|p| p.parse::<u16>().is_ok())
}

/// Check a comma separated list of endpoints; empty entries are rejected.
#[must_use]
pub fn is_network_endpoint_list(list: &str) -> bool {
    !list.trim().is_empty() && list.split(',').all(is_network_endpoint)
}

fn split_port(endpoint: &str) -> (&str, Option<&str>) {
    match endpoint.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (endpoint, None),
    }
}

fn is_port_suffix(tail: &str) -> bool {
    if tail.is_empty() {
        return true;
    }
    tail.strip_prefix(':')
        .is_some_and(|port| port.parse::<u16>().is_ok())
}

fn is_host_name(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
