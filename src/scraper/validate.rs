//! URL validation guarding outbound fetches against SSRF.
//!
//! [`validate_url`] is a pure check on the URL text. [`ensure_public_host`]
//! additionally resolves the hostname so names pointing at internal addresses
//! are refused before a connection is made. [`resolve_public`] backs the HTTP
//! client's resolver, so every connection, redirects included, goes to an
//! address that passed the same check.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use url::{Host, Url};

use super::ScrapeError;

/// Hostnames refused regardless of what they resolve to.
const BLOCKED_HOSTNAMES: &[&str] = &["localhost", "metadata", "instance-data"];

/// Domain suffixes reserved for local or cloud-internal names.
const BLOCKED_SUFFIXES: &[&str] = &[".localhost", ".local", ".internal"];

/// Validate and normalize a candidate URL. Makes no network calls.
pub fn validate_url(raw: &str) -> Result<Url, ScrapeError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ScrapeError::InvalidUrl("URL is empty".to_string()));
    }

    let mut url = Url::parse(raw)
        .map_err(|e| ScrapeError::InvalidUrl(format!("URL could not be parsed: {}", e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ScrapeError::InvalidUrl(format!(
                "URL scheme '{}' not allowed; only http and https are permitted",
                other
            )))
        }
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(ScrapeError::InvalidUrl(
            "URLs with embedded credentials are not allowed".to_string(),
        ));
    }

    check_host(&url)?;

    url.set_fragment(None);
    Ok(url)
}

/// Reject URLs whose host is empty, internal, or a non-public address literal.
pub fn check_host(url: &Url) -> Result<(), ScrapeError> {
    match url.host() {
        None => Err(ScrapeError::InvalidUrl("URL has no host".to_string())),
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            if domain.is_empty() {
                return Err(ScrapeError::InvalidUrl("URL has no host".to_string()));
            }
            if BLOCKED_HOSTNAMES.contains(&domain.as_str())
                || BLOCKED_SUFFIXES.iter().any(|s| domain.ends_with(s))
            {
                return Err(ScrapeError::InvalidUrl(format!(
                    "Access to host '{}' is not allowed",
                    domain
                )));
            }
            Ok(())
        }
        Some(Host::Ipv4(ip)) => check_ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => check_ip(IpAddr::V6(ip)),
    }
}

/// Resolve the URL's host and reject it if any address is not public.
pub async fn ensure_public_host(url: &Url) -> Result<(), ScrapeError> {
    let host = match url.host() {
        Some(Host::Domain(domain)) => domain.to_string(),
        // Address literals were already checked by `check_host`.
        Some(_) => return check_host(url),
        None => return Err(ScrapeError::InvalidUrl("URL has no host".to_string())),
    };
    let port = url.port_or_known_default().unwrap_or(443);

    resolve_public(&host, port).await.map(|_| ())
}

/// Resolve `host` and return its addresses, refusing the host outright if
/// any of them is not public.
pub async fn resolve_public(host: &str, port: u16) -> Result<Vec<SocketAddr>, ScrapeError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ScrapeError::InvalidUrl(format!("Host '{}' could not be resolved: {}", host, e)))?
        .collect();

    if addrs.is_empty() {
        return Err(ScrapeError::InvalidUrl(format!(
            "Host '{}' did not resolve to any address",
            host
        )));
    }

    if let Some(addr) = addrs.iter().find(|addr| is_blocked_ip(addr.ip())) {
        tracing::warn!(%host, ip = %addr.ip(), "Refusing host resolving to internal address");
        return Err(ScrapeError::InvalidUrl(format!(
            "Host '{}' resolves to a non-public address",
            host
        )));
    }

    Ok(addrs)
}

fn check_ip(ip: IpAddr) -> Result<(), ScrapeError> {
    if is_blocked_ip(ip) {
        Err(ScrapeError::InvalidUrl(format!(
            "Access to address '{}' is not allowed",
            ip
        )))
    } else {
        Ok(())
    }
}

/// True for loopback, private, link-local, metadata and other non-routable addresses.
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_ipv4(v4),
        IpAddr::V6(v6) => is_blocked_ipv6(v6),
    }
}

fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        // 0.0.0.0/8 "this network"
        || a == 0
        // 100.64.0.0/10 carrier-grade NAT, includes 100.100.100.200
        || (a == 100 && (b & 0xc0) == 64)
        // 198.18.0.0/15 benchmarking
        || (a == 198 && (b & 0xfe) == 18)
        // 240.0.0.0/4 reserved
        || a >= 240
}

fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_ipv4(v4);
    }

    let segments = ip.segments();

    // 64:ff9b::/96 NAT64 embeds an IPv4 address in the low 32 bits
    if segments[..6] == [0x64, 0xff9b, 0, 0, 0, 0] {
        let [.., hi, lo] = segments;
        let embedded = Ipv4Addr::from((u32::from(hi) << 16) | u32::from(lo));
        return is_blocked_ipv4(embedded);
    }

    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // fc00::/7 unique local, includes fd00:ec2::254
        || (segments[0] & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (segments[0] & 0xffc0) == 0xfe80
        // 2001:db8::/32 documentation
        || (segments[0] == 0x2001 && segments[1] == 0x0db8)
}
