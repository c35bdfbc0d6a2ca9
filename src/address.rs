use crate::error::{ProxyError, Result};
use crate::protocol::ProxyType;
use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use tracing::debug;

/// Longest domain name a SOCKS5 request can carry: one length octet
pub const MAX_DOMAIN_LEN: usize = 255;

/// TargetAddr is the destination reached through the proxy: either a
/// literal IP address or a name left for someone to resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ip(SocketAddr),
    Domain(String, u16),
}

/// TargetAddr implementation block
impl TargetAddr {
    /// new classifies `host` as an IP literal or a name.
    /// Brackets are accepted around IPv6 literals (`[::1]`) and nowhere else.
    /// Names carrying whitespace or control characters are refused
    pub fn new(host: &str, port: u16) -> Result<Self> {
        if port == 0 {
            return Err(ProxyError::config("target port must be in 1..=65535"));
        }

        let host = host.trim();
        if host.is_empty() {
            return Err(ProxyError::config("target host is required"));
        }

        if host.starts_with('[') || host.ends_with(']') {
            let inner = host.strip_prefix('[').and_then(|h| h.strip_suffix(']'));
            return match inner.map(str::parse::<Ipv6Addr>) {
                Some(Ok(ip)) => Ok(TargetAddr::Ip(SocketAddr::new(IpAddr::V6(ip), port))),
                _ => Err(ProxyError::config(format!(
                    "brackets only enclose IPv6 literals, got {host:?}"
                ))),
            };
        }

        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(TargetAddr::Ip(SocketAddr::new(ip, port)));
        }

        check_name(host)
            .map_err(|reason| ProxyError::config(format!("target host {host:?}: {reason}")))?;
        Ok(TargetAddr::Domain(host.to_string(), port))
    }

    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }

    /// host returns the host part without brackets
    pub fn host(&self) -> String {
        match self {
            TargetAddr::Ip(addr) => addr.ip().to_string(),
            TargetAddr::Domain(name, _) => name.clone(),
        }
    }
}

/// check_name refuses whitespace and control characters, which would end or
/// split a name inside an HTTP request line or a NUL-terminated SOCKS4a frame
pub(crate) fn check_name(name: &str) -> std::result::Result<(), String> {
    match name.chars().find(|c| c.is_whitespace() || c.is_control()) {
        Some(c) => Err(format!("contains forbidden character {c:?}")),
        None => Ok(()),
    }
}

impl From<SocketAddr> for TargetAddr {
    fn from(addr: SocketAddr) -> Self {
        TargetAddr::Ip(addr)
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{addr}"),
            TargetAddr::Domain(name, port) => write!(f, "{name}:{port}"),
        }
    }
}

/// resolve_destination puts the target in the form `proxy_type` can encode.
///
/// SOCKS4 has no notion of proxy-side resolution, so names are resolved here
/// and the first IPv4 answer is kept. Every other protocol passes names through
/// for the proxy to resolve. Runs before any byte reaches the proxy.
pub async fn resolve_destination(proxy_type: ProxyType, target: &TargetAddr) -> Result<TargetAddr> {
    if proxy_type == ProxyType::None {
        return Err(ProxyError::config("proxy type is not set"));
    }

    // Domain values can be built directly, bypassing TargetAddr::new
    if let TargetAddr::Domain(name, _) = target {
        check_name(name).map_err(|reason| ProxyError::resolution(name.clone(), reason))?;
    }

    match (proxy_type, target) {
        (ProxyType::Socks4, TargetAddr::Ip(SocketAddr::V4(_))) => Ok(target.clone()),
        (ProxyType::Socks4, TargetAddr::Ip(SocketAddr::V6(addr))) => Err(ProxyError::resolution(
            addr.ip().to_string(),
            "socks4 cannot address IPv6 destinations",
        )),
        (ProxyType::Socks4, TargetAddr::Domain(name, port)) => resolve_ipv4(name, *port).await,

        // SOCKS4a only knows IPv4 or a name, so an IPv6 literal travels as text
        (ProxyType::Socks4a, TargetAddr::Ip(SocketAddr::V6(addr))) => {
            Ok(TargetAddr::Domain(addr.ip().to_string(), addr.port()))
        }

        (ProxyType::Socks5, TargetAddr::Domain(name, _)) if name.len() > MAX_DOMAIN_LEN => {
            Err(ProxyError::resolution(
                name.clone(),
                format!("domain name is {} bytes, max {MAX_DOMAIN_LEN}", name.len()),
            ))
        }

        _ => Ok(target.clone()),
    }
}

/// resolve_ipv4 performs local DNS resolution and returns the first IPv4 result
async fn resolve_ipv4(name: &str, port: u16) -> Result<TargetAddr> {
    // DEBUG
    debug!("resolving {} locally for socks4", name);

    let addrs = tokio::net::lookup_host((name, port))
        .await
        .map_err(|e| ProxyError::resolution(name, e.to_string()))?;

    addrs
        .into_iter()
        .find(SocketAddr::is_ipv4)
        .map(TargetAddr::Ip)
        .ok_or_else(|| ProxyError::resolution(name, "no IPv4 address found"))
}
