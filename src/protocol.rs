use crate::error::{ProxyError, Result};
use std::fmt;
use std::str::FromStr;

/// ProxyType represents the supported proxy wire protocols.
/// `None` is the "unspecified" sentinel and never yields a client
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProxyType {
    #[default]
    None = 0,
    Http = 1,
    Socks4 = 2,
    Socks4a = 3,
    Socks5 = 4,
}

/// ProxyType implementation block
impl ProxyType {
    /// name returns the lowercase protocol name used on the command line
    pub fn name(self) -> &'static str {
        match self {
            ProxyType::None => "none",
            ProxyType::Http => "http",
            ProxyType::Socks4 => "socks4",
            ProxyType::Socks4a => "socks4a",
            ProxyType::Socks5 => "socks5",
        }
    }
}

impl TryFrom<u8> for ProxyType {
    type Error = ProxyError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(ProxyType::None),
            1 => Ok(ProxyType::Http),
            2 => Ok(ProxyType::Socks4),
            3 => Ok(ProxyType::Socks4a),
            4 => Ok(ProxyType::Socks5),
            other => Err(ProxyError::UnsupportedProxyType(format!("tag {other}"))),
        }
    }
}

impl FromStr for ProxyType {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ProxyType::None),
            "http" => Ok(ProxyType::Http),
            "socks4" => Ok(ProxyType::Socks4),
            "socks4a" => Ok(ProxyType::Socks4a),
            "socks5" => Ok(ProxyType::Socks5),
            _ => Err(ProxyError::UnsupportedProxyType(s.to_string())),
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// ProxyEndpoint is the host and port of the proxy itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    host: String,
    port: u16,
}

/// ProxyEndpoint implementation block
impl ProxyEndpoint {
    /// new validates and builds an endpoint; the host may be an IP literal or a name
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(ProxyError::config("proxy host is required"));
        }
        if port == 0 {
            return Err(ProxyError::config("proxy port must be in 1..=65535"));
        }
        Ok(Self { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// dial_addr returns the `host:port` form accepted by `TcpStream::connect`
    pub(crate) fn dial_addr(&self) -> String {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        if host.contains(':') {
            format!("[{host}]:{}", self.port)
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dial_addr())
    }
}

/// Credentials holds the optional username and password offered to the proxy
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Credentials implementation block
impl Credentials {
    /// new builds a username/password pair
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// user_id builds the username-only form SOCKS4 understands
    pub fn user_id(user: impl Into<String>) -> Self {
        Self {
            username: Some(user.into()),
            password: None,
        }
    }

    /// is_anonymous is true when neither field carries a value
    pub fn is_anonymous(&self) -> bool {
        self.username.as_deref().is_none_or(str::is_empty)
            && self.password.as_deref().is_none_or(str::is_empty)
    }

    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or_default()
    }

    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }

    /// validate_for checks that the credential shape fits the given protocol
    pub fn validate_for(&self, proxy_type: ProxyType) -> Result<()> {
        if self.is_anonymous() {
            return Ok(());
        }

        // A password alone is meaningless for every protocol
        if self.username().is_empty() {
            return Err(ProxyError::config("password supplied without a username"));
        }

        match proxy_type {
            ProxyType::Socks4 | ProxyType::Socks4a => {
                if !self.password().is_empty() {
                    return Err(ProxyError::config(format!(
                        "{proxy_type} only carries a user id, not a password"
                    )));
                }
                if self.username().as_bytes().contains(&0) {
                    return Err(ProxyError::config("user id must not contain NUL bytes"));
                }
            }
            ProxyType::Socks5 => {
                // RFC 1929: ULEN 1..=255, PLEN fits in one byte
                if self.username().len() > 255 {
                    return Err(ProxyError::config("socks5 username exceeds 255 bytes"));
                }
                if self.password().len() > 255 {
                    return Err(ProxyError::config("socks5 password exceeds 255 bytes"));
                }
            }
            ProxyType::Http | ProxyType::None => (),
        }

        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// ClientState tracks a ProxyClient through its single handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Connected,
    Failed,
}
