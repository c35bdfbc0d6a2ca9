use std::fmt;
use std::io;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ProxyError>;

/// ProxyError is every way building a client or running a handshake can fail.
///
/// The variants fall into four groups: bad configuration (`InvalidConfig`,
/// `UnsupportedProxyType`), destination resolution (`Resolution`), transport
/// trouble (`Transport`, `Protocol`) and an explicit refusal by the proxy
/// (`Rejected`).
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Caller supplied arguments that can never work
    #[error("invalid proxy configuration: {0}")]
    InvalidConfig(String),

    /// A proxy type tag outside the known set
    #[error("unsupported proxy type: {0}")]
    UnsupportedProxyType(String),

    /// The destination could not be put in the form the protocol needs
    #[error("cannot resolve '{host}': {reason}")]
    Resolution { host: String, reason: String },

    /// Socket error, timeout or early end of stream while talking to the proxy
    #[error("proxy communication failure: {0}")]
    Transport(#[from] io::Error),

    /// The proxy answered with bytes that do not follow the protocol
    #[error("proxy protocol violation: {0}")]
    Protocol(String),

    /// The proxy understood the request and refused it
    #[error("proxy rejected request: {0}")]
    Rejected(Rejection),
}

impl ProxyError {
    /// is_transport reports whether the failure came from the byte stream
    /// rather than from a proxy decision
    pub fn is_transport(&self) -> bool {
        matches!(self, ProxyError::Transport(_) | ProxyError::Protocol(_))
    }

    /// is_rejection reports whether the proxy explicitly refused
    pub fn is_rejection(&self) -> bool {
        matches!(self, ProxyError::Rejected(_))
    }

    /// is_config reports a caller error detected before any I/O
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            ProxyError::InvalidConfig(_) | ProxyError::UnsupportedProxyType(_)
        )
    }

    /// rejection returns the carried refusal reason, if any
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ProxyError::Rejected(r) => Some(r),
            _ => None,
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        ProxyError::InvalidConfig(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        ProxyError::Protocol(msg.into())
    }

    pub(crate) fn resolution(host: impl Into<String>, reason: impl Into<String>) -> Self {
        ProxyError::Resolution {
            host: host.into(),
            reason: reason.into(),
        }
    }
}

/// Rejection carries the protocol-defined reason a proxy refused a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Non-2xx answer to CONNECT
    Http { status: u16, status_line: String },

    /// SOCKS4/4a status byte other than 0x5A
    Socks4(crate::socks4::Socks4Status),

    /// SOCKS5 reply field other than 0x00
    Socks5(crate::socks5::protocol::ReplyCode),

    /// SOCKS5 server answered method selection with 0xFF
    NoAcceptableMethod,

    /// RFC 1929 sub-negotiation returned a non-zero status
    AuthenticationFailed(u8),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Http { status_line, .. } => write!(f, "{status_line}"),
            Rejection::Socks4(status) => write!(f, "{status}"),
            Rejection::Socks5(code) => write!(f, "{code}"),
            Rejection::NoAcceptableMethod => write!(f, "no acceptable authentication method"),
            Rejection::AuthenticationFailed(status) => {
                write!(f, "authentication failed (status {status:#04x})")
            }
        }
    }
}
