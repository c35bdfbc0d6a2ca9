//! SOCKS4 and SOCKS4a handshakes
//!
//! Both protocols share one frame layout; SOCKS4a adds the `0.0.0.1`
//! sentinel address followed by a hostname so the proxy resolves it.

use crate::address::{TargetAddr, check_name};
use crate::client::Handshake;
use crate::error::{ProxyError, Rejection, Result};
use crate::protocol::ProxyType;
use crate::wire::{port_bytes, port_from, read_frame, write_frame};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// SOCKS4 version byte
pub const VERSION: u8 = 0x04;

/// Fixed reply length: VN, CD, DSTPORT, DSTIP
pub const REPLY_LEN: usize = 8;

/// Address SOCKS4a uses to say "a hostname follows"
pub const SOCKS4A_SENTINEL: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 1);

/// Command represents SOCKS4 request commands
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect = 0x01,
    Bind = 0x02,
}

/// Socks4Status represents the CD field of a SOCKS4 reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Socks4Status {
    Granted,
    Rejected,
    IdentdUnreachable,
    IdentdMismatch,
    Unknown(u8),
}

/// Socks4Status implementation block
impl Socks4Status {
    /// from_byte converts a reply status byte to its meaning
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x5a => Socks4Status::Granted,
            0x5b => Socks4Status::Rejected,
            0x5c => Socks4Status::IdentdUnreachable,
            0x5d => Socks4Status::IdentdMismatch,
            other => Socks4Status::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Socks4Status::Granted => 0x5a,
            Socks4Status::Rejected => 0x5b,
            Socks4Status::IdentdUnreachable => 0x5c,
            Socks4Status::IdentdMismatch => 0x5d,
            Socks4Status::Unknown(code) => code,
        }
    }
}

impl fmt::Display for Socks4Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Socks4Status::Granted => "request granted",
            Socks4Status::Rejected => "request rejected or failed",
            Socks4Status::IdentdUnreachable => "identd unreachable from proxy",
            Socks4Status::IdentdMismatch => "identd reported a different user id",
            Socks4Status::Unknown(_) => "unknown status",
        };
        write!(f, "{reason} ({:#04x})", self.code())
    }
}

// =======
// CODEC
// =======

/// encode_request builds a SOCKS4 or SOCKS4a request frame
///
/// ```text
/// +----+----+----+----+----+----+----+----+----+----+....+----+
/// | VN | CD | DSTPORT |      DSTIP        | USERID       |NULL|
/// +----+----+----+----+----+----+----+----+----+----+....+----+
///    1    1      2              4           variable       1
/// ```
///
/// SOCKS4a appends `HOSTNAME NULL` after the user id when DSTIP is the sentinel.
pub fn encode_request(
    command: Command,
    dest: &TargetAddr,
    user_id: &str,
    allow_names: bool,
) -> Result<Vec<u8>> {
    let (ip, hostname) = match dest {
        TargetAddr::Ip(SocketAddr::V4(addr)) => (*addr.ip(), None),
        TargetAddr::Ip(SocketAddr::V6(addr)) => {
            return Err(ProxyError::resolution(
                addr.ip().to_string(),
                "socks4 cannot address IPv6 destinations",
            ));
        }
        TargetAddr::Domain(name, _) if allow_names => {
            check_name(name).map_err(|reason| ProxyError::resolution(name.clone(), reason))?;
            (SOCKS4A_SENTINEL, Some(name.as_str()))
        }
        TargetAddr::Domain(name, _) => {
            return Err(ProxyError::resolution(
                name.clone(),
                "socks4 requires a literal IPv4 address",
            ));
        }
    };

    let mut frame = Vec::with_capacity(10 + user_id.len() + hostname.map_or(0, |h| h.len() + 1));
    frame.push(VERSION);
    frame.push(command as u8);
    frame.extend_from_slice(&port_bytes(dest.port()));
    frame.extend_from_slice(&ip.octets());
    frame.extend_from_slice(user_id.as_bytes());
    frame.push(0x00);

    if let Some(name) = hostname {
        frame.extend_from_slice(name.as_bytes());
        frame.push(0x00);
    }

    Ok(frame)
}

/// decode_reply parses the fixed 8-byte reply and returns the address it carries
///
/// ```text
/// +----+----+----+----+----+----+----+----+
/// | VN | CD | DSTPORT |      DSTIP        |
/// +----+----+----+----+----+----+----+----+
/// ```
pub fn decode_reply(reply: &[u8; REPLY_LEN]) -> Result<SocketAddrV4> {
    // VN is reserved in replies; proxies send 0x00 or echo 0x04
    let status = Socks4Status::from_byte(reply[1]);
    let port = port_from([reply[2], reply[3]]);
    let ip = Ipv4Addr::new(reply[4], reply[5], reply[6], reply[7]);

    match status {
        Socks4Status::Granted => Ok(SocketAddrV4::new(ip, port)),
        other => Err(ProxyError::Rejected(Rejection::Socks4(other))),
    }
}

// ========
// DRIVER
// ========

/// exchange sends one request frame and reads one reply
async fn exchange<S>(
    stream: &mut S,
    command: Command,
    dest: &TargetAddr,
    user_id: &str,
    allow_names: bool,
) -> Result<SocketAddrV4>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Encode before writing so invalid destinations never touch the wire
    let request = encode_request(command, dest, user_id, allow_names)?;
    write_frame(stream, &request).await?;

    read_reply(stream).await
}

/// read_reply reads and decodes one 8-byte reply
async fn read_reply<S>(stream: &mut S) -> Result<SocketAddrV4>
where
    S: AsyncRead + Unpin,
{
    let reply = read_frame::<_, REPLY_LEN>(stream).await?;
    decode_reply(&reply).inspect_err(|e| warn!("socks4 proxy refused: {}", e))
}

/// Socks4Client drives the SOCKS4 handshake; destinations must be IPv4 literals
#[derive(Debug, Clone, Default)]
pub struct Socks4Client {
    user_id: String,
}

impl Socks4Client {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

impl Handshake for Socks4Client {
    fn proxy_type(&self) -> ProxyType {
        ProxyType::Socks4
    }

    async fn connect<S>(&self, stream: &mut S, dest: &TargetAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let bound = exchange(stream, Command::Connect, dest, &self.user_id, false).await?;

        // DEBUG
        debug!("socks4 connect granted, proxy reports {}", bound);
        Ok(())
    }

    async fn bind<S>(&self, stream: &mut S, dest: &TargetAddr) -> Result<TargetAddr>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let bound = exchange(stream, Command::Bind, dest, &self.user_id, false).await?;
        Ok(TargetAddr::Ip(bound.into()))
    }

    async fn accept<S>(&self, stream: &mut S) -> Result<TargetAddr>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let peer = read_reply(stream).await?;
        Ok(TargetAddr::Ip(peer.into()))
    }
}

/// Socks4aClient drives the SOCKS4a handshake, letting the proxy resolve names
#[derive(Debug, Clone, Default)]
pub struct Socks4aClient {
    user_id: String,
}

impl Socks4aClient {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

impl Handshake for Socks4aClient {
    fn proxy_type(&self) -> ProxyType {
        ProxyType::Socks4a
    }

    async fn connect<S>(&self, stream: &mut S, dest: &TargetAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let bound = exchange(stream, Command::Connect, dest, &self.user_id, true).await?;

        // DEBUG
        debug!("socks4a connect granted, proxy reports {}", bound);
        Ok(())
    }

    async fn bind<S>(&self, stream: &mut S, dest: &TargetAddr) -> Result<TargetAddr>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let bound = exchange(stream, Command::Bind, dest, &self.user_id, true).await?;
        Ok(TargetAddr::Ip(bound.into()))
    }

    async fn accept<S>(&self, stream: &mut S) -> Result<TargetAddr>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let peer = read_reply(stream).await?;
        Ok(TargetAddr::Ip(peer.into()))
    }
}
