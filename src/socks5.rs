//! SOCKS5 client handshake
//!
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//! - [Username/Password Authentication (RFC 1929)](https://datatracker.ietf.org/doc/html/rfc1929)
//!
//! The handshake runs in three phases: method negotiation, optional
//! username/password authentication, then the CONNECT or BIND request.

pub mod auth;
pub mod commands;
pub mod protocol;

use crate::address::TargetAddr;
use crate::client::Handshake;
use crate::error::Result;
use crate::protocol::{Credentials, ProxyType};
use crate::wire::write_frame;
use self::protocol::Command;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Socks5Client drives the SOCKS5 handshake
#[derive(Debug, Clone, Default)]
pub struct Socks5Client {
    credentials: Option<Credentials>,
}

/// Socks5Client implementation block
impl Socks5Client {
    /// new builds a client; anonymous credentials are treated as none
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self {
            credentials: credentials.filter(|c| !c.is_anonymous()),
        }
    }

    /// request negotiates auth then sends `command` and reads the first reply
    async fn request<S>(
        &self,
        stream: &mut S,
        command: Command,
        dest: &TargetAddr,
    ) -> Result<TargetAddr>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // Encode first so an unencodable destination never reaches the wire
        let request = commands::encode_request(command, dest)?;

        auth::negotiate_auth(stream, self.credentials.as_ref()).await?;

        write_frame(stream, &request).await?;
        commands::read_reply(stream).await
    }
}

impl Handshake for Socks5Client {
    fn proxy_type(&self) -> ProxyType {
        ProxyType::Socks5
    }

    async fn connect<S>(&self, stream: &mut S, dest: &TargetAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let bound = self.request(stream, Command::Connect, dest).await?;

        // DEBUG
        debug!("socks5 connect succeeded, proxy bound {}", bound);
        Ok(())
    }

    async fn bind<S>(&self, stream: &mut S, dest: &TargetAddr) -> Result<TargetAddr>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.request(stream, Command::Bind, dest).await
    }

    async fn accept<S>(&self, stream: &mut S) -> Result<TargetAddr>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        commands::read_reply(stream).await
    }
}
