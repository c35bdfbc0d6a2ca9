//! HTTP CONNECT tunnel handshake

use crate::address::{TargetAddr, check_name};
use crate::client::Handshake;
use crate::error::{ProxyError, Rejection, Result};
use crate::protocol::{Credentials, ProxyType};
use crate::wire::write_frame;
use base64::{Engine, engine::general_purpose::STANDARD};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, warn};

/// Upper bound on the response head we are willing to buffer
pub const MAX_HEAD_LEN: usize = 8 * 1024;

/// StatusLine is a parsed `HTTP/1.x CODE reason` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: String,
    pub status: u16,
    pub raw: String,
}

/// StatusLine implementation block
impl StatusLine {
    /// parse splits the raw line; anything but `HTTP/x.y NNN ...` is malformed
    pub fn parse(line: &str) -> Result<Self> {
        let raw = line.trim_end_matches(['\r', '\n']).to_string();
        let mut parts = raw.splitn(3, ' ');

        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/") {
            return Err(ProxyError::protocol(format!("malformed status line: {raw:?}")));
        }

        let status = parts
            .next()
            .filter(|code| code.len() == 3)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| ProxyError::protocol(format!("malformed status line: {raw:?}")))?;

        Ok(Self {
            version: version.to_string(),
            status,
            raw,
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// encode_connect builds the CONNECT request head.
/// The authority goes out verbatim, so names that could break the request
/// line are refused
pub fn encode_connect(dest: &TargetAddr, credentials: Option<&Credentials>) -> Result<Vec<u8>> {
    if let TargetAddr::Domain(name, _) = dest {
        check_name(name).map_err(|reason| ProxyError::resolution(name.clone(), reason))?;
    }

    let authority = dest.to_string();
    let mut head = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");

    if let Some(creds) = credentials {
        let token = STANDARD.encode(format!("{}:{}", creds.username(), creds.password()));
        head.push_str(&format!("Proxy-Authorization: Basic {token}\r\n"));
    }

    head.push_str("\r\n");
    Ok(head.into_bytes())
}

/// read_line reads one CRLF-terminated line a byte at a time so nothing past
/// the response head is consumed. `budget` is decremented by the bytes read
async fn read_line<S>(stream: &mut S, budget: &mut usize) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        if *budget == 0 {
            return Err(ProxyError::protocol(format!(
                "response head exceeds {MAX_HEAD_LEN} bytes"
            )));
        }

        let byte = match stream.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(ProxyError::Transport(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before response head completed",
                )));
            }
            Err(e) => return Err(e.into()),
        };
        *budget -= 1;

        if byte == b'\n' {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Ok(String::from_utf8_lossy(&line).into_owned());
        }
        line.push(byte);
    }
}

/// HttpClient drives the HTTP CONNECT handshake
#[derive(Debug, Clone, Default)]
pub struct HttpClient {
    credentials: Option<Credentials>,
}

/// HttpClient implementation block
impl HttpClient {
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self {
            credentials: credentials.filter(|c| !c.is_anonymous()),
        }
    }
}

impl Handshake for HttpClient {
    fn proxy_type(&self) -> ProxyType {
        ProxyType::Http
    }

    fn supports_bind(&self) -> bool {
        false
    }

    async fn connect<S>(&self, stream: &mut S, dest: &TargetAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let request = encode_connect(dest, self.credentials.as_ref())?;
        write_frame(stream, &request).await?;

        let mut budget = MAX_HEAD_LEN;
        let status = StatusLine::parse(&read_line(stream, &mut budget).await?)?;

        if !status.is_success() {
            warn!("http proxy refused: {}", status.raw);
            return Err(ProxyError::Rejected(Rejection::Http {
                status: status.status,
                status_line: status.raw,
            }));
        }

        // Drain headers up to the blank line; the tunnel starts right after
        loop {
            let header = read_line(stream, &mut budget).await?;
            if header.is_empty() {
                break;
            }
            debug!("http proxy header: {}", header);
        }

        // DEBUG
        debug!("http tunnel established: {}", status.raw);
        Ok(())
    }

    async fn bind<S>(&self, _stream: &mut S, _dest: &TargetAddr) -> Result<TargetAddr>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        Err(ProxyError::config("http proxies do not support bind"))
    }

    async fn accept<S>(&self, _stream: &mut S) -> Result<TargetAddr>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        Err(ProxyError::config("http proxies do not support bind"))
    }
}
