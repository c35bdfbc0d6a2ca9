use crate::address::{TargetAddr, resolve_destination};
use crate::error::{ProxyError, Result};
use crate::http::HttpClient;
use crate::protocol::{ClientState, Credentials, ProxyEndpoint, ProxyType};
use crate::socks4::{Socks4Client, Socks4aClient};
use crate::socks5::Socks5Client;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Handshake is the interface every protocol implements: drive the proxy
/// over an already-open stream until the tunnel is up
pub trait Handshake {
    fn proxy_type(&self) -> ProxyType;

    /// supports_bind reports whether `bind`/`accept` can ever succeed
    fn supports_bind(&self) -> bool {
        true
    }

    /// connect asks the proxy to open a tunnel to `dest`
    fn connect<S>(
        &self,
        stream: &mut S,
        dest: &TargetAddr,
    ) -> impl Future<Output = Result<()>> + Send
    where
        S: AsyncRead + AsyncWrite + Unpin + Send;

    /// bind asks the proxy to listen for a connection from `dest` and returns
    /// the address the proxy listens on
    fn bind<S>(
        &self,
        stream: &mut S,
        dest: &TargetAddr,
    ) -> impl Future<Output = Result<TargetAddr>> + Send
    where
        S: AsyncRead + AsyncWrite + Unpin + Send;

    /// accept waits for the second bind reply and returns the peer address
    fn accept<S>(&self, stream: &mut S) -> impl Future<Output = Result<TargetAddr>> + Send
    where
        S: AsyncRead + AsyncWrite + Unpin + Send;
}

/// Connector is the closed set of handshake implementations
#[derive(Debug, Clone)]
pub enum Connector {
    Http(HttpClient),
    Socks4(Socks4Client),
    Socks4a(Socks4aClient),
    Socks5(Socks5Client),
}

/// Connector implementation block
impl Connector {
    /// for_type picks the handshake for `proxy_type`
    pub fn for_type(proxy_type: ProxyType, credentials: Option<Credentials>) -> Result<Self> {
        let user_id = credentials
            .as_ref()
            .map(|c| c.username().to_string())
            .unwrap_or_default();

        match proxy_type {
            ProxyType::None => Err(ProxyError::config("proxy type must not be None")),
            ProxyType::Http => Ok(Connector::Http(HttpClient::new(credentials))),
            ProxyType::Socks4 => Ok(Connector::Socks4(Socks4Client::new(user_id))),
            ProxyType::Socks4a => Ok(Connector::Socks4a(Socks4aClient::new(user_id))),
            ProxyType::Socks5 => Ok(Connector::Socks5(Socks5Client::new(credentials))),
        }
    }
}

impl Handshake for Connector {
    fn proxy_type(&self) -> ProxyType {
        match self {
            Connector::Http(h) => h.proxy_type(),
            Connector::Socks4(h) => h.proxy_type(),
            Connector::Socks4a(h) => h.proxy_type(),
            Connector::Socks5(h) => h.proxy_type(),
        }
    }

    fn supports_bind(&self) -> bool {
        match self {
            Connector::Http(h) => h.supports_bind(),
            Connector::Socks4(h) => h.supports_bind(),
            Connector::Socks4a(h) => h.supports_bind(),
            Connector::Socks5(h) => h.supports_bind(),
        }
    }

    async fn connect<S>(&self, stream: &mut S, dest: &TargetAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        match self {
            Connector::Http(h) => h.connect(stream, dest).await,
            Connector::Socks4(h) => h.connect(stream, dest).await,
            Connector::Socks4a(h) => h.connect(stream, dest).await,
            Connector::Socks5(h) => h.connect(stream, dest).await,
        }
    }

    async fn bind<S>(&self, stream: &mut S, dest: &TargetAddr) -> Result<TargetAddr>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        match self {
            Connector::Http(h) => h.bind(stream, dest).await,
            Connector::Socks4(h) => h.bind(stream, dest).await,
            Connector::Socks4a(h) => h.bind(stream, dest).await,
            Connector::Socks5(h) => h.bind(stream, dest).await,
        }
    }

    async fn accept<S>(&self, stream: &mut S) -> Result<TargetAddr>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        match self {
            Connector::Http(h) => h.accept(stream).await,
            Connector::Socks4(h) => h.accept(stream).await,
            Connector::Socks4a(h) => h.accept(stream).await,
            Connector::Socks5(h) => h.accept(stream).await,
        }
    }
}

/// ProxyClient owns the proxy endpoint, credentials, protocol and, once
/// attached or dialed, the transport to the proxy.
///
/// A client performs one handshake. On success the tunneled stream is handed
/// to the caller. On failure a stream the client dialed itself is dropped,
/// while an attached stream stays inside the client for [`ProxyClient::take_transport`].
#[derive(Debug)]
pub struct ProxyClient<S = TcpStream> {
    endpoint: Option<ProxyEndpoint>,
    connector: Connector,
    transport: Option<S>,
    state: ClientState,
}

/// ProxyClient implementation block
impl<S> ProxyClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub(crate) fn new(endpoint: Option<ProxyEndpoint>, connector: Connector) -> Self {
        Self {
            endpoint,
            connector,
            transport: None,
            state: ClientState::Idle,
        }
    }

    pub fn proxy_type(&self) -> ProxyType {
        self.connector.proxy_type()
    }

    pub fn endpoint(&self) -> Option<&ProxyEndpoint> {
        self.endpoint.as_ref()
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// has_transport reports whether a caller-supplied stream is attached
    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// attach hands the client an already-open stream to the proxy. The next
    /// handshake runs over it instead of dialing, and the client never closes it.
    /// Attaching re-arms a finished client for a new handshake
    pub fn attach(&mut self, transport: S) -> Result<()> {
        if self.state == ClientState::Connecting {
            return Err(ProxyError::config("cannot attach during a handshake"));
        }
        self.transport = Some(transport);
        self.state = ClientState::Idle;
        Ok(())
    }

    /// take_transport gives back an attached stream that no handshake consumed
    pub fn take_transport(&mut self) -> Option<S> {
        self.transport.take()
    }

    /// connect_attached runs the handshake over the attached stream and
    /// returns it tunneled to `host:port`
    pub async fn connect_attached(&mut self, host: &str, port: u16) -> Result<S> {
        let dest = self.prepare(host, port).await?;
        let stream = self
            .transport
            .take()
            .ok_or_else(|| ProxyError::config("no transport attached"))?;
        self.run_connect(stream, true, &dest).await
    }

    /// bind_attached runs a bind handshake over the attached stream
    pub async fn bind_attached(&mut self, host: &str, port: u16) -> Result<PendingBind<S>> {
        self.ensure_bind()?;
        let dest = self.prepare(host, port).await?;
        let stream = self
            .transport
            .take()
            .ok_or_else(|| ProxyError::config("no transport attached"))?;
        self.run_bind(stream, true, &dest).await
    }

    /// prepare checks lifecycle and turns host/port into a protocol-ready destination
    async fn prepare(&mut self, host: &str, port: u16) -> Result<TargetAddr> {
        if self.state != ClientState::Idle {
            return Err(ProxyError::config(format!(
                "client is {:?}; attach a transport or build a new client",
                self.state
            )));
        }

        let target = TargetAddr::new(host, port)?;
        match resolve_destination(self.proxy_type(), &target).await {
            Ok(dest) => Ok(dest),
            Err(e) => {
                self.state = ClientState::Failed;
                Err(e)
            }
        }
    }

    fn ensure_bind(&self) -> Result<()> {
        if self.connector.supports_bind() {
            Ok(())
        } else {
            Err(ProxyError::config(format!(
                "{} proxies do not support bind",
                self.proxy_type()
            )))
        }
    }

    async fn run_connect(&mut self, mut stream: S, attached: bool, dest: &TargetAddr) -> Result<S> {
        self.state = ClientState::Connecting;

        // DEBUG
        debug!("{} handshake to {} started", self.proxy_type(), dest);

        match self.connector.connect(&mut stream, dest).await {
            Ok(()) => {
                self.state = ClientState::Connected;
                info!("{} tunnel to {} established", self.proxy_type(), dest);
                Ok(stream)
            }
            Err(e) => {
                self.fail(stream, attached, &e);
                Err(e)
            }
        }
    }

    async fn run_bind(
        &mut self,
        mut stream: S,
        attached: bool,
        dest: &TargetAddr,
    ) -> Result<PendingBind<S>> {
        self.state = ClientState::Connecting;

        match self.connector.bind(&mut stream, dest).await {
            Ok(bound) => {
                let bound = self.reachable(bound);
                self.state = ClientState::Connected;
                info!("{} proxy listening on {} for {}", self.proxy_type(), bound, dest);
                Ok(PendingBind {
                    stream,
                    bound,
                    connector: self.connector.clone(),
                })
            }
            Err(e) => {
                self.fail(stream, attached, &e);
                Err(e)
            }
        }
    }

    /// reachable replaces an unspecified bound address (`0.0.0.0`, `::`) with
    /// the proxy host, which is where the peer has to connect. Without a known
    /// endpoint the address is returned as the proxy sent it
    fn reachable(&self, bound: TargetAddr) -> TargetAddr {
        let port = bound.port();
        let unspecified = matches!(&bound, TargetAddr::Ip(addr) if addr.ip().is_unspecified());

        match self.endpoint.as_ref() {
            Some(endpoint) if unspecified => {
                TargetAddr::new(endpoint.host(), port).unwrap_or(bound)
            }
            _ => bound,
        }
    }

    /// fail records the failure and releases the stream: dialed streams are
    /// dropped, attached ones go back into the client
    fn fail(&mut self, stream: S, attached: bool, err: &ProxyError) {
        self.state = ClientState::Failed;
        warn!("{} handshake failed: {}", self.proxy_type(), err);

        if attached {
            self.transport = Some(stream);
        }
    }
}

impl ProxyClient<TcpStream> {
    /// connect tunnels to `host:port`, dialing the proxy unless a transport
    /// is attached. Resolution and validation happen before dialing
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<TcpStream> {
        if self.transport.is_some() {
            return self.connect_attached(host, port).await;
        }

        let dest = self.prepare(host, port).await?;
        let stream = self.dial().await?;
        self.run_connect(stream, false, &dest).await
    }

    /// bind asks the proxy to accept one inbound connection from `host:port`
    pub async fn bind(&mut self, host: &str, port: u16) -> Result<PendingBind<TcpStream>> {
        if self.transport.is_some() {
            return self.bind_attached(host, port).await;
        }

        self.ensure_bind()?;
        let dest = self.prepare(host, port).await?;
        let stream = self.dial().await?;
        self.run_bind(stream, false, &dest).await
    }

    async fn dial(&mut self) -> Result<TcpStream> {
        let Some(endpoint) = self.endpoint.as_ref() else {
            return Err(ProxyError::config("no proxy endpoint and no attached transport"));
        };

        // DEBUG
        debug!("dialing {} proxy at {}", self.proxy_type(), endpoint);

        match TcpStream::connect(endpoint.dial_addr()).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                self.state = ClientState::Failed;
                Err(e.into())
            }
        }
    }
}

/// PendingBind is a proxy that has accepted a BIND request and is waiting
/// for the remote peer to connect
#[derive(Debug)]
pub struct PendingBind<S> {
    stream: S,
    bound: TargetAddr,
    connector: Connector,
}

/// PendingBind implementation block
impl<S> PendingBind<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// bound_addr is where the proxy listens for the peer. A proxy that
    /// reports an unspecified address is taken to listen on its own host;
    /// over an attached transport with no endpoint the unspecified
    /// address is kept
    pub fn bound_addr(&self) -> &TargetAddr {
        &self.bound
    }

    /// accept waits for the proxy's second reply and returns the peer address.
    /// After it succeeds the stream carries the peer's data
    pub async fn accept(&mut self) -> Result<TargetAddr> {
        self.connector.accept(&mut self.stream).await
    }

    /// into_inner returns the stream to the proxy
    pub fn into_inner(self) -> S {
        self.stream
    }
}
