//! Stateless construction of proxy clients
//!
//! Nothing here touches the network; all checks are on the arguments.

use crate::client::{Connector, ProxyClient};
use crate::error::{ProxyError, Result};
use crate::protocol::{Credentials, ProxyEndpoint, ProxyType};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// create builds a client that dials `host:port` itself
pub fn create(
    proxy_type: ProxyType,
    host: &str,
    port: u16,
    credentials: Option<Credentials>,
) -> Result<ProxyClient<TcpStream>> {
    let connector = connector(proxy_type, credentials)?;
    let endpoint = ProxyEndpoint::new(host, port)?;

    // DEBUG
    debug!("created {} client for {}", proxy_type, endpoint);

    Ok(ProxyClient::new(Some(endpoint), connector))
}

/// create_with_transport builds a client over a stream the caller already
/// opened to the proxy. The endpoint is optional and only used for reporting.
/// The transport must be open; the client never closes it
pub fn create_with_transport<S>(
    proxy_type: ProxyType,
    transport: S,
    endpoint: Option<ProxyEndpoint>,
    credentials: Option<Credentials>,
) -> Result<ProxyClient<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let connector = connector(proxy_type, credentials)?;

    let mut client = ProxyClient::new(endpoint, connector);
    client.attach(transport)?;
    Ok(client)
}

/// connector validates the type and credential shape, then picks the handshake
fn connector(proxy_type: ProxyType, credentials: Option<Credentials>) -> Result<Connector> {
    // None is rejected before anything else is looked at
    if proxy_type == ProxyType::None {
        return Err(ProxyError::config("proxy type must not be None"));
    }

    if let Some(creds) = &credentials {
        creds.validate_for(proxy_type)?;
    }

    Connector::for_type(proxy_type, credentials)
}
