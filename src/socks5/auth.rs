use crate::error::{ProxyError, Rejection, Result};
use crate::protocol::Credentials;
use crate::socks5::protocol::{AuthMethod, USERPASS_VERSION, Version};
use crate::wire::{read_frame, write_frame};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// encode_greeting builds the ClientHello, offering user/pass only when
/// credentials exist
///
/// ```text
/// +----+----------+----------+
/// |VER | NMETHODS | METHODS  |
/// +----+----------+----------+
/// | 1  |    1     | 1 to 255 |
/// +----+----------+----------+
/// ```
pub fn encode_greeting(credentials: Option<&Credentials>) -> Vec<u8> {
    match credentials {
        Some(_) => vec![
            Version::SOCKS5 as u8,
            2,
            AuthMethod::NoAuth as u8,
            AuthMethod::UserPass as u8,
        ],
        None => vec![Version::SOCKS5 as u8, 1, AuthMethod::NoAuth as u8],
    }
}

/// decode_choice validates the ServerChoice reply against what was offered
///
/// ```text
/// +----+--------+
/// |VER | METHOD |
/// +----+--------+
/// | 1  |   1    |
/// +----+--------+
/// ```
pub fn decode_choice(reply: [u8; 2], offered_userpass: bool) -> Result<AuthMethod> {
    if reply[0] != Version::SOCKS5 as u8 {
        return Err(ProxyError::protocol(format!(
            "expected SOCKS5 method reply, got version {:#04x}",
            reply[0]
        )));
    }

    match AuthMethod::from_byte(reply[1]) {
        Some(AuthMethod::NoAcceptable) => Err(ProxyError::Rejected(Rejection::NoAcceptableMethod)),
        Some(AuthMethod::UserPass) if !offered_userpass => Err(ProxyError::protocol(
            "proxy selected username/password which was not offered",
        )),
        Some(method) => Ok(method),
        None => Err(ProxyError::protocol(format!(
            "proxy selected unoffered method {:#04x}",
            reply[1]
        ))),
    }
}

/// encode_userpass builds the RFC 1929 request
///
/// ```text
/// +----+------+----------+------+----------+
/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
/// +----+------+----------+------+----------+
/// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
/// +----+------+----------+------+----------+
/// ```
pub fn encode_userpass(credentials: &Credentials) -> Result<Vec<u8>> {
    let username = credentials.username().as_bytes();
    let password = credentials.password().as_bytes();

    let ulen = u8::try_from(username.len())
        .map_err(|_| ProxyError::config("socks5 username exceeds 255 bytes"))?;
    let plen = u8::try_from(password.len())
        .map_err(|_| ProxyError::config("socks5 password exceeds 255 bytes"))?;

    let mut frame = Vec::with_capacity(3 + username.len() + password.len());
    frame.push(USERPASS_VERSION);
    frame.push(ulen);
    frame.extend_from_slice(username);
    frame.push(plen);
    frame.extend_from_slice(password);
    Ok(frame)
}

/// decode_auth_status checks the RFC 1929 server response
///
/// ```text
/// +----+--------+
/// |VER | STATUS |
/// +----+--------+
/// | 1  |   1    |
/// +----+--------+
/// ```
pub fn decode_auth_status(reply: [u8; 2]) -> Result<()> {
    let [version, status] = reply;
    if version != USERPASS_VERSION {
        return Err(ProxyError::protocol(format!(
            "expected username/password reply version {USERPASS_VERSION:#04x}, got {version:#04x}"
        )));
    }

    match status {
        0x00 => Ok(()),
        failure => Err(ProxyError::Rejected(Rejection::AuthenticationFailed(failure))),
    }
}

/// negotiate_auth runs method selection and, when chosen, the
/// username/password sub-negotiation
pub async fn negotiate_auth<S>(stream: &mut S, credentials: Option<&Credentials>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Offer methods and read the server's choice
    write_frame(stream, &encode_greeting(credentials)).await?;
    let choice = read_frame::<_, 2>(stream).await?;
    let method = decode_choice(choice, credentials.is_some())?;

    // DEBUG
    debug!("socks5 proxy selected method {:?}", method);

    // Route to appropriate auth handler
    match (method, credentials) {
        (AuthMethod::UserPass, Some(creds)) => authenticate_userpass(stream, creds).await,
        _ => Ok(()),
    }
}

/// authenticate_userpass sends the credentials and checks the server verdict
async fn authenticate_userpass<S>(stream: &mut S, credentials: &Credentials) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_frame(stream, &encode_userpass(credentials)?).await?;
    decode_auth_status(read_frame::<_, 2>(stream).await?)
}
