use crate::address::{MAX_DOMAIN_LEN, TargetAddr};
use crate::error::{ProxyError, Rejection, Result};
use crate::socks5::protocol::{AddressType, Command, RSV, ReplyCode, Version};
use crate::wire::{port_bytes, port_from, read_frame, read_vec};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::AsyncRead;
use tracing::warn;

/// encode_request builds a SOCKS5 request frame
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
pub fn encode_request(command: Command, dest: &TargetAddr) -> Result<Vec<u8>> {
    let mut frame = vec![Version::SOCKS5 as u8, command as u8, RSV];

    match dest {
        TargetAddr::Ip(SocketAddr::V4(addr)) => {
            frame.push(AddressType::IPv4 as u8);
            frame.extend_from_slice(&addr.ip().octets());
        }
        TargetAddr::Ip(SocketAddr::V6(addr)) => {
            frame.push(AddressType::IPv6 as u8);
            frame.extend_from_slice(&addr.ip().octets());
        }
        TargetAddr::Domain(name, _) => {
            // First octet in DomainName contains the number of octets to follow
            let len = u8::try_from(name.len()).map_err(|_| {
                ProxyError::resolution(
                    name.clone(),
                    format!("domain name is {} bytes, max {MAX_DOMAIN_LEN}", name.len()),
                )
            })?;
            frame.push(AddressType::DomainName as u8);
            frame.push(len);
            frame.extend_from_slice(name.as_bytes());
        }
    }

    frame.extend_from_slice(&port_bytes(dest.port()));
    Ok(frame)
}

/// read_reply reads one complete SOCKS5 reply and returns the bound address.
/// The whole frame is consumed before the status is acted on
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
pub async fn read_reply<S>(stream: &mut S) -> Result<TargetAddr>
where
    S: AsyncRead + Unpin,
{
    let [version, rep, _rsv, atyp] = read_frame::<_, 4>(stream).await?;

    if version != Version::SOCKS5 as u8 {
        return Err(ProxyError::protocol(format!(
            "expected SOCKS5 reply, got version {version:#04x}"
        )));
    }

    let bound = read_bound_address(stream, atyp).await?;

    match ReplyCode::from_byte(rep) {
        ReplyCode::Succeeded => Ok(bound),
        code => {
            warn!("socks5 proxy refused: {}", code);
            Err(ProxyError::Rejected(Rejection::Socks5(code)))
        }
    }
}

/// read_bound_address reads BND.ADDR and BND.PORT for the given address type
async fn read_bound_address<S>(stream: &mut S, atyp: u8) -> Result<TargetAddr>
where
    S: AsyncRead + Unpin,
{
    match AddressType::from_byte(atyp) {
        Some(AddressType::IPv4) => {
            let addr = read_frame::<_, 4>(stream).await?;
            let port = port_from(read_frame::<_, 2>(stream).await?);
            Ok(TargetAddr::Ip(SocketAddr::new(Ipv4Addr::from(addr).into(), port)))
        }
        Some(AddressType::IPv6) => {
            let addr = read_frame::<_, 16>(stream).await?;
            let port = port_from(read_frame::<_, 2>(stream).await?);
            Ok(TargetAddr::Ip(SocketAddr::new(Ipv6Addr::from(addr).into(), port)))
        }
        Some(AddressType::DomainName) => {
            let [len] = read_frame::<_, 1>(stream).await?;
            let domain = read_vec(stream, len as usize).await?;
            let port = port_from(read_frame::<_, 2>(stream).await?);
            let name = String::from_utf8(domain)
                .map_err(|_| ProxyError::protocol("bound domain name is not UTF-8"))?;
            Ok(TargetAddr::Domain(name, port))
        }
        None => Err(ProxyError::protocol(format!(
            "unknown address type {atyp:#04x} in reply"
        ))),
    }
}
