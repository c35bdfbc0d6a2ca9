//! Byte-level helpers shared by every handshake

use crate::error::Result;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// read_frame reads exactly `N` bytes. A stream that ends early surfaces
/// as a transport failure (`UnexpectedEof`), never as a partial frame
pub async fn read_frame<S, const N: usize>(stream: &mut S) -> Result<[u8; N]>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; N];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

/// read_vec reads exactly `len` bytes into a fresh buffer
pub async fn read_vec<S>(stream: &mut S, len: usize) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

/// write_frame writes the whole frame and flushes it
pub async fn write_frame<S>(stream: &mut S, frame: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(frame).await?;
    stream.flush().await?;
    Ok(())
}

/// port_bytes encodes a port in network order
pub fn port_bytes(port: u16) -> [u8; 2] {
    port.to_be_bytes()
}

/// port_from encodes network-order bytes back into a port
pub fn port_from(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}
