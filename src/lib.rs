//! Outbound TCP tunnels through an intermediary proxy
//!
//! ## Protocols
//!
//! - HTTP CONNECT, with optional Basic proxy authentication
//! - SOCKS4 (IPv4 literals only, names resolved locally)
//! - SOCKS4a (names resolved by the proxy)
//! - SOCKS5 (IPv4/IPv6/domain, optional username/password authentication)
//!     - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//!     - [Username/Password Authentication (RFC 1929)](https://datatracker.ietf.org/doc/html/rfc1929)
//!
//! A [`ProxyClient`] performs exactly one handshake and hands back the raw
//! tunneled stream. Timeouts, retries and TLS are left to the caller.
//!
//! # Example
//! ```no_run
//! use proxydial::{Credentials, ProxyType, factory};
//! use tokio::io::AsyncWriteExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let creds = Credentials::new("user", "secret");
//!     let mut client = factory::create(ProxyType::Socks5, "127.0.0.1", 1080, Some(creds))?;
//!     let mut tunnel = client.connect("example.com", 80).await?;
//!     tunnel.write_all(b"GET / HTTP/1.0\r\n\r\n").await?;
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod client;
pub mod error;
pub mod factory;
pub mod http;
pub mod protocol;
pub mod socks4;
pub mod socks5;
pub mod wire;

// Re-export main types at crate root for convenience
pub use address::TargetAddr;
pub use client::{Handshake, PendingBind, ProxyClient};
pub use error::{ProxyError, Rejection, Result};
pub use protocol::{ClientState, Credentials, ProxyEndpoint, ProxyType};
