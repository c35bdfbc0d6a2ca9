use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use proxydial::{Credentials, ProxyType, factory};
use std::time::Duration;
use tokio::io;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Open a TCP tunnel through a proxy and relay stdin/stdout", long_about = None)]
struct Args {
    /// Proxy protocol: http, socks4, socks4a, socks5
    #[arg(short = 't', long, default_value = "socks5")]
    proxy_type: String,

    /// Proxy address (host:port)
    #[arg(short = 'x', long, default_value = "127.0.0.1:1080")]
    proxy: String,

    /// Destination reached through the proxy (host:port)
    #[arg(short = 'd', long)]
    target: String,

    /// Username (SOCKS4/4a user id, SOCKS5 or HTTP user)
    #[arg(short, long)]
    username: Option<String>,

    /// Password for SOCKS5 or HTTP proxies
    #[arg(short, long)]
    password: Option<String>,

    /// Seconds allowed for dialing the proxy and completing the handshake
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber; stdout carries tunnel data so logs go to stderr
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let proxy_type: ProxyType = args.proxy_type.parse()?;
    let (proxy_host, proxy_port) = split_host_port(&args.proxy)?;
    let (target_host, target_port) = split_host_port(&args.target)?;

    // Check for auth and grab it if present
    let credentials = match (args.username, args.password) {
        (None, None) => None,
        (username, password) => Some(Credentials { username, password }),
    };

    // Instantiate client
    let mut client = factory::create(proxy_type, &proxy_host, proxy_port, credentials)?;

    // The handshake has no timers of its own, so bound it here
    let mut tunnel = tokio::time::timeout(
        Duration::from_secs(args.timeout),
        client.connect(&target_host, target_port),
    )
    .await
    .map_err(|_| anyhow!("[ERR] handshake timed out after {}s", args.timeout))??;

    // DEBUG
    info!("tunnel to {} via {} ready", args.target, args.proxy);

    // Relay between stdin/stdout and the tunnel
    let mut local = io::join(io::stdin(), io::stdout());
    let (sent, received) = io::copy_bidirectional(&mut local, &mut tunnel).await?;

    // DEBUG
    info!("tunnel closed. Sent: {}, Received: {}", sent, received);

    Ok(())
}

/// split_host_port splits `host:port`, accepting bracketed IPv6 hosts
fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .with_context(|| format!("[ERR] expected host:port, got '{addr}'"))?;

    let port: u16 = port
        .parse()
        .with_context(|| format!("[ERR] invalid port in '{addr}'"))?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        bail!("[ERR] missing host in '{addr}'");
    }

    Ok((host.to_string(), port))
}
