//! End-to-end handshakes against fabricated proxies
//!
//! Each test binds a listener on 127.0.0.1:0 that plays one proxy protocol,
//! then drives a client built by the factory against it.

use proxydial::socks4::Socks4Status;
use proxydial::socks5::protocol::ReplyCode;
use proxydial::{ClientState, Credentials, ProxyError, ProxyType, Rejection, factory};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// spawn_proxy runs `script` against the first accepted connection
async fn spawn_proxy<F, Fut, T>(script: F) -> (SocketAddr, JoinHandle<T>)
where
    F: FnOnce(TcpStream) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        script(stream).await
    });

    (addr, handle)
}

/// echo_one reads four bytes of tunnel data and writes them back
async fn echo_one(stream: &mut TcpStream) {
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await.unwrap();
    stream.write_all(&buf).await.unwrap();
}

async fn assert_tunnel_usable(tunnel: &mut TcpStream) {
    tunnel.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    tunnel.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");
}

#[tokio::test]
async fn http_connect_success() {
    let (addr, proxy) = spawn_proxy(|mut stream| async move {
        let mut head = Vec::new();
        while !head.ends_with(b"\r\n\r\n") {
            head.push(stream.read_u8().await.unwrap());
        }
        stream
            .write_all(b"HTTP/1.1 200 Connection established\r\nProxy-Agent: test\r\n\r\n")
            .await
            .unwrap();
        echo_one(&mut stream).await;
        String::from_utf8(head).unwrap()
    })
    .await;

    let creds = Credentials::new("user", "pass");
    let mut client = factory::create(ProxyType::Http, "127.0.0.1", addr.port(), Some(creds)).unwrap();
    let mut tunnel = client.connect("example.com", 443).await.unwrap();
    assert_eq!(client.state(), ClientState::Connected);
    assert_tunnel_usable(&mut tunnel).await;

    let head = proxy.await.unwrap();
    assert!(head.starts_with("CONNECT example.com:443 HTTP/1.1\r\n"));
    assert!(head.contains("Proxy-Authorization: Basic dXNlcjpwYXNz\r\n"));
}

#[tokio::test]
async fn http_407_is_rejection_and_closes_dialed_stream() {
    let (addr, proxy) = spawn_proxy(|mut stream| async move {
        let mut head = Vec::new();
        while !head.ends_with(b"\r\n\r\n") {
            head.push(stream.read_u8().await.unwrap());
        }
        stream
            .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
            .await
            .unwrap();

        // The client drops the stream it dialed, so this read sees EOF
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        rest
    })
    .await;

    let mut client = factory::create(ProxyType::Http, "127.0.0.1", addr.port(), None).unwrap();
    let err = client.connect("example.com", 80).await.unwrap_err();

    assert!(err.is_rejection());
    assert!(matches!(
        err.rejection(),
        Some(Rejection::Http { status: 407, .. })
    ));
    assert_eq!(client.state(), ClientState::Failed);
    assert!(proxy.await.unwrap().is_empty());
}

#[tokio::test]
async fn socks4_connect_success() {
    let (addr, proxy) = spawn_proxy(|mut stream| async move {
        let mut request = [0u8; 8 + 6];
        stream.read_exact(&mut request).await.unwrap();
        stream
            .write_all(&[0x00, 0x5a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
            .await
            .unwrap();
        echo_one(&mut stream).await;
        request
    })
    .await;

    let creds = Credentials::user_id("alice");
    let mut client =
        factory::create(ProxyType::Socks4, "127.0.0.1", addr.port(), Some(creds)).unwrap();
    let mut tunnel = client.connect("93.184.216.34", 80).await.unwrap();
    assert_tunnel_usable(&mut tunnel).await;

    let request = proxy.await.unwrap();
    assert_eq!(
        request,
        [0x04, 0x01, 0x00, 0x50, 93, 184, 216, 34, b'a', b'l', b'i', b'c', b'e', 0x00]
    );
}

#[tokio::test]
async fn socks4_status_codes_surface_as_rejections() {
    for (code, expected) in [
        (0x5b, Socks4Status::Rejected),
        (0x5c, Socks4Status::IdentdUnreachable),
        (0x5d, Socks4Status::IdentdMismatch),
    ] {
        let (addr, _proxy) = spawn_proxy(move |mut stream| async move {
            let mut request = [0u8; 9];
            stream.read_exact(&mut request).await.unwrap();
            stream
                .write_all(&[0x00, code, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
                .await
                .unwrap();
        })
        .await;

        let mut client = factory::create(ProxyType::Socks4, "127.0.0.1", addr.port(), None).unwrap();
        let err = client.connect("10.0.0.1", 80).await.unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::Socks4(expected)));
    }
}

#[tokio::test]
async fn socks4_truncated_reply_is_transport_failure() {
    let (addr, _proxy) = spawn_proxy(|mut stream| async move {
        let mut request = [0u8; 9];
        stream.read_exact(&mut request).await.unwrap();
        stream.write_all(&[0x00, 0x5a, 0x00]).await.unwrap();
        // Dropping the stream closes it mid-reply
    })
    .await;

    let mut client = factory::create(ProxyType::Socks4, "127.0.0.1", addr.port(), None).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), client.connect("10.0.0.1", 80))
        .await
        .expect("handshake must not hang on a truncated reply");

    let err = result.unwrap_err();
    assert!(matches!(err, ProxyError::Transport(_)));
    assert!(!err.is_rejection());
}

#[tokio::test]
async fn socks4_unresolvable_name_never_dials() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut client = factory::create(ProxyType::Socks4, "127.0.0.1", port, None).unwrap();
    let err = client.connect("no-such-host.invalid", 80).await.unwrap_err();
    assert!(matches!(err, ProxyError::Resolution { .. }));

    let accepted = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(accepted.is_err(), "proxy must not see a connection");
}

#[tokio::test]
async fn socks4a_sends_sentinel_and_name() {
    let (addr, proxy) = spawn_proxy(|mut stream| async move {
        let mut request = vec![0u8; 8 + 1 + "example.org".len() + 1];
        stream.read_exact(&mut request).await.unwrap();
        stream
            .write_all(&[0x00, 0x5a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
            .await
            .unwrap();
        echo_one(&mut stream).await;
        request
    })
    .await;

    let mut client = factory::create(ProxyType::Socks4a, "127.0.0.1", addr.port(), None).unwrap();
    let mut tunnel = client.connect("example.org", 8080).await.unwrap();
    assert_tunnel_usable(&mut tunnel).await;

    let request = proxy.await.unwrap();
    let mut expected = vec![0x04, 0x01, 0x1f, 0x90, 0, 0, 0, 1, 0x00];
    expected.extend_from_slice(b"example.org\0");
    assert_eq!(request, expected);
}

#[tokio::test]
async fn socks5_connect_success_with_auth() {
    let (addr, proxy) = spawn_proxy(|mut stream| async move {
        let mut greeting = [0u8; 4];
        stream.read_exact(&mut greeting).await.unwrap();
        stream.write_all(&[0x05, 0x02]).await.unwrap();

        let mut auth = [0u8; 2 + 3 + 1 + 3];
        stream.read_exact(&mut auth).await.unwrap();
        stream.write_all(&[0x01, 0x00]).await.unwrap();

        let mut request = [0u8; 4 + 1 + 11 + 2];
        stream.read_exact(&mut request).await.unwrap();
        stream
            .write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0x04, 0x38])
            .await
            .unwrap();
        echo_one(&mut stream).await;
        (greeting, auth, request)
    })
    .await;

    let creds = Credentials::new("bob", "pwd");
    let mut client =
        factory::create(ProxyType::Socks5, "127.0.0.1", addr.port(), Some(creds)).unwrap();
    let mut tunnel = client.connect("example.com", 443).await.unwrap();
    assert_tunnel_usable(&mut tunnel).await;

    let (greeting, auth, request) = proxy.await.unwrap();
    assert_eq!(greeting, [0x05, 0x02, 0x00, 0x02]);
    assert_eq!(auth, *b"\x01\x03bob\x03pwd");
    assert_eq!(&request[..5], &[0x05, 0x01, 0x00, 0x03, 11]);
    assert_eq!(&request[5..16], b"example.com");
    assert_eq!(&request[16..], &[0x01, 0xbb]);
}

#[tokio::test]
async fn socks5_network_unreachable() {
    let (addr, _proxy) = spawn_proxy(|mut stream| async move {
        let mut greeting = [0u8; 3];
        stream.read_exact(&mut greeting).await.unwrap();
        stream.write_all(&[0x05, 0x00]).await.unwrap();

        let mut request = [0u8; 10];
        stream.read_exact(&mut request).await.unwrap();
        stream
            .write_all(&[0x05, 0x03, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();
    })
    .await;

    let mut client = factory::create(ProxyType::Socks5, "127.0.0.1", addr.port(), None).unwrap();
    let err = client.connect("192.0.2.1", 80).await.unwrap_err();

    let Some(Rejection::Socks5(code)) = err.rejection() else {
        panic!("expected socks5 rejection, got {err:?}");
    };
    assert_eq!(*code, ReplyCode::NetworkUnreachable);
    assert_eq!(code.reason(), "network unreachable");
}

#[tokio::test]
async fn socks5_no_acceptable_method() {
    let (addr, _proxy) = spawn_proxy(|mut stream| async move {
        let mut greeting = [0u8; 3];
        stream.read_exact(&mut greeting).await.unwrap();
        stream.write_all(&[0x05, 0xff]).await.unwrap();
    })
    .await;

    let mut client = factory::create(ProxyType::Socks5, "127.0.0.1", addr.port(), None).unwrap();
    let err = client.connect("192.0.2.1", 80).await.unwrap_err();
    assert_eq!(err.rejection(), Some(&Rejection::NoAcceptableMethod));
}

#[tokio::test]
async fn attached_transport_survives_failure() {
    let (addr, _proxy) = spawn_proxy(|mut stream| async move {
        let mut greeting = [0u8; 3];
        stream.read_exact(&mut greeting).await.unwrap();
        stream.write_all(&[0x05, 0xff]).await.unwrap();

        // Second attempt over the same connection
        let mut greeting = [0u8; 3];
        stream.read_exact(&mut greeting).await.unwrap();
        stream.write_all(&[0x05, 0x00]).await.unwrap();
        let mut request = [0u8; 10];
        stream.read_exact(&mut request).await.unwrap();
        stream
            .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();
        echo_one(&mut stream).await;
    })
    .await;

    let transport = TcpStream::connect(addr).await.unwrap();
    let mut client =
        factory::create_with_transport(ProxyType::Socks5, transport, None, None).unwrap();

    let err = client.connect("192.0.2.1", 80).await.unwrap_err();
    assert!(err.is_rejection());
    assert_eq!(client.state(), ClientState::Failed);

    // The caller still owns the connection and can retry over it
    let transport = client.take_transport().expect("attached transport is kept");
    client.attach(transport).unwrap();
    let mut tunnel = client.connect("192.0.2.1", 80).await.unwrap();
    assert_tunnel_usable(&mut tunnel).await;
}

#[tokio::test]
async fn socks5_bind_two_replies() {
    let (addr, _proxy) = spawn_proxy(|mut stream| async move {
        let mut greeting = [0u8; 3];
        stream.read_exact(&mut greeting).await.unwrap();
        stream.write_all(&[0x05, 0x00]).await.unwrap();

        let mut request = [0u8; 10];
        stream.read_exact(&mut request).await.unwrap();
        assert_eq!(request[1], 0x02);

        // Listening address, then the peer that connected
        stream
            .write_all(&[0x05, 0x00, 0x00, 0x01, 203, 0, 113, 9, 0x13, 0x88])
            .await
            .unwrap();
        stream
            .write_all(&[0x05, 0x00, 0x00, 0x01, 198, 51, 100, 2, 0x00, 0x15])
            .await
            .unwrap();
        echo_one(&mut stream).await;
    })
    .await;

    let mut client = factory::create(ProxyType::Socks5, "127.0.0.1", addr.port(), None).unwrap();
    let mut pending = client.bind("198.51.100.2", 21).await.unwrap();
    assert_eq!(pending.bound_addr().to_string(), "203.0.113.9:5000");

    let peer = pending.accept().await.unwrap();
    assert_eq!(peer.to_string(), "198.51.100.2:21");

    let mut stream = pending.into_inner();
    assert_tunnel_usable(&mut stream).await;
}

#[tokio::test]
async fn http_bind_is_config_error_without_dialing() {
    let mut client = factory::create(ProxyType::Http, "127.0.0.1", 9, None).unwrap();
    let err = client.bind("192.0.2.1", 21).await.unwrap_err();
    assert!(err.is_config());
    assert_eq!(client.state(), ClientState::Idle);
}

#[tokio::test]
async fn client_is_single_use() {
    let (addr, _proxy) = spawn_proxy(|mut stream| async move {
        let mut request = [0u8; 9];
        stream.read_exact(&mut request).await.unwrap();
        stream
            .write_all(&[0x00, 0x5a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
            .await
            .unwrap();
    })
    .await;

    let mut client = factory::create(ProxyType::Socks4, "127.0.0.1", addr.port(), None).unwrap();
    let _tunnel = client.connect("10.0.0.1", 80).await.unwrap();

    let err = client.connect("10.0.0.2", 80).await.unwrap_err();
    assert!(err.is_config());
}

#[tokio::test]
async fn http_target_with_crlf_never_dials() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut client = factory::create(ProxyType::Http, "127.0.0.1", port, None).unwrap();
    let err = client
        .connect("evil.com:80 HTTP/1.1\r\nX-Injected: yes\r\nFoo: a", 443)
        .await
        .unwrap_err();
    assert!(err.is_config());

    let accepted = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(accepted.is_err(), "proxy must not see a connection");
}

#[tokio::test]
async fn socks5_auth_reply_with_wrong_version_fails() {
    let (addr, _proxy) = spawn_proxy(|mut stream| async move {
        let mut greeting = [0u8; 4];
        stream.read_exact(&mut greeting).await.unwrap();
        stream.write_all(&[0x05, 0x02]).await.unwrap();

        let mut auth = [0u8; 2 + 1 + 1 + 1];
        stream.read_exact(&mut auth).await.unwrap();
        stream.write_all(&[0x05, 0x00]).await.unwrap();
    })
    .await;

    let creds = Credentials::new("u", "p");
    let mut client =
        factory::create(ProxyType::Socks5, "127.0.0.1", addr.port(), Some(creds)).unwrap();
    let err = client.connect("192.0.2.1", 80).await.unwrap_err();

    assert!(matches!(err, ProxyError::Protocol(_)));
    assert_eq!(client.state(), ClientState::Failed);
}

#[tokio::test]
async fn socks4_bind_unspecified_address_means_proxy_host() {
    let (addr, _proxy) = spawn_proxy(|mut stream| async move {
        let mut request = [0u8; 9];
        stream.read_exact(&mut request).await.unwrap();
        stream
            .write_all(&[0x00, 0x5a, 0x1f, 0x90, 0, 0, 0, 0])
            .await
            .unwrap();
    })
    .await;

    let mut client = factory::create(ProxyType::Socks4, "127.0.0.1", addr.port(), None).unwrap();
    let pending = client.bind("198.51.100.7", 21).await.unwrap();
    assert_eq!(pending.bound_addr().to_string(), "127.0.0.1:8080");
}
