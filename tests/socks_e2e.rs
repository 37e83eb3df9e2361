//! SOCKS negotiation tests against a scripted in-process proxy.

use anyhow::Result;
use skiff::socks;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const EXPECTED_REQUEST: [u8; 13] = [
    0x05, 0x01, 0x00, // greeting: version 5, one method, no-auth
    0x05, 0x01, 0x00, 0x01, // connect, reserved, IPv4
    192, 0, 2, 1, // target address
    0, 22, // target port, big endian
];

fn addr(host: &str, port: u16) -> (String, u16) {
    (host.to_string(), port)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tunnel_negotiates_and_carries_bytes() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let proxy = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut req = [0u8; 13];
        sock.read_exact(&mut req).await.unwrap();
        assert_eq!(req, EXPECTED_REQUEST);

        // Method ack + connect reply in one write, as a relay would.
        sock.write_all(&[0x05, 0x00, 0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();

        // Past negotiation the tunnel must be transparent; echo to prove it.
        let mut buf = [0u8; 4];
        sock.read_exact(&mut buf).await.unwrap();
        sock.write_all(&buf).await.unwrap();
    });

    let mut sock = socks::connect(&addr("127.0.0.1", port), &addr("192.0.2.1", 22)).await?;
    sock.write_all(b"ping").await?;
    let mut buf = [0u8; 4];
    sock.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"ping");

    proxy.await.unwrap();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bad_reply_prefix_is_fatal_with_a_hint() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let proxy = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut req = [0u8; 13];
        sock.read_exact(&mut req).await.unwrap();
        // Method accepted but connect refused.
        sock.write_all(&[0x05, 0x00, 0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();
    });

    let err = socks::connect(&addr("127.0.0.1", port), &addr("192.0.2.1", 22))
        .await
        .unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.contains("bad response"), "unexpected error: {}", msg);
    assert!(msg.contains("authenticated"), "missing hint: {}", msg);

    proxy.await.unwrap();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn short_reply_is_fatal() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let proxy = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut req = [0u8; 13];
        sock.read_exact(&mut req).await.unwrap();
        sock.write_all(&[0x05, 0x00, 0x05]).await.unwrap();
        // Close with the reply incomplete.
    });

    let err = socks::connect(&addr("127.0.0.1", port), &addr("192.0.2.1", 22))
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("bad response"));

    proxy.await.unwrap();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn target_must_be_an_ipv4_literal() -> Result<()> {
    // The request encodes raw address bytes, so a hostname target is an
    // argument error before any connection is attempted.
    let err = socks::connect(&addr("127.0.0.1", 1), &addr("runner.internal", 22))
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("not an IPv4 address"));
    Ok(())
}
