//! SOCKS relay: the ProxyCommand bridge that carries SSH (or any TCP
//! stream) to a private instance address through the provider's relay,
//! re-exposed on this process's own stdio.

use anyhow::{anyhow, bail, Context, Result};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::relay;

/// How long the proxy gets to answer the connect request.
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Split `host:port` on the last colon.
pub fn parse_addr(s: &str) -> Result<(String, u16)> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("invalid address {:?}: expected host:port", s))?;
    if host.is_empty() {
        bail!("invalid address {:?}: empty host", s);
    }
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port in {:?}", s))?;
    Ok((host.to_string(), port))
}

/// Greeting and connect request, concatenated. The relay always selects
/// no-auth, so both messages go out in one write instead of waiting for
/// the method-selection reply.
fn connect_request(target: Ipv4Addr, port: u16) -> Vec<u8> {
    let mut msg = vec![0x05, 0x01, 0x00, 0x05, 0x01, 0x00, 0x01];
    msg.extend_from_slice(&target.octets());
    msg.extend_from_slice(&port.to_be_bytes());
    msg
}

/// Negotiate a tunnel to `target` through the SOCKS proxy at `proxy`.
/// The reply is the 2-byte method ack and the 10-byte connect reply read
/// as one 12-byte unit; anything other than an accepting prefix is fatal.
pub async fn connect(proxy: &(String, u16), target: &(String, u16)) -> Result<TcpStream> {
    let target_ip: Ipv4Addr = target
        .0
        .parse()
        .with_context(|| format!("target host {:?} is not an IPv4 address", target.0))?;

    let mut sock = TcpStream::connect((proxy.0.as_str(), proxy.1))
        .await
        .with_context(|| format!("connect SOCKS proxy {}:{}", proxy.0, proxy.1))?;
    let _ = sock.set_nodelay(true);

    sock.write_all(&connect_request(target_ip, target.1))
        .await
        .context("send SOCKS request")?;

    let mut reply = [0u8; 12];
    let read = timeout(REPLY_TIMEOUT, sock.read_exact(&mut reply))
        .await
        .map_err(|_| anyhow!("SOCKS proxy did not reply"))?;
    if read.is_err() || reply[..4] != [0x05, 0x00, 0x05, 0x00] {
        bail!("SOCKS server returned bad response (not authenticated to the wireless network?)");
    }
    Ok(sock)
}

/// ProxyCommand entry point: negotiate the tunnel, then splice it onto
/// our own stdio until either side closes.
pub async fn run(proxy_str: &str, target_str: &str) -> Result<()> {
    let proxy = parse_addr(proxy_str)?;
    let target = parse_addr(target_str)?;
    let sock = connect(&proxy, &target).await?;
    relay::bridge_stdio(sock).await;
    Ok(())
}
