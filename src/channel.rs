//! Transport handshake: upgrades a fresh pinned-TLS connection into a
//! raw bidirectional channel.
//!
//! The exchange is deliberately minimal. One `POST` request line with an
//! authorization header (and an optional JSON body) goes out, one status
//! byte comes back: `+` accepts and the socket then carries the raw
//! stream with no further HTTP framing. The two states are
//! awaiting-status and streaming, nothing else.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::tls;

pub const DEFAULT_PORT: u16 = 443;

/// How long the server gets to produce its status byte.
const STATUS_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound on the rejection-reason tail read for diagnostics.
const REASON_LIMIT: usize = 256;

/// Connection parameters for one channel.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Pinned server certificate (PEM).
    pub cert: PathBuf,
    /// Authorization key sent with the upgrade request.
    pub key: String,
}

/// Request body for the `/exec` channel.
#[derive(Debug, Clone, Serialize)]
pub struct ExecRequest {
    pub command: Vec<String>,
    pub environ: BTreeMap<String, String>,
    pub uid: u32,
    pub gid: u32,
    pub groups: Vec<u32>,
    pub tty: bool,
}

impl ExecRequest {
    /// Build a request carrying the calling process's environment and
    /// identity, so the responder can reproduce them around the command.
    pub fn for_command(command: Vec<String>, tty: bool) -> Self {
        let (uid, gid, groups) = identity();
        Self {
            command,
            environ: std::env::vars().collect(),
            uid,
            gid,
            groups,
            tty,
        }
    }
}

#[cfg(unix)]
fn identity() -> (u32, u32, Vec<u32>) {
    // SAFETY: getuid/getgid cannot fail; getgroups is called first with a
    // zero-length buffer to learn the count.
    unsafe {
        let uid = libc::getuid();
        let gid = libc::getgid();
        let count = libc::getgroups(0, std::ptr::null_mut()).max(0);
        let mut groups = vec![0 as libc::gid_t; count as usize];
        let written = libc::getgroups(count, groups.as_mut_ptr()).max(0);
        groups.truncate(written as usize);
        (uid, gid, groups.into_iter().map(|g| g as u32).collect())
    }
}

#[cfg(not(unix))]
fn identity() -> (u32, u32, Vec<u32>) {
    (0, 0, Vec::new())
}

/// Open a channel to `path` on the endpoint. On success the returned
/// stream is the live duplex channel, owned by the caller; nothing else
/// holds it.
pub async fn open(
    endpoint: &Endpoint,
    path: &str,
    body: Option<&ExecRequest>,
) -> Result<TlsStream<TcpStream>> {
    let pinned = tls::load_pinned_cert(&endpoint.cert)?;
    let config = tls::build_client_config(pinned);
    let connector = TlsConnector::from(Arc::new(config));

    let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
        .await
        .with_context(|| format!("connect {}:{}", endpoint.host, endpoint.port))?;
    let _ = tcp.set_nodelay(true);

    let name = tls::server_name_for(&endpoint.host)?;
    let mut stream = connector
        .connect(name, tcp)
        .await
        .with_context(|| format!("TLS handshake with {}:{}", endpoint.host, endpoint.port))?;

    let request = build_request(path, &endpoint.key, body)?;
    stream
        .write_all(&request)
        .await
        .context("send upgrade request")?;
    stream.flush().await.context("send upgrade request")?;

    // awaiting-status: exactly one byte decides accept or reject
    let mut status = [0u8; 1];
    let read = timeout(STATUS_TIMEOUT, stream.read(&mut status))
        .await
        .context("timed out waiting for the channel status byte")?
        .context("read channel status")?;
    if read == 0 {
        bail!("server closed the connection before accepting the channel");
    }
    if status[0] != b'+' {
        match read_reason(&mut stream).await {
            Some(reason) => bail!(
                "channel rejected (status byte {:#04x}, server said: {})",
                status[0],
                reason
            ),
            None => bail!("channel rejected (status byte {:#04x})", status[0]),
        }
    }

    // streaming: the socket now carries the raw channel
    Ok(stream)
}

fn build_request(path: &str, key: &str, body: Option<&ExecRequest>) -> Result<Vec<u8>> {
    let body_bytes = match body {
        Some(b) => serde_json::to_vec(b).context("serialize request body")?,
        None => Vec::new(),
    };
    let mut head = format!("POST {} HTTP/1.0\r\n", path);
    head.push_str(&format!("authorization: key {}\r\n", key));
    if body.is_some() {
        head.push_str(&format!("content-length: {}\r\n", body_bytes.len()));
        head.push_str("content-type: application/json\r\n");
    }
    head.push_str("\r\n");

    let mut out = head.into_bytes();
    out.extend_from_slice(&body_bytes);
    Ok(out)
}

/// Best-effort read of a short rejection reason the server may have
/// written after the status byte.
async fn read_reason(stream: &mut TlsStream<TcpStream>) -> Option<String> {
    let mut buf = vec![0u8; REASON_LIMIT];
    match timeout(Duration::from_secs(1), stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => {
            let text = String::from_utf8_lossy(&buf[..n]).trim().to_string();
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    }
}
