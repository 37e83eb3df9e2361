//! Byte relays: the unidirectional copy primitive and the full-duplex
//! bridges composed from it.

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single relay chunk.
pub const CHUNK: usize = 40960;

/// Copy `src` into `dst` until EOF or an I/O error, returning the bytes
/// relayed. Mid-stream errors are ordinary termination for a relay (the
/// peer reset or went away) and are absorbed here rather than raised.
pub async fn pipe<R, W>(src: &mut R, dst: &mut W) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK];
    let mut total = 0u64;
    loop {
        let n = match src.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if dst.write_all(&buf[..n]).await.is_err() {
            break;
        }
        if dst.flush().await.is_err() {
            break;
        }
        total += n as u64;
    }
    total
}

/// Full-duplex relay between two streams, one `pipe` per direction.
/// Resolves as soon as either direction finishes; the remaining
/// direction is abandoned with its stream.
pub async fn bridge<A, B>(a: A, b: B)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ar, mut aw) = tokio::io::split(a);
    let (mut br, mut bw) = tokio::io::split(b);
    tokio::select! {
        _ = pipe(&mut ar, &mut bw) => {}
        _ = pipe(&mut br, &mut aw) => {}
    }
}

/// Bridge a channel to a local Unix-domain socket (the filesystem
/// service's listener).
#[cfg(unix)]
pub async fn bridge_unix<S>(stream: S, socket_path: &std::path::Path) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let sock = tokio::net::UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("connect unix socket {}", socket_path.display()))?;
    bridge(stream, sock).await;
    Ok(())
}

/// Bridge a channel to this process's own stdin/stdout, making the
/// process a transparent pipe (the ProxyCommand shape).
pub async fn bridge_stdio<S>(stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sr, mut sw) = tokio::io::split(stream);
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    tokio::select! {
        _ = pipe(&mut stdin, &mut sw) => {}
        _ = pipe(&mut sr, &mut stdout) => {}
    }
}
