//! Interactive terminal driver for `/exec` channels.
//!
//! The driver owns the local side of a framed session: keystrokes go out
//! as data frames, inbound data frames land on the local terminal, and
//! an exit-status frame ends the session carrying the remote exit code.
//! Keystrokes and resize notifications both feed a single writer task,
//! so two producers can never interleave frame bytes on the wire.

use anyhow::{bail, Context, Result};
use crossterm::terminal::{self, disable_raw_mode, enable_raw_mode};
use std::io::IsTerminal;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::frame::{self, Frame};

/// Stdin read chunk; terminal input arrives a few bytes at a time anyway.
const INPUT_CHUNK: usize = 4096;

/// True when both local stdio ends are real terminals. Anything else
/// (pipes, redirects) makes the session run unframed without a pty.
pub fn stdio_is_tty() -> bool {
    std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
}

/// Scoped raw-mode acquisition. The terminal is restored when the guard
/// drops, which covers every exit path through the session: normal exit,
/// protocol violation, and transport closure. Signal-driven exits are
/// covered by `install_interrupt_restore`.
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    pub fn new() -> Result<Self> {
        enable_raw_mode().context("enter raw terminal mode")?;
        Ok(Self { active: true })
    }

    fn restore(&mut self) {
        if self.active {
            self.active = false;
            let _ = disable_raw_mode();
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Restore the terminal before dying on an interrupt delivered from
/// outside the session (raw mode forwards ctrl-c to the remote side, so
/// this only fires for signals sent to the process directly).
pub fn install_interrupt_restore() {
    let result = ctrlc::set_handler(|| {
        let _ = disable_raw_mode();
        std::process::exit(130);
    });
    if let Err(err) = result {
        eprintln!("skiff: could not install interrupt handler: {}", err);
    }
}

/// Run an interactive session on the real terminal. Raw mode is held for
/// the whole session; the returned value is the remote exit code.
pub async fn run_interactive<S>(stream: S) -> Result<u32>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (cols, rows) = terminal::size().context("query terminal size")?;
    let mut guard = RawModeGuard::new()?;

    let (winch_tx, winch_rx) = mpsc::channel(4);
    #[cfg(unix)]
    let watcher = tokio::spawn(watch_winch(winch_tx));
    #[cfg(not(unix))]
    drop(winch_tx);

    let result = drive(
        stream,
        tokio::io::stdin(),
        tokio::io::stdout(),
        (u32::from(rows), u32::from(cols)),
        winch_rx,
    )
    .await;
    guard.restore();

    #[cfg(unix)]
    watcher.abort();
    result
}

/// Drive a framed session between the given local streams and the
/// transport. Exposed separately from the raw-mode wrapper so the frame
/// pump can run against any duplex pair.
pub async fn drive<S, I, O>(
    stream: S,
    input: I,
    mut output: O,
    size: (u32, u32),
    mut winch: mpsc::Receiver<(u32, u32)>,
) -> Result<u32>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    I: AsyncRead + Unpin + Send + 'static,
    O: AsyncWrite + Unpin,
{
    let (mut transport_r, transport_w) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel::<Frame>(32);

    // The responder needs the window geometry before it spawns the
    // command, so the resize frame goes out first.
    tx.send(Frame::Resize {
        rows: size.0,
        cols: size.1,
    })
    .await
    .ok();

    let writer = tokio::spawn(writer_loop(transport_w, rx));
    let input_task = tokio::spawn(input_loop(input, tx.clone()));
    let resize_tx = tx.clone();
    let resize_task = tokio::spawn(async move {
        while let Some((rows, cols)) = winch.recv().await {
            if resize_tx.send(Frame::Resize { rows, cols }).await.is_err() {
                return;
            }
        }
    });
    drop(tx);

    let result = output_loop(&mut transport_r, &mut output).await;

    input_task.abort();
    resize_task.abort();
    writer.abort();
    result
}

/// Inbound half: data frames go to the local terminal verbatim, an
/// exit-status frame ends the session. A resize frame travelling in this
/// direction, an unknown kind, or an oversized frame is stream
/// desynchronization and aborts the session.
async fn output_loop<R, W>(transport: &mut R, out: &mut W) -> Result<u32>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        match frame::read_frame(transport).await? {
            // Transport closed without an exit frame: the responder went
            // away cleanly, report success like a closed pipe would.
            None => return Ok(0),
            Some(Frame::Data(bytes)) => {
                out.write_all(&bytes)
                    .await
                    .context("write to local terminal")?;
                out.flush().await.context("write to local terminal")?;
            }
            Some(Frame::Exit(code)) => return Ok(code),
            Some(Frame::Resize { .. }) => {
                bail!("protocol violation: resize frame from the responder")
            }
        }
    }
}

/// Outbound half: local input chunks become data frames. Local EOF ends
/// only this direction; the session keeps running on remote output.
async fn input_loop<R>(mut input: R, tx: mpsc::Sender<Frame>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; INPUT_CHUNK];
    loop {
        let n = match input.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        if tx.send(Frame::Data(buf[..n].to_vec())).await.is_err() {
            return;
        }
    }
}

/// Sole writer to the transport.
async fn writer_loop<W>(mut transport: W, mut rx: mpsc::Receiver<Frame>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(f) = rx.recv().await {
        if frame::write_frame(&mut transport, &f).await.is_err() {
            return;
        }
    }
}

/// Re-reads the geometry on every SIGWINCH and hands it to the session.
/// Resize hints are idempotent, so coalescing a burst of signals is fine.
#[cfg(unix)]
async fn watch_winch(tx: mpsc::Sender<(u32, u32)>) {
    use tokio::signal::unix::{signal, SignalKind};
    let mut winch = match signal(SignalKind::window_change()) {
        Ok(s) => s,
        Err(_) => return,
    };
    while winch.recv().await.is_some() {
        if let Ok((cols, rows)) = terminal::size() {
            if tx.send((u32::from(rows), u32::from(cols))).await.is_err() {
                return;
            }
        }
    }
}
