//! skiff - remote sessions and stream tunnels over pinned TLS
//!
//! Three thin entry points over the library: `exec` drives a framed
//! terminal session, `fs-bridge` splices the filesystem channel onto a
//! local Unix socket, and `socks-connect` is the SSH ProxyCommand
//! bridge.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use skiff::channel::{self, ExecRequest};
use skiff::cli::ConnectOpts;
use skiff::{relay, socks, term};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Remote session transport: framed terminal sessions and stream tunnels over pinned TLS"
)]
struct Args {
    /// Show connection diagnostics on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a command on the remote instance (default: an interactive shell)
    Exec {
        #[command(flatten)]
        connect: ConnectOpts,

        /// Never allocate a remote pty, even when run from a terminal
        #[arg(long)]
        no_tty: bool,

        /// Command and arguments to run remotely
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Bridge the instance's filesystem channel to a local Unix socket
    FsBridge {
        #[command(flatten)]
        connect: ConnectOpts,

        /// Local Unix socket the filesystem server listens on
        #[arg(long)]
        socket: PathBuf,
    },
    /// SOCKS tunnel on stdio, for use as an SSH ProxyCommand
    SocksConnect {
        /// Relay address (host:port)
        proxy: String,

        /// Destination address (ipv4:port)
        target: String,
    },
}

fn main() {
    let args = Args::parse();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")
    {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("skiff: {:#}", err);
            std::process::exit(1);
        }
    };

    match rt.block_on(run(args)) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("skiff: {:#}", err);
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<i32> {
    match args.command {
        Command::Exec {
            connect,
            no_tty,
            command,
        } => {
            let command = if command.is_empty() {
                vec!["bash".to_string()]
            } else {
                command
            };
            let tty = !no_tty && term::stdio_is_tty();
            let request = ExecRequest::for_command(command, tty);
            let endpoint = connect.endpoint();
            if args.verbose {
                eprintln!(
                    "skiff: opening /exec on {}:{} (tty={})",
                    endpoint.host, endpoint.port, tty
                );
            }
            let stream = channel::open(&endpoint, "/exec", Some(&request)).await?;
            if tty {
                term::install_interrupt_restore();
                let code = term::run_interactive(stream).await?;
                Ok(code as i32)
            } else {
                // No terminal on either end: plain byte copy, no framing.
                relay::bridge_stdio(stream).await;
                Ok(0)
            }
        }
        Command::FsBridge { connect, socket } => {
            #[cfg(unix)]
            {
                let endpoint = connect.endpoint();
                if args.verbose {
                    eprintln!(
                        "skiff: bridging /fs-stream on {}:{} to {}",
                        endpoint.host,
                        endpoint.port,
                        socket.display()
                    );
                }
                let stream = channel::open(&endpoint, "/fs-stream", None).await?;
                relay::bridge_unix(stream, &socket).await?;
                if args.verbose {
                    eprintln!("skiff: fs channel closed");
                }
                Ok(0)
            }
            #[cfg(not(unix))]
            {
                let _ = (connect, socket);
                anyhow::bail!("fs-bridge requires unix domain sockets")
            }
        }
        Command::SocksConnect { proxy, target } => {
            socks::run(&proxy, &target).await?;
            Ok(0)
        }
    }
}
