// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Warden Ctl - shell for the warden daemon

use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use warden_ctl::Shell;
use warden_protocol::WardenClient;

/// Shell for the warden container daemon.
///
/// With a command given, runs it once and exits with its status. Otherwise
/// reads commands from stdin, one per line.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Daemon Unix socket.
    #[arg(long, env = "WARDEN_SOCKET_PATH", default_value = "/tmp/warden.sock")]
    socket: PathBuf,

    /// Connect over TCP instead (e.g. `127.0.0.1:7777`).
    #[arg(long, env = "WARDEN_TCP_ADDR")]
    tcp: Option<SocketAddr>,

    /// Stop at the first failing command when reading from stdin.
    #[arg(long)]
    exit_on_error: bool,

    /// Command to run, e.g. `net in --handle abc --host_port 8080`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warden_ctl=warn".into()),
        )
        .init();

    let code = match args.tcp {
        Some(addr) => {
            let client = WardenClient::connect_tcp(addr)
                .await
                .with_context(|| format!("failed to connect to {addr}"))?;
            session(client, &args).await?
        }
        None => {
            let client = WardenClient::connect_unix(&args.socket)
                .await
                .with_context(|| format!("failed to connect to {}", args.socket.display()))?;
            session(client, &args).await?
        }
    };

    Ok(ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX)))
}

async fn session<S>(client: WardenClient<S>, args: &Args) -> Result<u32>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut shell = Shell::new(client, std::io::stdout(), std::io::stderr());

    if !args.command.is_empty() {
        return Ok(shell.run_once(&args.command).await?);
    }

    let interactive = std::io::stdin().is_terminal();
    let mut shell = shell.interactive(interactive);
    let input = BufReader::new(tokio::io::stdin());
    Ok(shell.run(input, args.exit_on_error).await?)
}
