// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Warden Server - Container Management Daemon

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use warden_server::config::{BackendKind, Config};
use warden_server::runtime::WardenRuntime;

/// Container management daemon.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Unix socket to listen on (overrides WARDEN_SOCKET_PATH).
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Listen on TCP instead of the Unix socket (e.g. `127.0.0.1:7777`).
    #[arg(long)]
    tcp: Option<SocketAddr>,

    /// Backend driver: `insecure` or `linux` (overrides WARDEN_BACKEND).
    #[arg(long)]
    backend: Option<String>,

    /// Container depot directory (overrides WARDEN_CONTAINER_ROOT).
    #[arg(long)]
    container_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warden_server=info".into()),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Warden Server");

    let mut config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    // Apply CLI overrides.
    if let Some(socket) = args.socket {
        config.socket_path = socket;
        config.tcp_addr = None;
    }
    if let Some(addr) = args.tcp {
        config.tcp_addr = Some(addr);
    }
    if let Some(backend) = args.backend {
        config.backend = backend.parse::<BackendKind>()?;
    }
    if let Some(root) = args.container_root {
        config.container_root = root;
    }

    info!(
        socket = %config.socket_path.display(),
        tcp = ?config.tcp_addr,
        backend = ?config.backend,
        container_root = %config.container_root.display(),
        grace_time_secs = ?config.grace_time.map(|g| g.as_secs()),
        "Configuration loaded"
    );

    let runtime = WardenRuntime::builder().config(config).build()?.start().await?;

    wait_for_shutdown_signal().await?;
    info!("Shutting down...");

    runtime.shutdown().await?;
    info!("Shutdown complete");
    Ok(())
}

/// Resolves when SIGTERM or SIGINT is received.
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}
