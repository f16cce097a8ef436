// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for warden-server.
//!
//! [`WardenRuntime`] runs the daemon inside an existing tokio application.
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_server::runtime::WardenRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = WardenRuntime::builder()
//!         .socket_path("/tmp/warden.sock")
//!         .container_root("/tmp/warden/containers")
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     // Graceful shutdown
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::backend::{self, Backend};
use crate::config::{BackendKind, Config};
use crate::context::ServerContext;
use crate::server::{Drainer, Endpoint, Listener, run_server};
use crate::supervisor::Supervisor;

/// Builder for creating a [`WardenRuntime`].
#[derive(Debug, Default)]
pub struct WardenRuntimeBuilder {
    config: Config,
}

impl WardenRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Listen on a Unix socket.
    ///
    /// Default: `/tmp/warden.sock`
    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.socket_path = path.into();
        self.config.tcp_addr = None;
        self
    }

    /// Listen on TCP instead of the Unix socket. Port 0 picks a free port.
    pub fn tcp_addr(mut self, addr: SocketAddr) -> Self {
        self.config.tcp_addr = Some(addr);
        self
    }

    pub fn container_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.container_root = path.into();
        self
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.backend = backend;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if the pools cannot hold a single container.
    pub fn build(self) -> Result<WardenRuntimeConfig> {
        let config = self.config;
        anyhow::ensure!(config.network_pool_size > 0, "network pool is empty");
        anyhow::ensure!(config.uid_pool_size > 0, "uid pool is empty");
        Ok(WardenRuntimeConfig { config })
    }
}

/// Configuration for a [`WardenRuntime`].
#[derive(Debug)]
pub struct WardenRuntimeConfig {
    config: Config,
}

impl WardenRuntimeConfig {
    /// Prepare the backend, bind the listener and start accepting.
    pub async fn start(self) -> Result<WardenRuntime> {
        let config = self.config;
        let supervisor = Supervisor::start().context("failed to start process supervisor")?;
        let backend = backend::from_config(&config, supervisor.clone());
        backend
            .setup()
            .await
            .with_context(|| format!("{} backend setup failed", backend.name()))?;

        let listener = match config.tcp_addr {
            Some(addr) => Listener::bind_tcp(addr).await,
            None => Listener::bind_unix(&config.socket_path).await,
        }
        .context("failed to bind listener")?;
        let endpoint = listener.endpoint()?;

        let ctx = Arc::new(ServerContext::new(config, backend, supervisor));
        let drainer = Arc::new(Drainer::new());
        let server_handle = tokio::spawn(run_server(listener, ctx.clone(), drainer.clone()));

        info!(%endpoint, backend = ctx.backend.name(), "WardenRuntime started");

        Ok(WardenRuntime {
            server_handle,
            drainer,
            ctx,
            endpoint,
        })
    }
}

/// Destroy every registered container.
async fn destroy_all(ctx: &ServerContext) {
    for container in ctx.registry.all().await {
        container.destroy_quietly().await;
    }
}

/// A running daemon.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
#[derive(Debug)]
pub struct WardenRuntime {
    server_handle: JoinHandle<()>,
    drainer: Arc<Drainer>,
    ctx: Arc<ServerContext>,
    endpoint: Endpoint,
}

impl WardenRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> WardenRuntimeBuilder {
        WardenRuntimeBuilder::new()
    }

    /// Where clients connect.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.ctx.backend
    }

    pub fn drainer(&self) -> &Arc<Drainer> {
        &self.drainer
    }

    /// Gracefully shut down.
    ///
    /// Stops accepting, drains connections (bounded by the configured drain
    /// timeout) and destroys every remaining container.
    pub async fn shutdown(self) -> Result<()> {
        info!("WardenRuntime shutting down...");

        self.drainer.start().await;
        let drain_timeout = self.ctx.config.drain_timeout;
        if tokio::time::timeout(drain_timeout, self.drainer.wait_done())
            .await
            .is_err()
        {
            let connections = self.drainer.connection_count().await;
            warn!(timeout_secs = drain_timeout.as_secs(), connections, "Drain timed out");
        }

        if !self.server_handle.is_finished() {
            self.server_handle.abort();
        }
        if let Err(e) = self.server_handle.await
            && !e.is_cancelled()
        {
            warn!(error = %e, "Server task failed");
        }

        destroy_all(&self.ctx).await;
        info!("WardenRuntime shutdown complete");
        Ok(())
    }
}
