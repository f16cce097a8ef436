// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for warden-server E2E tests.
//!
//! Provides TestDaemon: a daemon on a Unix socket in a temporary directory,
//! using the insecure backend.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::UnixStream;

use warden_protocol::WardenClient;
use warden_server::config::{BackendKind, Config};
use warden_server::runtime::WardenRuntime;
use warden_server::server::Endpoint;

/// Daemon running for the duration of one test.
pub struct TestDaemon {
    pub runtime: WardenRuntime,
    pub socket_path: PathBuf,
    pub dir: TempDir,
}

impl TestDaemon {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start with a tweaked configuration.
    pub async fn start_with(configure: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket_path = dir.path().join("warden.sock");
        let mut config = Config {
            socket_path: socket_path.clone(),
            container_root: dir.path().join("containers"),
            backend: BackendKind::Insecure,
            network_release_delay: Duration::ZERO,
            kill_grace: Duration::from_millis(200),
            drain_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        configure(&mut config);

        let runtime = WardenRuntime::builder()
            .config(config)
            .build()
            .expect("valid config")
            .start()
            .await
            .expect("daemon starts");
        assert_eq!(runtime.endpoint(), &Endpoint::Unix(socket_path.clone()));

        Self {
            runtime,
            socket_path,
            dir,
        }
    }

    pub async fn client(&self) -> WardenClient<UnixStream> {
        WardenClient::connect_unix(&self.socket_path)
            .await
            .expect("client connects")
    }
}

/// Poll `check` until it returns true or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
