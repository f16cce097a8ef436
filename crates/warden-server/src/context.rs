// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared daemon state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tokio::sync::{Mutex, MutexGuard};

use crate::backend::Backend;
use crate::config::Config;
use crate::container_registry::ContainerRegistry;
use crate::pool::Pools;
use crate::supervisor::Supervisor;

/// State shared by every connection and container.
///
/// Holds the registry, the resource pools, the backend and the supervisor.
/// Containers keep an `Arc` to it; the registry keeps an `Arc` to each live
/// container until it is destroyed.
pub struct ServerContext {
    pub config: Config,
    pub backend: Arc<dyn Backend>,
    pub supervisor: Supervisor,
    pub registry: ContainerRegistry,
    pools: Mutex<Pools>,
    next_job_id: AtomicU32,
    next_connection_id: AtomicU64,
    /// When the server started (for uptime reporting).
    pub start_time: std::time::Instant,
}

impl ServerContext {
    pub fn new(config: Config, backend: Arc<dyn Backend>, supervisor: Supervisor) -> Self {
        let pools = Pools::from_config(&config);
        Self {
            config,
            backend,
            supervisor,
            registry: ContainerRegistry::new(),
            pools: Mutex::new(pools),
            next_job_id: AtomicU32::new(1),
            next_connection_id: AtomicU64::new(1),
            start_time: std::time::Instant::now(),
        }
    }

    pub async fn pools(&self) -> MutexGuard<'_, Pools> {
        self.pools.lock().await
    }

    /// Job ids are unique across every container in the process.
    pub fn next_job_id(&self) -> u32 {
        self.next_job_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("backend", &self.backend.name())
            .field("socket_path", &self.config.socket_path)
            .finish_non_exhaustive()
    }
}
