// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container lifecycle engine.
//!
//! A container moves strictly forward through `Born → Active → Stopped →
//! Destroyed` (Stopped may be skipped). Every request is routed through a
//! per-type table of hook phases (see [`dispatch`]); the create sequence lives
//! in [`create`].
//!
//! Containers track the connections that reference them. When the last one
//! goes away a grace timer is armed; if nothing reconnects before it fires the
//! container destroys itself.

mod create;
pub mod dispatch;
mod job;
mod ops;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_protocol::Response;
use warden_protocol::messages::{DestroyRequest, InfoResponse};

use crate::backend::{ContainerSpec, DiskLimits};
use crate::context::ServerContext;
use crate::error::{Error, Result};
use crate::supervisor::Process;

pub use create::create;
pub use job::{Job, job_exit_status};

/// Intermediate responses produced while a request runs.
pub type ResponseSink = mpsc::UnboundedSender<Response>;

/// Lifecycle state. Ordered: a container only ever moves to a later state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    Born,
    Active,
    Stopped,
    Destroyed,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Born => "born",
            State::Active => "active",
            State::Stopped => "stopped",
            State::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values recorded by the limit requests.
#[derive(Debug, Clone, Default)]
pub(crate) struct Limits {
    pub memory: Option<u64>,
    pub disk: DiskLimits,
    pub bandwidth: Option<(u64, u64)>,
    pub cpu: Option<u64>,
}

#[derive(Debug)]
pub(crate) struct Inner {
    pub state: State,
    pub events: Vec<String>,
    pub jobs: BTreeMap<u32, Job>,
    pub connections: HashSet<u64>,
    pub grace_timer: Option<CancellationToken>,
    /// Host ports taken from the port pool by net_in
    pub ports: Vec<u16>,
    pub limits: Limits,
    pub oom_watch: Option<Process>,
    /// Pool resources have been returned
    pub released: bool,
}

/// One container.
pub struct Container {
    ctx: Arc<ServerContext>,
    spec: ContainerSpec,
    grace_time: Option<Duration>,
    inner: Mutex<Inner>,
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("handle", &self.spec.handle)
            .field("network", &self.spec.network)
            .field("uid", &self.spec.uid)
            .finish_non_exhaustive()
    }
}

impl Container {
    /// A container that has acquired its resources but not been created yet.
    pub(crate) fn born(ctx: Arc<ServerContext>, spec: ContainerSpec, grace_time: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            spec,
            grace_time,
            inner: Mutex::new(Inner {
                state: State::Born,
                events: Vec::new(),
                jobs: BTreeMap::new(),
                connections: HashSet::new(),
                grace_timer: None,
                ports: Vec::new(),
                limits: Limits::default(),
                oom_watch: None,
                released: false,
            }),
        })
    }

    pub fn handle(&self) -> &str {
        &self.spec.handle
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    pub fn grace_time(&self) -> Option<Duration> {
        self.grace_time
    }

    pub async fn state(&self) -> State {
        self.inner.lock().await.state
    }

    pub async fn events(&self) -> Vec<String> {
        self.inner.lock().await.events.clone()
    }

    pub(crate) fn ctx(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().await
    }

    /// Fail unless the container is in one of `expected`.
    pub async fn check_state_in(&self, expected: &'static [State]) -> Result<()> {
        let state = self.state().await;
        if expected.contains(&state) {
            Ok(())
        } else {
            Err(Error::InvalidState { state, expected })
        }
    }

    /// Move forward to `to`. Moving backwards is ignored.
    pub(crate) async fn advance(&self, to: State) {
        let mut inner = self.inner.lock().await;
        if to > inner.state {
            debug!(handle = %self.spec.handle, from = %inner.state, to = %to, "State transition");
            inner.state = to;
        }
    }

    pub(crate) async fn record_event(&self, event: impl Into<String>) {
        let event = event.into();
        info!(handle = %self.spec.handle, %event, "Container event");
        self.inner.lock().await.events.push(event);
    }

    /// Snapshot for info requests and job results.
    pub async fn info(&self) -> InfoResponse {
        let inner = self.inner.lock().await;
        InfoResponse {
            state: Some(inner.state.to_string()),
            events: inner.events.clone(),
            host_ip: Some(self.spec.network.host_ip().to_string()),
            container_ip: Some(self.spec.network.container_ip().to_string()),
            container_path: Some(self.spec.path.display().to_string()),
            job_ids: inner.jobs.keys().copied().collect(),
            grace_time: self
                .grace_time
                .map(|g| u32::try_from(g.as_secs()).unwrap_or(u32::MAX)),
        }
    }

    // ========== Connection References ==========

    /// A connection started referencing this container. Cancels a pending
    /// grace timer.
    pub async fn add_connection(&self, connection_id: u64) {
        let mut inner = self.inner.lock().await;
        inner.connections.insert(connection_id);
        if let Some(timer) = inner.grace_timer.take() {
            debug!(handle = %self.spec.handle, connection_id, "Grace timer cancelled");
            timer.cancel();
        }
    }

    /// A referencing connection closed. Arms the grace timer when it was the
    /// last one.
    pub async fn remove_connection(self: &Arc<Self>, connection_id: u64) {
        let mut inner = self.inner.lock().await;
        if !inner.connections.remove(&connection_id) || !inner.connections.is_empty() {
            return;
        }
        if inner.state == State::Destroyed {
            return;
        }
        let Some(grace) = self.grace_time else {
            return;
        };

        let token = CancellationToken::new();
        if let Some(previous) = inner.grace_timer.replace(token.clone()) {
            previous.cancel();
        }
        drop(inner);

        debug!(handle = %self.spec.handle, grace_secs = grace.as_secs(), "Grace timer armed");
        let container = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(grace) => {
                    info!(handle = %container.spec.handle, "Grace time elapsed, destroying container");
                    container.destroy_quietly().await;
                }
                _ = token.cancelled() => {}
            }
        });
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    /// Best-effort destroy. Domain errors are expected when racing a manual
    /// destroy and are only logged.
    pub async fn destroy_quietly(self: &Arc<Self>) {
        let (sink, _) = mpsc::unbounded_channel();
        let request = warden_protocol::Request::Destroy(DestroyRequest {
            handle: self.spec.handle.clone(),
        });
        match self.dispatch(request, &sink).await {
            Ok(_) => {}
            Err(e) if e.is_domain() => debug!(handle = %self.spec.handle, error = %e, "Destroy skipped"),
            Err(e) => warn!(handle = %self.spec.handle, error = %e, "Destroy failed"),
        }
    }

    /// Return the network, uid and ports to their pools. Runs at most once.
    pub(crate) async fn release_resources(&self) {
        let ports = {
            let mut inner = self.inner.lock().await;
            if inner.released {
                return;
            }
            inner.released = true;
            std::mem::take(&mut inner.ports)
        };
        let mut pools = self.ctx.pools().await;
        pools.network.release(self.spec.network);
        pools.uid.release(self.spec.uid);
        for port in ports {
            pools.port.release(port);
        }
        debug!(handle = %self.spec.handle, "Released resources");
    }
}
