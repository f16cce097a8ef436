// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The create sequence.
//!
//! - before: reserve the handle and acquire network and uid together
//! - around: any failure below triggers a best-effort destroy, then the
//!   original error is returned
//! - do: backend create and start, then Active
//! - after: insert into the registry

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use warden_protocol::messages::CreateRequest;

use super::Container;
use crate::backend::ContainerSpec;
use crate::context::ServerContext;
use crate::error::{Error, Result};
use crate::pool::Network;

/// Acquire network and uid. Either both are taken or neither.
async fn before_create(ctx: &ServerContext, request: &CreateRequest) -> Result<(Network, u32)> {
    if let Some(handle) = &request.handle
        && ctx.registry.contains(handle).await
    {
        return Err(Error::HandleTaken(handle.clone()));
    }

    let requested = request.network.as_deref().map(str::parse::<Network>).transpose()?;
    let mut pools = ctx.pools().await;
    let network = match requested {
        Some(network) => pools.network.acquire_specific(&network)?,
        None => pools.network.acquire()?,
    };
    match pools.uid.acquire() {
        Ok(uid) => Ok((network, uid)),
        Err(e) => {
            pools.network.release(network);
            Err(e)
        }
    }
}

fn spec(ctx: &ServerContext, request: CreateRequest, network: Network, uid: u32) -> ContainerSpec {
    let id = network.handle();
    ContainerSpec {
        handle: request.handle.unwrap_or_else(|| id.clone()),
        path: ctx.backend.container_path(&id),
        id,
        network,
        uid,
        bind_mounts: request.bind_mounts,
        rootfs: request.rootfs,
        env: request.env.into_iter().map(|e| (e.key, e.value)).collect(),
    }
}

/// Create, start and register a container.
pub async fn create(ctx: &Arc<ServerContext>, request: CreateRequest) -> Result<Arc<Container>> {
    let grace_time = match request.grace_time {
        Some(secs) => Some(Duration::from_secs(secs.into())),
        None => ctx.config.grace_time,
    };

    let (network, uid) = before_create(ctx, &request).await?;
    let container = Container::born(ctx.clone(), spec(ctx, request, network, uid), grace_time);

    let result = match container.do_create().await {
        Ok(()) => ctx.registry.register(container.clone()).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!(handle = %container.handle(), error = %e, "Create failed, destroying");
        container.destroy_quietly().await;
        return Err(e);
    }

    info!(
        handle = %container.handle(),
        network = %network,
        uid,
        path = %container.spec().path.display(),
        "Container created"
    );
    Ok(container)
}
