// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request handlers for warden-server.
//!
//! Global requests (ping, echo, list, create) are answered here. Everything
//! else names a container by handle and is dispatched through that
//! container's hook phases.

use std::sync::Arc;

use tracing::{debug, instrument, warn};
use warden_protocol::messages::*;
use warden_protocol::{Request, Response};

use crate::connection::References;
use crate::container::{self, ResponseSink};
use crate::context::ServerContext;
use crate::error::{Error, Result};

// ============================================================================
// Routing
// ============================================================================

/// Handle one request and produce its final response.
///
/// Domain errors become an error response; the connection stays usable.
/// Intermediate responses (stream chunks) are sent to `sink`.
#[instrument(skip_all, fields(connection_id = refs.id(), command = request.message_type().command()))]
pub async fn handle_request(
    ctx: &Arc<ServerContext>,
    refs: &References,
    request: Request,
    sink: &ResponseSink,
) -> Response {
    let result = match request {
        Request::Ping(request) => handle_ping(request).map(Response::Ping),
        Request::Echo(request) => handle_echo(request).map(Response::Echo),
        Request::List(request) => handle_list(ctx, request).await.map(Response::List),
        Request::Create(request) => handle_create(ctx, refs, request).await.map(Response::Create),
        request => handle_container_request(ctx, refs, request, sink).await,
    };

    match result {
        Ok(response) => response,
        Err(e) => {
            if e.is_domain() {
                debug!(error = %e, "Request failed");
            } else {
                warn!(error = %e, "Request failed");
            }
            Response::Error(e.to_response())
        }
    }
}

// ============================================================================
// Global Requests
// ============================================================================

pub fn handle_ping(_request: PingRequest) -> Result<PingResponse> {
    Ok(PingResponse {})
}

pub fn handle_echo(request: EchoRequest) -> Result<EchoResponse> {
    Ok(EchoResponse {
        message: request.message,
    })
}

/// Handles of every registered container, sorted.
pub async fn handle_list(ctx: &ServerContext, _request: ListRequest) -> Result<ListResponse> {
    Ok(ListResponse {
        handles: ctx.registry.handles().await,
    })
}

/// Create a container. The creating connection references it, so closing
/// that connection arms the grace timer.
pub async fn handle_create(
    ctx: &Arc<ServerContext>,
    refs: &References,
    request: CreateRequest,
) -> Result<CreateResponse> {
    let container = container::create(ctx, request).await?;
    refs.reference(&container).await;
    Ok(CreateResponse {
        handle: container.handle().to_string(),
    })
}

// ============================================================================
// Container Requests
// ============================================================================

/// Look up the target container and run the request through its phases.
pub async fn handle_container_request(
    ctx: &Arc<ServerContext>,
    refs: &References,
    request: Request,
    sink: &ResponseSink,
) -> Result<Response> {
    let handle = request.handle().ok_or_else(|| {
        Error::InvalidRequest(format!("{} does not name a container", request.message_type().command()))
    })?;
    let container = ctx.registry.find(handle).await?;
    refs.reference(&container).await;
    container.dispatch(request, sink).await
}
