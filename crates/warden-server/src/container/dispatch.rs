// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request dispatch through hook phases.
//!
//! Each request type maps to a [`Phases`] entry:
//!
//! 1. the state guard (`valid_states`)
//! 2. `before`, which may validate further or prepare
//! 3. `around`, which wraps the operation (e.g. to always release resources)
//! 4. `run`, the operation itself
//! 5. `after`, for side effects once the operation succeeded
//!
//! Missing hooks are no-ops; a request type without an entry is rejected.

use std::sync::Arc;

use futures::future::BoxFuture;
use warden_protocol::messages::LimitMemoryResponse;
use warden_protocol::{Request, Response, Type};

use super::{Container, ResponseSink, State};
use crate::error::{Error, Result};

pub type BeforeHook = for<'a> fn(&'a Arc<Container>, &'a Request) -> BoxFuture<'a, Result<()>>;
pub type RunHook = for<'a> fn(&'a Arc<Container>, Request, &'a ResponseSink) -> BoxFuture<'a, Result<Response>>;
pub type AroundHook =
    for<'a> fn(&'a Arc<Container>, BoxFuture<'a, Result<Response>>) -> BoxFuture<'a, Result<Response>>;
pub type AfterHook = for<'a> fn(&'a Arc<Container>, &'a Response) -> BoxFuture<'a, Result<()>>;

/// Hook phases of one request type.
#[derive(Clone, Copy)]
pub struct Phases {
    pub valid_states: &'static [State],
    pub before: Option<BeforeHook>,
    pub around: Option<AroundHook>,
    pub run: RunHook,
    pub after: Option<AfterHook>,
}

const ACTIVE: &[State] = &[State::Active];
const ACTIVE_OR_STOPPED: &[State] = &[State::Active, State::Stopped];
const ANY: &[State] = &[State::Born, State::Active, State::Stopped, State::Destroyed];

impl Phases {
    fn new(valid_states: &'static [State], run: RunHook) -> Self {
        Self {
            valid_states,
            before: None,
            around: None,
            run,
            after: None,
        }
    }

    fn before(mut self, hook: BeforeHook) -> Self {
        self.before = Some(hook);
        self
    }

    fn around(mut self, hook: AroundHook) -> Self {
        self.around = Some(hook);
        self
    }

    fn after(mut self, hook: AfterHook) -> Self {
        self.after = Some(hook);
        self
    }
}

fn misrouted(expected: &str, request: &Request) -> Error {
    Error::InvalidRequest(format!(
        "{} request routed to {} handler",
        request.message_type().command(),
        expected
    ))
}

/// Generate a run hook that unpacks the request variant, calls the
/// container operation and packs the response variant.
macro_rules! run_hook {
    ($name:ident, $variant:ident, $method:ident) => {
        fn $name<'a>(c: &'a Arc<Container>, request: Request, _: &'a ResponseSink) -> BoxFuture<'a, Result<Response>> {
            Box::pin(async move {
                match request {
                    Request::$variant(r) => c.$method(r).await.map(Response::$variant),
                    other => Err(misrouted(stringify!($variant), &other)),
                }
            })
        }
    };
    ($name:ident, $variant:ident, $method:ident, sink) => {
        fn $name<'a>(c: &'a Arc<Container>, request: Request, sink: &'a ResponseSink) -> BoxFuture<'a, Result<Response>> {
            Box::pin(async move {
                match request {
                    Request::$variant(r) => c.$method(r, sink).await.map(Response::$variant),
                    other => Err(misrouted(stringify!($variant), &other)),
                }
            })
        }
    };
}

run_hook!(run_stop, Stop, do_stop);
run_hook!(run_destroy, Destroy, do_destroy);
run_hook!(run_info, Info, do_info);
run_hook!(run_spawn, Spawn, do_spawn);
run_hook!(run_link, Link, do_link);
run_hook!(run_run, Run, do_run);
run_hook!(run_stream, Stream, do_stream, sink);
run_hook!(run_net_in, NetIn, do_net_in);
run_hook!(run_net_out, NetOut, do_net_out);
run_hook!(run_copy_in, CopyIn, do_copy_in);
run_hook!(run_copy_out, CopyOut, do_copy_out);
run_hook!(run_limit_memory, LimitMemory, do_limit_memory);
run_hook!(run_limit_disk, LimitDisk, do_limit_disk);
run_hook!(run_limit_bandwidth, LimitBandwidth, do_limit_bandwidth);
run_hook!(run_limit_cpu, LimitCpu, do_limit_cpu);
run_hook!(run_attach_image, AttachImage, do_attach_image);
run_hook!(run_detach_image, DetachImage, do_detach_image);

fn before_destroy<'a>(c: &'a Arc<Container>, _: &'a Request) -> BoxFuture<'a, Result<()>> {
    Box::pin(c.before_destroy())
}

fn around_destroy<'a>(
    c: &'a Arc<Container>,
    run: BoxFuture<'a, Result<Response>>,
) -> BoxFuture<'a, Result<Response>> {
    Box::pin(async move {
        let result = run.await;
        // Resources go back to the pools even when the backend failed
        c.release_resources().await;
        result
    })
}

fn after_limit_memory<'a>(c: &'a Arc<Container>, response: &'a Response) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        if let Response::LimitMemory(LimitMemoryResponse {
            limit_in_bytes: Some(_),
        }) = response
        {
            c.watch_oom().await;
        }
        Ok(())
    })
}

/// Phase table. `None` for requests that are not addressed to a container.
pub fn phases(message_type: Type) -> Option<Phases> {
    let phases = match message_type {
        Type::Stop => Phases::new(ACTIVE_OR_STOPPED, run_stop),
        Type::Destroy => Phases::new(ANY, run_destroy)
            .before(before_destroy)
            .around(around_destroy),
        Type::Info => Phases::new(ACTIVE_OR_STOPPED, run_info),
        Type::Spawn => Phases::new(ACTIVE, run_spawn),
        Type::Link => Phases::new(ACTIVE_OR_STOPPED, run_link),
        Type::Run => Phases::new(ACTIVE, run_run),
        Type::Stream => Phases::new(ACTIVE_OR_STOPPED, run_stream),
        Type::NetIn => Phases::new(ACTIVE, run_net_in),
        Type::NetOut => Phases::new(ACTIVE, run_net_out),
        Type::CopyIn => Phases::new(ACTIVE, run_copy_in),
        Type::CopyOut => Phases::new(ACTIVE_OR_STOPPED, run_copy_out),
        Type::LimitMemory => Phases::new(ACTIVE_OR_STOPPED, run_limit_memory).after(after_limit_memory),
        Type::LimitDisk => Phases::new(ACTIVE_OR_STOPPED, run_limit_disk),
        Type::LimitBandwidth => Phases::new(ACTIVE_OR_STOPPED, run_limit_bandwidth),
        Type::LimitCpu => Phases::new(ACTIVE_OR_STOPPED, run_limit_cpu),
        Type::AttachImage => Phases::new(ACTIVE, run_attach_image),
        Type::DetachImage => Phases::new(ACTIVE_OR_STOPPED, run_detach_image),
        Type::Create | Type::Ping | Type::List | Type::Echo | Type::Error => return None,
    };
    Some(phases)
}

impl Container {
    /// Run a request through its hook phases.
    pub async fn dispatch(self: &Arc<Self>, request: Request, sink: &ResponseSink) -> Result<Response> {
        let message_type = request.message_type();
        let phases = phases(message_type).ok_or_else(|| {
            Error::InvalidRequest(format!("{} is not a container request", message_type.command()))
        })?;

        self.check_state_in(phases.valid_states).await?;
        if let Some(before) = phases.before {
            before(self, &request).await?;
        }

        let run = (phases.run)(self, request, sink);
        let response = match phases.around {
            Some(around) => around(self, run).await?,
            None => run.await?,
        };

        if let Some(after) = phases.after {
            after(self, &response).await?;
        }
        Ok(response)
    }
}
