// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Jobs: one supervised process inside a container.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use warden_protocol::Response;
use warden_protocol::messages::{LinkResponse, StreamResponse};

use super::{Container, ResponseSink};
use crate::supervisor::{Process, ProcessStatus};

/// Reported when the process could not be reaped and has no exit status.
const UNKNOWN_EXIT_STATUS: u32 = 255;

/// A spawned job. Clones share the underlying process and its cached status.
#[derive(Debug, Clone)]
pub struct Job {
    id: u32,
    process: Process,
}

/// Exit status reported to clients: exit code, or `128 + signal`.
pub fn job_exit_status(status: &ProcessStatus) -> u32 {
    status.output.exit_status().unwrap_or(UNKNOWN_EXIT_STATUS)
}

impl Job {
    pub fn new(id: u32, process: Process) -> Self {
        Self { id, process }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn pid(&self) -> i32 {
        self.process.pid()
    }

    pub fn is_finished(&self) -> bool {
        self.process.is_finished()
    }

    /// Wait for the terminal status. Resolved once; every caller shares it.
    pub async fn status(&self) -> Arc<ProcessStatus> {
        self.process.wait().await
    }

    pub fn kill(&self, grace: Duration) -> bool {
        self.process.kill(grace)
    }

    /// Result of a link request.
    pub async fn link(&self, container: &Container) -> LinkResponse {
        let status = self.status().await;
        LinkResponse {
            exit_status: Some(job_exit_status(&status)),
            stdout: Some(status.output.stdout.to_vec()),
            stderr: Some(status.output.stderr.to_vec()),
            info: Some(container.info().await),
            failure: status.failure.as_ref().map(ToString::to_string),
        }
    }

    /// Forward output to `sink` as it is produced and return the final
    /// response once the process has finished.
    pub async fn stream(&self, container: &Container, sink: &ResponseSink) -> StreamResponse {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.process.add_streams_listener(tx).await;

        let mut open = 2;
        while let Some(chunk) = rx.recv().await {
            if !chunk.data.is_empty() {
                let _ = sink.send(Response::Stream(StreamResponse {
                    name: Some(chunk.stream.as_str().to_string()),
                    data: Some(chunk.data.to_vec()),
                    ..Default::default()
                }));
            }
            if chunk.eof {
                open -= 1;
                if open == 0 {
                    break;
                }
            }
        }

        let status = self.status().await;
        StreamResponse {
            exit_status: Some(job_exit_status(&status)),
            info: Some(container.info().await),
            failure: status.failure.as_ref().map(ToString::to_string),
            ..Default::default()
        }
    }
}
