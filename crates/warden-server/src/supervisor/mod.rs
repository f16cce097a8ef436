// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process supervisor.
//!
//! Spawns child processes, pumps their standard streams asynchronously, and
//! enforces timeouts and output caps. All children share one reaper task, so
//! thousands of concurrent children cost one task each and no threads.
//!
//! ```text
//!   Supervisor::spawn ──► Process ──► drive task ──► ProcessStatus (once)
//!                              ▲            │
//!                              │            └── stdout/stderr ──► listeners
//!                     Reaper (SIGCHLD) ─────┘
//! ```

mod fds;
mod output;
mod process;
mod reaper;

use std::io;
use std::sync::Arc;

pub use output::{OutputStream, StreamChunk, StreamName, StreamSink};
pub use process::{Process, ProcessFailure, ProcessOutput, ProcessStatus, SpawnOptions};
pub use reaper::ExitKind;

use reaper::Reaper;

/// Entry point for spawning supervised processes.
#[derive(Debug, Clone)]
pub struct Supervisor {
    reaper: Arc<Reaper>,
}

impl Supervisor {
    /// Start the shared reaper. Must be called inside a tokio runtime.
    pub fn start() -> io::Result<Self> {
        Ok(Self {
            reaper: Reaper::start()?,
        })
    }

    /// Spawn `argv` and return immediately.
    pub async fn spawn(&self, argv: &[String], options: SpawnOptions) -> io::Result<Process> {
        Process::spawn(&self.reaper, argv, options).await
    }

    /// Spawn `argv` and wait for it to finish.
    pub async fn run(&self, argv: &[String], options: SpawnOptions) -> io::Result<Arc<ProcessStatus>> {
        let process = self.spawn(argv, options).await?;
        Ok(process.wait().await)
    }

    /// Children spawned but not yet reaped.
    pub async fn running(&self) -> usize {
        self.reaper.pending().await
    }
}
