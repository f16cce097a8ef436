// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Centralized child reaper.
//!
//! A single task owns SIGCHLD handling. Every spawned child registers its pid
//! and receives its exit status through a oneshot channel. Only registered
//! pids are waited on, so children owned by other parts of the process are
//! never stolen.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{Mutex, Notify, oneshot};
use tracing::{debug, warn};

const RESCAN_INTERVAL: Duration = Duration::from_secs(1);

/// How a child terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitKind {
    Exited(i32),
    Signaled(i32),
    /// The pid could not be waited on.
    Lost(String),
}

#[derive(Debug)]
struct Waiter {
    reaped: Arc<AtomicBool>,
    tx: oneshot::Sender<ExitKind>,
}

#[derive(Debug, Default)]
pub struct Reaper {
    waiters: Mutex<HashMap<i32, Waiter>>,
    wake: Notify,
}

impl Reaper {
    /// Install the SIGCHLD handler and start the reaping task.
    pub fn start() -> std::io::Result<Arc<Self>> {
        let mut sigchld = signal(SignalKind::child())?;
        let reaper = Arc::new(Self::default());
        let task = reaper.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(RESCAN_INTERVAL);
            loop {
                task.reap_all().await;
                // Coalesced or lost SIGCHLDs are picked up on the next tick
                tokio::select! {
                    received = sigchld.recv() => {
                        if received.is_none() {
                            warn!("SIGCHLD stream ended, falling back to polling");
                        }
                    }
                    _ = task.wake.notified() => {}
                    _ = tick.tick() => {}
                }
            }
        });
        Ok(reaper)
    }

    /// Register a freshly spawned child.
    ///
    /// `reaped` is set before the exit status is delivered so signal senders
    /// can check it and avoid hitting a recycled pid.
    pub async fn register(&self, pid: i32, reaped: Arc<AtomicBool>) -> oneshot::Receiver<ExitKind> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(pid, Waiter { reaped, tx });
        // The child may already have exited before registration
        self.wake.notify_one();
        rx
    }

    pub async fn pending(&self) -> usize {
        self.waiters.lock().await.len()
    }

    async fn reap_all(&self) {
        let mut waiters = self.waiters.lock().await;
        let pids: Vec<i32> = waiters.keys().copied().collect();
        for pid in pids {
            let exit = match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(_, code)) => ExitKind::Exited(code),
                Ok(WaitStatus::Signaled(_, sig, _)) => ExitKind::Signaled(sig as i32),
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(errno) => ExitKind::Lost(errno.desc().to_string()),
            };
            if let Some(waiter) = waiters.remove(&pid) {
                debug!(pid, ?exit, "Reaped child");
                waiter.reaped.store(true, Ordering::SeqCst);
                let _ = waiter.tx.send(exit);
            }
        }
    }
}
