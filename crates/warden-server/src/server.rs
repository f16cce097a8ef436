// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Listener and drain coordination for warden-server.
//!
//! ```text
//! INACTIVE ─start─► START ─► WAIT_ACCEPTOR_CLOSED ─acceptor closed─► ACCEPTOR_CLOSED
//!                                                                        │ notify connections
//!                                                                        ▼
//!                                         DONE ◄─no connections left── DRAINING
//! ```
//!
//! Connections register with the [`Drainer`] when accepted and unregister when
//! they close. Every unregister re-evaluates the state, so a drain completes
//! the moment the last connection goes away.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::connection::serve_connection;
use crate::context::ServerContext;

/// Pause after a failed accept (e.g. out of descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ============================================================================
// Drain
// ============================================================================

/// Drain progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DrainState {
    Inactive,
    Start,
    WaitAcceptorClosed,
    AcceptorClosed,
    Draining,
    Done,
}

#[derive(Debug, Default)]
struct DrainInner {
    connections: HashMap<u64, CancellationToken>,
}

/// Tracks live connections and drives a graceful shutdown.
#[derive(Debug)]
pub struct Drainer {
    inner: Mutex<DrainInner>,
    stop_accepting: CancellationToken,
    state: watch::Sender<DrainState>,
}

impl Default for Drainer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drainer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DrainInner::default()),
            stop_accepting: CancellationToken::new(),
            state: watch::channel(DrainState::Inactive).0,
        }
    }

    pub fn state(&self) -> DrainState {
        *self.state.borrow()
    }

    /// Fires when the listener must stop accepting.
    pub fn stop_accepting(&self) -> CancellationToken {
        self.stop_accepting.clone()
    }

    fn transition(&self, to: DrainState) {
        debug!(from = ?self.state(), to = ?to, "Drain transition");
        self.state.send_replace(to);
    }

    /// Track a connection. The returned token fires when the connection must
    /// drain; it is already cancelled if the acceptor has closed.
    pub async fn register(&self, connection_id: u64) -> CancellationToken {
        let mut inner = self.inner.lock().await;
        let token = CancellationToken::new();
        if self.state() >= DrainState::AcceptorClosed {
            token.cancel();
        }
        inner.connections.insert(connection_id, token.clone());
        token
    }

    pub async fn unregister(&self, connection_id: u64) {
        let mut inner = self.inner.lock().await;
        inner.connections.remove(&connection_id);
        self.evaluate(&inner);
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    /// Begin draining. Only the first call has an effect.
    pub async fn start(&self) {
        let _inner = self.inner.lock().await;
        if self.state() != DrainState::Inactive {
            return;
        }
        info!("Drain started");
        self.transition(DrainState::Start);
        self.stop_accepting.cancel();
        self.transition(DrainState::WaitAcceptorClosed);
    }

    /// The listener has stopped. Tell every connection to drain.
    pub async fn acceptor_closed(&self) {
        let inner = self.inner.lock().await;
        if self.state() != DrainState::WaitAcceptorClosed {
            return;
        }
        self.transition(DrainState::AcceptorClosed);
        for token in inner.connections.values() {
            token.cancel();
        }
        self.transition(DrainState::Draining);
        self.evaluate(&inner);
    }

    fn evaluate(&self, inner: &DrainInner) {
        if self.state() == DrainState::Draining && inner.connections.is_empty() {
            info!("Drain complete");
            self.transition(DrainState::Done);
        }
    }

    /// Resolve once the drain is complete. Every waiter is woken exactly once.
    pub async fn wait_done(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == DrainState::Done).await;
    }
}

// ============================================================================
// Listener
// ============================================================================

/// Where the daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(SocketAddr),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

/// A bound listening socket.
#[derive(Debug)]
pub enum Listener {
    Unix(UnixListener, PathBuf),
    Tcp(TcpListener),
}

impl Listener {
    /// Bind a Unix socket, replacing a stale socket file.
    pub async fn bind_unix(path: &Path) -> io::Result<Self> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "Removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(Listener::Unix(UnixListener::bind(path)?, path.to_path_buf()))
    }

    pub async fn bind_tcp(addr: SocketAddr) -> io::Result<Self> {
        Ok(Listener::Tcp(TcpListener::bind(addr).await?))
    }

    /// Actual endpoint, with the bound port for TCP.
    pub fn endpoint(&self) -> io::Result<Endpoint> {
        match self {
            Listener::Unix(_, path) => Ok(Endpoint::Unix(path.clone())),
            Listener::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?)),
        }
    }
}

/// Accept connections until the drainer asks the acceptor to stop.
#[instrument(skip_all)]
pub async fn run_server(listener: Listener, ctx: Arc<ServerContext>, drainer: Arc<Drainer>) {
    let stop = drainer.stop_accepting();
    info!(endpoint = ?listener.endpoint().ok(), "Accepting connections");

    loop {
        let accepted = match &listener {
            Listener::Unix(l, _) => tokio::select! {
                _ = stop.cancelled() => break,
                accepted = l.accept() => accepted.map(|(stream, _)| Accepted::Unix(stream)),
            },
            Listener::Tcp(l) => tokio::select! {
                _ = stop.cancelled() => break,
                accepted = l.accept() => accepted.map(|(stream, peer)| {
                    debug!(%peer, "TCP connection");
                    Accepted::Tcp(stream)
                }),
            },
        };
        match accepted {
            Ok(Accepted::Unix(stream)) => spawn_connection(stream, &ctx, &drainer).await,
            Ok(Accepted::Tcp(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "Failed to set TCP_NODELAY");
                }
                spawn_connection(stream, &ctx, &drainer).await
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }

    if let Listener::Unix(_, path) = &listener
        && let Err(e) = tokio::fs::remove_file(path).await
    {
        debug!(error = %e, "Failed to remove socket file");
    }
    drop(listener);
    info!("Acceptor closed");
    drainer.acceptor_closed().await;
}

enum Accepted {
    Unix(UnixStream),
    Tcp(TcpStream),
}

/// Register the connection before its task starts, so a drain that begins
/// right after the accept still waits for it.
async fn spawn_connection<S>(stream: S, ctx: &Arc<ServerContext>, drainer: &Arc<Drainer>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
{
    let connection_id = ctx.next_connection_id();
    let drain = drainer.register(connection_id).await;
    let ctx = ctx.clone();
    let drainer = drainer.clone();
    tokio::spawn(async move {
        serve_connection(stream, ctx, connection_id, drain).await;
        drainer.unregister(connection_id).await;
    });
}
