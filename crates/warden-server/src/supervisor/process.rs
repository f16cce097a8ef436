// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Spawned child processes.
//!
//! Each process is driven by one task that pumps stdin/stdout/stderr, enforces
//! the timeout and output cap, and resolves the terminal status exactly once
//! after the reaper reports the exit.

use std::fs::File;
use std::future::pending;
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use super::fds;
use super::output::{OutputStream, StreamName, StreamSink};
use super::reaper::{ExitKind, Reaper};

const READ_CHUNK: usize = 64 * 1024;

/// How long to keep reading pipes after exit. Grandchildren that inherited
/// the pipe may hold it open forever.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Options for spawning a process.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Bytes written to stdin, which is closed afterwards.
    pub input: Option<Bytes>,
    /// Wall-clock limit.
    pub timeout: Option<Duration>,
    /// Cap on combined stdout and stderr.
    pub max_output_bytes: Option<usize>,
    /// Read output but do not keep it.
    pub discard_output: bool,
    pub prepend_stdout: Option<Bytes>,
    pub prepend_stderr: Option<Bytes>,
    /// Keep descriptors above 2 from leaking into the child.
    pub close_other_fds: bool,
    /// Delay between TERM and KILL when the supervisor terminates the child.
    pub kill_grace: Duration,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub clear_env: bool,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            input: None,
            timeout: None,
            max_output_bytes: None,
            discard_output: false,
            prepend_stdout: None,
            prepend_stderr: None,
            close_other_fds: true,
            kill_grace: Duration::from_secs(5),
            cwd: None,
            env: Vec::new(),
            clear_env: false,
        }
    }
}

/// Why supervision of a process failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessFailure {
    #[error("maximum output exceeded")]
    MaximumOutputExceeded,

    #[error("timeout exceeded")]
    TimeoutExceeded,

    #[error("failed to reap process: {0}")]
    Reap(String),
}

/// Everything observed about a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub pid: i32,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: Bytes,
    pub stderr: Bytes,
    pub runtime: Duration,
}

impl ProcessOutput {
    /// Exit code, or `128 + n` for a child killed by signal `n`.
    pub fn exit_status(&self) -> Option<u32> {
        match (self.exit_code, self.signal) {
            (Some(code), _) => Some(code as u32),
            (None, Some(sig)) => Some(128 + sig as u32),
            (None, None) => None,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Terminal status of a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStatus {
    pub output: ProcessOutput,
    pub failure: Option<ProcessFailure>,
}

impl ProcessStatus {
    /// Exited with status zero and supervision did not trip.
    pub fn success(&self) -> bool {
        self.failure.is_none() && self.output.success()
    }
}

#[derive(Debug)]
struct Shared {
    pid: i32,
    reaped: Arc<AtomicBool>,
    kill_pending: AtomicBool,
    stdout: Mutex<OutputStream>,
    stderr: Mutex<OutputStream>,
    status: watch::Sender<Option<Arc<ProcessStatus>>>,
    started: Instant,
}

/// Handle to a spawned process. Clones share the same process.
#[derive(Debug, Clone)]
pub struct Process {
    shared: Arc<Shared>,
}

struct Pipes {
    stdin: Option<pipe::Sender>,
    stdout: Option<pipe::Receiver>,
    stderr: Option<pipe::Receiver>,
}

impl Pipes {
    fn close_all(&mut self) {
        self.stdin = None;
        self.stdout = None;
        self.stderr = None;
    }
}

fn receiver<T: Into<OwnedFd>>(fd: Option<T>) -> io::Result<Option<pipe::Receiver>> {
    fd.map(|fd| pipe::Receiver::from_file(File::from(fd.into())))
        .transpose()
}

fn sender<T: Into<OwnedFd>>(fd: Option<T>) -> io::Result<Option<pipe::Sender>> {
    fd.map(|fd| pipe::Sender::from_file(File::from(fd.into())))
        .transpose()
}

impl Process {
    pub(crate) async fn spawn(reaper: &Reaper, argv: &[String], options: SpawnOptions) -> io::Result<Self> {
        let Some((program, args)) = argv.split_first() else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty command"));
        };

        let input = options.input.clone().unwrap_or_default();
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(if input.is_empty() { Stdio::null() } else { Stdio::piped() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if options.clear_env {
            command.env_clear();
        }
        command.envs(options.env.iter().map(|(k, v)| (k, v)));
        if let Some(cwd) = &options.cwd {
            command.current_dir(cwd);
        }
        if options.close_other_fds {
            // SAFETY: close_other_fds only issues async-signal-safe syscalls.
            unsafe {
                command.pre_exec(|| {
                    fds::close_other_fds();
                    Ok(())
                });
            }
        }

        let mut child = command.spawn()?;
        let pid = child.id() as i32;
        let reaped = Arc::new(AtomicBool::new(false));
        let exit_rx = reaper.register(pid, reaped.clone()).await;

        let pipes = Pipes {
            stdin: sender(child.stdin.take())?,
            stdout: receiver(child.stdout.take())?,
            stderr: receiver(child.stderr.take())?,
        };
        // The reaper owns waiting; dropping Child does not wait or kill.
        drop(child);

        let (status, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            pid,
            reaped,
            kill_pending: AtomicBool::new(false),
            stdout: Mutex::new(OutputStream::new(
                StreamName::Stdout,
                options.prepend_stdout.clone(),
                options.discard_output,
            )),
            stderr: Mutex::new(OutputStream::new(
                StreamName::Stderr,
                options.prepend_stderr.clone(),
                options.discard_output,
            )),
            status,
            started: Instant::now(),
        });

        debug!(pid, program = %program, "Spawned process");
        tokio::spawn(drive(shared.clone(), exit_rx, pipes, input, options));
        Ok(Self { shared })
    }

    pub fn pid(&self) -> i32 {
        self.shared.pid
    }

    /// Terminal status, if the process has finished.
    pub fn status(&self) -> Option<Arc<ProcessStatus>> {
        self.shared.status.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.status.borrow().is_some()
    }

    /// Wait for the terminal status. Every caller gets the same cached value.
    pub async fn wait(&self) -> Arc<ProcessStatus> {
        let mut rx = self.shared.status.subscribe();
        let resolved = match rx.wait_for(Option::is_some).await {
            Ok(status) => status.clone(),
            Err(_) => None,
        };
        match resolved {
            Some(status) => status,
            None => Arc::new(ProcessStatus {
                output: ProcessOutput {
                    pid: self.shared.pid,
                    exit_code: None,
                    signal: None,
                    stdout: Bytes::new(),
                    stderr: Bytes::new(),
                    runtime: self.shared.started.elapsed(),
                },
                failure: Some(ProcessFailure::Reap("supervisor stopped".to_string())),
            }),
        }
    }

    /// Send TERM to the process group now and KILL after `grace`.
    ///
    /// Returns false if the process already exited or a kill is pending.
    pub fn kill(&self, grace: Duration) -> bool {
        self.shared.kill(grace)
    }

    /// Deliver stdout and stderr to `sink` as it arrives.
    ///
    /// Each stream ends with a chunk marked `eof`; on a finished process both
    /// buffers are replayed once.
    pub async fn add_streams_listener(&self, sink: StreamSink) {
        self.shared.stdout.lock().await.add_listener(sink.clone());
        self.shared.stderr.lock().await.add_listener(sink);
    }
}

impl Shared {
    fn kill(self: &Arc<Self>, grace: Duration) -> bool {
        if self.reaped.load(Ordering::SeqCst) {
            return false;
        }
        if self.kill_pending.swap(true, Ordering::SeqCst) {
            return false;
        }

        let group = Pid::from_raw(self.pid);
        debug!(pid = self.pid, ?grace, "Sending SIGTERM");
        if let Err(e) = killpg(group, Signal::SIGTERM) {
            debug!(pid = self.pid, error = %e, "SIGTERM failed");
        }

        let shared = self.clone();
        tokio::spawn(async move {
            let mut status = shared.status.subscribe();
            tokio::select! {
                _ = tokio::time::sleep(grace) => {
                    if !shared.reaped.load(Ordering::SeqCst) {
                        debug!(pid = shared.pid, "Grace period elapsed, sending SIGKILL");
                        if let Err(e) = killpg(group, Signal::SIGKILL) {
                            debug!(pid = shared.pid, error = %e, "SIGKILL failed");
                        }
                    }
                }
                _ = status.wait_for(Option::is_some) => {}
            }
        });
        true
    }

    async fn close_streams(&self) {
        self.stdout.lock().await.close();
        self.stderr.lock().await.close();
    }

    /// Stop pumping, flush listeners, and start terminating the child.
    async fn abort(self: &Arc<Self>, pipes: &mut Pipes, grace: Duration) {
        pipes.close_all();
        self.close_streams().await;
        self.kill(grace);
    }

    fn stream(&self, name: StreamName) -> &Mutex<OutputStream> {
        match name {
            StreamName::Stdout => &self.stdout,
            StreamName::Stderr => &self.stderr,
        }
    }
}

async fn read_some(pipe: &mut Option<pipe::Receiver>, buf: &mut [u8]) -> io::Result<usize> {
    match pipe {
        Some(pipe) => pipe.read(buf).await,
        None => pending().await,
    }
}

async fn write_some(pipe: &mut Option<pipe::Sender>, data: &[u8]) -> io::Result<usize> {
    match pipe {
        Some(pipe) => pipe.write(data).await,
        None => pending().await,
    }
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

/// Read what is left in a pipe until EOF or `deadline`.
async fn drain(shared: &Shared, name: StreamName, pipe: Option<pipe::Receiver>, buf: &mut [u8], deadline: Instant) {
    let Some(mut pipe) = pipe else {
        return;
    };
    loop {
        match tokio::time::timeout_at(deadline, pipe.read(buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                shared.stream(name).lock().await.append(&buf[..n]);
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
            Ok(Err(e)) => {
                debug!(pid = shared.pid, stream = ?name, error = %e, "Pipe read failed while draining");
                break;
            }
            Err(_) => {
                debug!(pid = shared.pid, stream = ?name, "Pipe still open after exit, stopped draining");
                break;
            }
        }
    }
}

async fn drive(
    shared: Arc<Shared>,
    mut exit_rx: oneshot::Receiver<ExitKind>,
    mut pipes: Pipes,
    input: Bytes,
    options: SpawnOptions,
) {
    let deadline = options.timeout.map(|t| shared.started + t);
    let max_output = options.max_output_bytes;
    let mut out_buf = vec![0u8; READ_CHUNK];
    let mut err_buf = vec![0u8; READ_CHUNK];
    let mut written = 0usize;
    let mut total = 0usize;
    let mut failure: Option<ProcessFailure> = None;

    let exit = loop {
        tokio::select! {
            biased;

            exit = &mut exit_rx => {
                break exit.unwrap_or_else(|_| ExitKind::Lost("reaper stopped".to_string()));
            }

            _ = deadline_reached(deadline), if failure.is_none() => {
                debug!(pid = shared.pid, "Timeout exceeded");
                failure = Some(ProcessFailure::TimeoutExceeded);
                shared.abort(&mut pipes, options.kill_grace).await;
            }

            read = read_some(&mut pipes.stdout, &mut out_buf) => {
                match read {
                    Ok(n) if n > 0 => {
                        total += n;
                        shared.stdout.lock().await.append(&out_buf[..n]);
                    }
                    _ => {
                        pipes.stdout = None;
                        shared.stdout.lock().await.close();
                    }
                }
                if max_output.is_some_and(|max| total > max) && failure.is_none() {
                    debug!(pid = shared.pid, total, "Maximum output exceeded");
                    failure = Some(ProcessFailure::MaximumOutputExceeded);
                    shared.abort(&mut pipes, options.kill_grace).await;
                }
            }

            read = read_some(&mut pipes.stderr, &mut err_buf) => {
                match read {
                    Ok(n) if n > 0 => {
                        total += n;
                        shared.stderr.lock().await.append(&err_buf[..n]);
                    }
                    _ => {
                        pipes.stderr = None;
                        shared.stderr.lock().await.close();
                    }
                }
                if max_output.is_some_and(|max| total > max) && failure.is_none() {
                    debug!(pid = shared.pid, total, "Maximum output exceeded");
                    failure = Some(ProcessFailure::MaximumOutputExceeded);
                    shared.abort(&mut pipes, options.kill_grace).await;
                }
            }

            wrote = write_some(&mut pipes.stdin, &input[written..]) => {
                match wrote {
                    Ok(n) => {
                        written += n;
                        if written >= input.len() {
                            pipes.stdin = None;
                        }
                    }
                    Err(e) => {
                        debug!(pid = shared.pid, error = %e, "Stdin closed early");
                        pipes.stdin = None;
                    }
                }
            }
        }
    };

    pipes.stdin = None;
    let drain_deadline = Instant::now() + DRAIN_TIMEOUT;
    tokio::join!(
        drain(&shared, StreamName::Stdout, pipes.stdout.take(), &mut out_buf, drain_deadline),
        drain(&shared, StreamName::Stderr, pipes.stderr.take(), &mut err_buf, drain_deadline),
    );
    shared.close_streams().await;

    let (exit_code, signal) = match exit {
        ExitKind::Exited(code) => (Some(code), None),
        ExitKind::Signaled(sig) => (None, Some(sig)),
        ExitKind::Lost(reason) => {
            warn!(pid = shared.pid, %reason, "Lost track of process");
            failure.get_or_insert(ProcessFailure::Reap(reason));
            (None, None)
        }
    };

    let output = ProcessOutput {
        pid: shared.pid,
        exit_code,
        signal,
        stdout: shared.stdout.lock().await.snapshot(),
        stderr: shared.stderr.lock().await.snapshot(),
        runtime: shared.started.elapsed(),
    };
    debug!(
        pid = shared.pid,
        exit_status = ?output.exit_status(),
        failure = ?failure,
        runtime_ms = output.runtime.as_millis() as u64,
        "Process finished"
    );
    shared
        .status
        .send_replace(Some(Arc::new(ProcessStatus { output, failure })));
}
