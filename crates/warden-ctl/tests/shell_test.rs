// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shell sessions against a live daemon.
//!
//! Each test starts a daemon on a Unix socket in a temporary directory with
//! the insecure backend, then drives a [`Shell`] writing into buffers.

use std::time::Duration;

use tempfile::TempDir;
use tokio::net::UnixStream;

use warden_ctl::{Outcome, Shell};
use warden_protocol::WardenClient;
use warden_server::config::{BackendKind, Config};
use warden_server::runtime::WardenRuntime;

type TestShell = Shell<UnixStream, Vec<u8>, Vec<u8>>;

struct Session {
    shell: TestShell,
    _runtime: WardenRuntime,
    dir: TempDir,
}

impl Session {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("warden.sock");
        let config = Config {
            socket_path: socket_path.clone(),
            container_root: dir.path().join("containers"),
            backend: BackendKind::Insecure,
            grace_time: None,
            network_release_delay: Duration::ZERO,
            kill_grace: Duration::from_millis(200),
            ..Default::default()
        };
        let runtime = WardenRuntime::builder()
            .config(config)
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();
        let client = WardenClient::connect_unix(&socket_path).await.unwrap();
        Self {
            shell: Shell::new(client, Vec::new(), Vec::new()),
            _runtime: runtime,
            dir,
        }
    }

    fn stdout(&self) -> String {
        String::from_utf8_lossy(self.shell.writers().0).into_owned()
    }

    fn stderr(&self) -> String {
        String::from_utf8_lossy(self.shell.writers().1).into_owned()
    }

    /// Create a container and return its handle.
    async fn create(&self) -> String {
        let mut client = self.side_client().await;
        client
            .create(Default::default())
            .await
            .unwrap()
            .handle
    }

    /// A second connection, for setup that should not show in the output.
    async fn side_client(&self) -> WardenClient<UnixStream> {
        let path = self.dir.path().join("warden.sock");
        WardenClient::connect_unix(&path).await.unwrap()
    }
}

// ========== Command Tests ==========

#[tokio::test]
async fn test_create_prints_handle() {
    let mut session = Session::start().await;
    let outcome = session.shell.execute_line("create --handle my-box").await.unwrap();
    assert_eq!(outcome, Outcome::Done);
    assert_eq!(session.stdout(), "handle : my-box\n");
}

#[tokio::test]
async fn test_run_writes_job_output_and_returns_status() {
    let mut session = Session::start().await;
    let handle = session.create().await;

    let line = format!("run --handle {handle} --script 'echo out; echo err >&2; exit 3'");
    let outcome = session.shell.execute_line(&line).await.unwrap();
    assert_eq!(outcome, Outcome::Exited(3));
    assert_eq!(session.stdout(), "out\n");
    assert_eq!(session.stderr(), "err\n");
}

#[tokio::test]
async fn test_stream_writes_chunks_to_matching_writer() {
    let mut session = Session::start().await;
    let handle = session.create().await;

    let line = format!("spawn --handle {handle} --script 'echo one; echo two >&2; exit 5'");
    session.shell.execute_line(&line).await.unwrap();
    let job_id = session
        .stdout()
        .strip_prefix("job_id : ")
        .unwrap()
        .trim()
        .to_string();

    let line = format!("stream --handle {handle} --job_id {job_id}");
    let outcome = session.shell.execute_line(&line).await.unwrap();
    assert_eq!(outcome, Outcome::Exited(5));
    assert!(session.stdout().ends_with("one\n"));
    assert_eq!(session.stderr(), "two\n");
}

#[tokio::test]
async fn test_two_word_command() {
    let mut session = Session::start().await;
    let handle = session.create().await;

    let line = format!("limit memory --handle {handle} --limit_in_bytes 1048576");
    session.shell.execute_line(&line).await.unwrap();
    assert_eq!(session.stdout(), "limit_in_bytes : 1048576\n");
}

#[tokio::test]
async fn test_interactive_run_prints_status_fields() {
    let Session { shell, _runtime, dir } = Session::start().await;
    let mut session = Session {
        shell: shell.interactive(true),
        _runtime,
        dir,
    };
    let handle = session.create().await;

    let line = format!("run --handle {handle} --script 'echo hi'");
    session.shell.execute_line(&line).await.unwrap();
    let stdout = session.stdout();
    assert!(stdout.starts_with("hi\nexit_status : 0\n"), "{stdout}");
    assert!(stdout.contains("info.state : active\n"), "{stdout}");
}

// ========== Session Tests ==========

#[tokio::test]
async fn test_server_error_reported_and_session_continues() {
    let mut session = Session::start().await;
    let input = "info --handle nope\necho --message still-here\n";

    let code = session.shell.run(input.as_bytes(), false).await.unwrap();
    assert_eq!(code, 0);
    assert_eq!(session.stderr(), "error : Unknown handle: nope\ndata : nope\n");
    assert_eq!(session.stdout(), "message : still-here\n");
}

#[tokio::test]
async fn test_exit_on_error_stops_session() {
    let mut session = Session::start().await;
    let input = "info --handle nope\necho --message never\n";

    let code = session.shell.run(input.as_bytes(), true).await.unwrap();
    assert_eq!(code, 1);
    assert!(session.stdout().is_empty());
}

#[tokio::test]
async fn test_session_exit_code_is_last_job_status() {
    let mut session = Session::start().await;
    let handle = session.create().await;
    let input = format!("run --handle {handle} --script 'exit 7'\n");

    let code = session.shell.run(input.as_bytes(), false).await.unwrap();
    assert_eq!(code, 7);
}

#[tokio::test]
async fn test_quit_ends_session() {
    let mut session = Session::start().await;
    let input = "ping\nquit\necho --message never\n";

    let code = session.shell.run(input.as_bytes(), true).await.unwrap();
    assert_eq!(code, 0);
    assert!(session.stdout().is_empty());
}

#[tokio::test]
async fn test_flag_error_is_local() {
    let mut session = Session::start().await;

    let code = session.shell.run_once(&["spawn".to_string(), "--script".to_string()]).await.unwrap();
    assert_eq!(code, 1);
    assert!(session.stderr().starts_with("error : "));

    // Connection still usable
    let outcome = session.shell.execute_line("ping").await.unwrap();
    assert_eq!(outcome, Outcome::Done);
}

#[tokio::test]
async fn test_help_sends_nothing() {
    let mut session = Session::start().await;
    session.shell.execute_line("copy --help").await.unwrap();
    let stdout = session.stdout();
    assert!(stdout.contains("copy in"));
    assert!(stdout.contains("copy out"));
}
