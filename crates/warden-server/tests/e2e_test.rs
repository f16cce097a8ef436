// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests for warden-server.
//!
//! These tests start a real daemon on a Unix socket with the insecure backend
//! and talk to it through WardenClient:
//! - Job spawn, link and run
//! - Grace-time auto destruction and reconnect
//! - Concurrent linkers across connections
//! - Streaming and graceful drain

mod common;

use std::time::Duration;

use common::*;
use warden_protocol::ClientError;
use warden_protocol::messages::*;
use warden_server::server::DrainState;

// ============================================================================
// Job Tests
// ============================================================================

#[tokio::test]
async fn test_spawn_and_link_echo() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;

    let handle = client.create(CreateRequest::default()).await.unwrap().handle;
    let job_id = client
        .spawn(SpawnRequest {
            handle: handle.clone(),
            script: "echo hi".to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
        .job_id;
    let linked = client.link(LinkRequest { handle, job_id }).await.unwrap();

    assert_eq!(linked.exit_status, Some(0));
    assert_eq!(linked.stdout.as_deref(), Some(&b"hi\n"[..]));
    assert_eq!(linked.stderr.as_deref(), Some(&b""[..]));
}

#[tokio::test]
async fn test_spawn_and_link_exit_code() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;

    let handle = client.create(CreateRequest::default()).await.unwrap().handle;
    let job_id = client
        .spawn(SpawnRequest {
            handle: handle.clone(),
            script: "exit 3".to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
        .job_id;
    let linked = client.link(LinkRequest { handle, job_id }).await.unwrap();
    assert_eq!(linked.exit_status, Some(3));
}

#[tokio::test]
async fn test_run_with_rlimits_and_stream() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;
    let handle = client.create(CreateRequest::default()).await.unwrap().handle;

    let ran = client
        .run(RunRequest {
            handle: handle.clone(),
            script: "ulimit -n".to_string(),
            rlimits: Some(ResourceLimits {
                nofile: Some(64),
                ..Default::default()
            }),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(ran.stdout.as_deref(), Some(&b"64\n"[..]));

    let job_id = client
        .spawn(SpawnRequest {
            handle: handle.clone(),
            script: "echo one; echo two >&2; exit 5".to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
        .job_id;
    let mut chunks = Vec::new();
    let last = client
        .stream(StreamRequest { handle, job_id }, |chunk| {
            chunks.push((chunk.name().to_string(), chunk.data().to_vec()))
        })
        .await
        .unwrap();
    assert_eq!(last.exit_status, Some(5));
    assert!(chunks.contains(&("stdout".to_string(), b"one\n".to_vec())));
    assert!(chunks.contains(&("stderr".to_string(), b"two\n".to_vec())));
}

#[tokio::test]
async fn test_list_and_destroy() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;

    let a = client.create(CreateRequest::default()).await.unwrap().handle;
    let b = client
        .create(CreateRequest {
            handle: Some("named".to_string()),
            ..Default::default()
        })
        .await
        .unwrap()
        .handle;
    assert_eq!(b, "named");

    let mut expected = vec![a.clone(), b.clone()];
    expected.sort();
    assert_eq!(client.list(ListRequest {}).await.unwrap().handles, expected);

    client.destroy(DestroyRequest { handle: a.clone() }).await.unwrap();
    assert_eq!(client.list(ListRequest {}).await.unwrap().handles, vec![b]);

    let err = client.info(InfoRequest { handle: a }).await.unwrap_err();
    assert!(matches!(err, ClientError::Server { ref message, .. } if message.starts_with("Unknown handle")));
}

#[tokio::test]
async fn test_state_error_after_stop() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;
    let handle = client.create(CreateRequest::default()).await.unwrap().handle;

    client
        .stop(StopRequest {
            handle: handle.clone(),
            ..Default::default()
        })
        .await
        .unwrap();
    let err = client
        .spawn(SpawnRequest {
            handle: handle.clone(),
            script: "true".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    match err {
        ClientError::Server { message, data, .. } => {
            assert_eq!(message, "Container state is stopped, expected one of: active");
            assert_eq!(data.as_deref(), Some("stopped"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let info = client.info(InfoRequest { handle }).await.unwrap();
    assert_eq!(info.state.as_deref(), Some("stopped"));
}

#[tokio::test]
async fn test_copy_in_and_out() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;
    let handle = client.create(CreateRequest::default()).await.unwrap().handle;

    let source = daemon.dir.path().join("input.txt");
    std::fs::write(&source, b"payload").unwrap();
    client
        .copy_in(CopyInRequest {
            handle: handle.clone(),
            src_path: source.display().to_string(),
            dst_path: "/input.txt".to_string(),
        })
        .await
        .unwrap();

    let ran = client
        .run(RunRequest {
            handle: handle.clone(),
            script: "cat input.txt > output.txt".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(ran.exit_status, Some(0));

    let destination = daemon.dir.path().join("output.txt");
    client
        .copy_out(CopyOutRequest {
            handle,
            src_path: "/output.txt".to_string(),
            dst_path: destination.display().to_string(),
            owner: None,
        })
        .await
        .unwrap();
    assert_eq!(std::fs::read(destination).unwrap(), b"payload");
}

// ============================================================================
// Grace Time Tests
// ============================================================================

#[tokio::test]
async fn test_grace_time_destroys_abandoned_container() {
    let daemon = TestDaemon::start().await;
    let handle = {
        let mut client = daemon.client().await;
        client
            .create(CreateRequest {
                grace_time: Some(1),
                ..Default::default()
            })
            .await
            .unwrap()
            .handle
    };

    let registry = &daemon.runtime.context().registry;
    let target = handle.as_str();
    assert!(
        eventually(Duration::from_secs(5), || async move { !registry.contains(target).await }).await,
        "container outlived its grace time"
    );

    let mut client = daemon.client().await;
    let err = client.info(InfoRequest { handle }).await.unwrap_err();
    assert!(matches!(err, ClientError::Server { ref message, .. } if message.starts_with("Unknown handle")));
}

#[tokio::test]
async fn test_reconnect_within_grace_time_keeps_container() {
    let daemon = TestDaemon::start().await;
    let handle = {
        let mut client = daemon.client().await;
        client
            .create(CreateRequest {
                grace_time: Some(2),
                ..Default::default()
            })
            .await
            .unwrap()
            .handle
    };

    tokio::time::sleep(Duration::from_millis(500)).await;
    let mut client = daemon.client().await;
    client
        .info(InfoRequest {
            handle: handle.clone(),
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    let info = client.info(InfoRequest { handle }).await.unwrap();
    assert_eq!(info.state.as_deref(), Some("active"));
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[tokio::test]
async fn test_concurrent_links_from_two_connections() {
    let daemon = TestDaemon::start().await;
    let mut first = daemon.client().await;
    let mut second = daemon.client().await;

    let handle = first.create(CreateRequest::default()).await.unwrap().handle;
    let job_id = first
        .spawn(SpawnRequest {
            handle: handle.clone(),
            script: "echo run >> runs.log; sleep 0.3; echo done".to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
        .job_id;

    let (a, b) = tokio::join!(
        first.link(LinkRequest {
            handle: handle.clone(),
            job_id,
        }),
        second.link(LinkRequest {
            handle: handle.clone(),
            job_id,
        }),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.exit_status, b.exit_status);
    assert_eq!(a.stdout, b.stdout);
    assert_eq!(a.stdout.as_deref(), Some(&b"done\n"[..]));

    let log = first
        .run(RunRequest {
            handle,
            script: "cat runs.log".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(log.stdout.as_deref(), Some(&b"run\n"[..]));
}

#[tokio::test]
async fn test_resources_reused_after_destroy() {
    let daemon = TestDaemon::start_with(|config| config.network_pool_size = 1).await;
    let mut client = daemon.client().await;

    let first = client.create(CreateRequest::default()).await.unwrap().handle;
    let err = client.create(CreateRequest::default()).await.unwrap_err();
    assert!(matches!(err, ClientError::Server { ref message, .. } if message == "No network available"));

    client.destroy(DestroyRequest { handle: first.clone() }).await.unwrap();
    let second = client.create(CreateRequest::default()).await.unwrap().handle;
    assert_eq!(first, second);
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_shutdown_drains_idle_connections() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;
    client.ping(PingRequest {}).await.unwrap();
    client.create(CreateRequest::default()).await.unwrap();

    let drainer = daemon.runtime.drainer().clone();
    let socket_path = daemon.socket_path.clone();
    tokio::time::timeout(Duration::from_secs(5), daemon.runtime.shutdown())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(drainer.state(), DrainState::Done);
    assert!(!socket_path.exists());
    assert!(client.ping(PingRequest {}).await.is_err());
}
