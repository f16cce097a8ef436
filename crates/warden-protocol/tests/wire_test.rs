// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire-level tests: typed messages through framing and flag mapping together.

use bytes::BytesMut;
use warden_protocol::messages::*;
use warden_protocol::{DEFAULT_DELIMITER, Parsed, Request, Response, decode_frames, encode_frame};

fn all_requests() -> Vec<Request> {
    vec![
        Request::Ping(PingRequest {}),
        Request::Create(CreateRequest {
            grace_time: Some(30),
            env: vec![EnvironmentVariable {
                key: "PATH".into(),
                value: "/bin".into(),
            }],
            ..Default::default()
        }),
        Request::Spawn(SpawnRequest {
            handle: "0afe0004".into(),
            script: "printf 'a\\r\\nb'".into(),
            ..Default::default()
        }),
        Request::NetOut(NetOutRequest {
            handle: "0afe0004".into(),
            protocol: Some(Protocol::Icmp as i32),
            icmp_type: Some(8),
            ..Default::default()
        }),
        Request::Echo(EchoRequest {
            message: "x".repeat(70_000),
        }),
    ]
}

#[test]
fn test_requests_survive_byte_at_a_time_framing() {
    let mut wire = Vec::new();
    for request in all_requests() {
        wire.extend_from_slice(&encode_frame(&request.encode()));
    }

    let mut buf = BytesMut::new();
    let mut decoded = Vec::new();
    for byte in wire {
        buf.extend_from_slice(&[byte]);
        for payload in decode_frames(&mut buf) {
            decoded.push(Request::decode(&payload.unwrap()).unwrap());
        }
    }

    assert_eq!(decoded, all_requests());
    assert!(buf.is_empty());
}

#[test]
fn test_flags_to_wire_and_back() {
    let tokens: Vec<String> = [
        "--handle", "0afe0004", "--script", "ls", "--rlimits.nofile", "16",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let request = match Request::from_flags("run", &tokens, DEFAULT_DELIMITER).unwrap() {
        Parsed::Message(r) => r,
        Parsed::Help(h) => panic!("unexpected help: {}", h),
    };
    let decoded = Request::decode(&request.encode()).unwrap();
    assert_eq!(decoded, request);

    let flags = decoded.to_flags(DEFAULT_DELIMITER).unwrap();
    assert!(flags.contains(&("rlimits.nofile".to_string(), "16".to_string())));
}

#[test]
fn test_response_flags_render() {
    let response = Response::Info(InfoResponse {
        state: Some("active".into()),
        job_ids: vec![1, 2],
        ..Default::default()
    });
    let flags = response.to_flags(DEFAULT_DELIMITER).unwrap();
    assert_eq!(
        flags,
        vec![
            ("state".to_string(), "active".to_string()),
            ("job_ids[0]".to_string(), "1".to_string()),
            ("job_ids[1]".to_string(), "2".to_string()),
        ]
    );
}
