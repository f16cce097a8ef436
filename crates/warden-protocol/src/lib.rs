// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Warden Protocol - framing, Protobuf messages and flag mapping
//!
//! This crate provides the wire protocol spoken between the warden daemon and
//! its clients (including the `warden-ctl` shell).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    warden-protocol                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Flags: command line <-> message mapping, help generation   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Wrap: numeric type tag + encoded payload                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Serialization: Protobuf (prost)                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Framing: "<len>\r\n<payload>\r\n" over Unix or TCP         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use warden_protocol::{WardenClient, messages::*};
//!
//! let mut client = WardenClient::connect_unix("/tmp/warden.sock".as_ref()).await?;
//! let handle = client.create(CreateRequest::default()).await?.handle;
//! let job = client
//!     .spawn(SpawnRequest {
//!         handle: handle.clone(),
//!         script: "echo hi".to_string(),
//!         ..Default::default()
//!     })
//!     .await?;
//! let status = client
//!     .link(LinkRequest { handle, job_id: job.job_id })
//!     .await?;
//! ```

pub mod client;
pub mod flags;
pub mod frame;
pub mod messages;
pub mod schema;
pub mod wrap;

pub use client::{ClientError, WardenClient};
pub use flags::{DEFAULT_DELIMITER, FlagError, Help, Parsed};
pub use frame::{FrameCodec, FrameError, decode_frame, decode_frames, encode_frame};
pub use schema::{Described, MessageSchema};
pub use wrap::{Request, Response, Type};
