// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Warden Ctl - shell for the warden daemon
//!
//! Every protocol request is a command; its fields are flags, named the way
//! the flag mapper names them:
//!
//! ```text
//! warden> create --grace_time 30
//! handle : 0afe0000
//! warden> run --handle 0afe0000 --script 'echo hi' --rlimits.nofile 64
//! hi
//! exit_status : 0
//! info.state : active
//! ...
//! warden> net in --handle 0afe0000 --host_port 61001
//! host_port : 61001
//! container_port : 61001
//! ```
//!
//! Lines read from a pipe run without a prompt, and the session exits with
//! the status of the last command.

pub mod command;
pub mod output;
pub mod shell;
pub mod tokenize;

pub use shell::{CtlError, Outcome, Shell};
