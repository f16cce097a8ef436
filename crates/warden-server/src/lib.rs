// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Warden Server - Container Management Daemon
//!
//! Clients connect over a Unix socket (or TCP), send length-prefixed protobuf
//! requests, and get containers created, jobs run inside them, and resources
//! limited.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                 Clients (warden-ctl, WardenClient)               │
//! └──────────────────────────────────────────────────────────────────┘
//!                                 │ frames
//!                                 ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  server: listener + drain       connection: one request at a time │
//! └──────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  handlers ─► container registry ─► container (hook phases, jobs)  │
//! └──────────────────────────────────────────────────────────────────┘
//!            │                                 │
//!            ▼                                 ▼
//! ┌─────────────────────┐          ┌──────────────────────────────────┐
//! │  pools (net/uid/    │          │  backend (insecure | linux)       │
//! │  port)              │          │  supervisor (reaper, processes)   │
//! └─────────────────────┘          └──────────────────────────────────┘
//! ```
//!
//! # Container State Machine
//!
//! ```text
//!   BORN ──create──► ACTIVE ──stop──► STOPPED
//!     │                 │                │
//!     └─────────────────┴────destroy─────┴──► DESTROYED
//! ```
//!
//! | Request | Valid states |
//! |---------|--------------|
//! | `spawn`, `run`, `net_in`, `net_out`, `copy_in`, `attach_image` | active |
//! | `stop`, `info`, `link`, `stream`, `copy_out`, `limit_*`, `detach_image` | active, stopped |
//! | `destroy` | any |
//!
//! # Configuration
//!
//! Loaded from `WARDEN_*` environment variables; see [`config::Config`].
//!
//! # Modules
//!
//! - [`backend`]: Backend drivers and optional capabilities
//! - [`config`]: Daemon configuration from environment variables
//! - [`connection`]: Per-connection request loop
//! - [`container`]: Container lifecycle engine
//! - [`handlers`]: Request routing
//! - [`pool`]: Network, uid and port pools
//! - [`runtime`]: Embeddable runtime with graceful shutdown
//! - [`server`]: Listener and drain state machine
//! - [`supervisor`]: Child process supervision

/// Backend drivers (insecure, linux) and their capabilities.
pub mod backend;

/// Daemon configuration loaded from environment variables.
pub mod config;

/// One client connection: frame decoding and ordered responses.
pub mod connection;

/// Container lifecycle engine.
pub mod container;

/// Handle to container lookup.
pub mod container_registry;

/// State shared across connections.
pub mod context;

/// Error types with error response mapping.
pub mod error;

/// Request handlers.
pub mod handlers;

/// Resource pools.
pub mod pool;

/// Embeddable runtime.
pub mod runtime;

/// Listener and drain coordination.
pub mod server;

/// Process supervisor.
pub mod supervisor;

pub use config::Config;
pub use error::{Error, Result};
pub use runtime::WardenRuntime;
