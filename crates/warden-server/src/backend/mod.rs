// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backend drivers.
//!
//! The lifecycle engine never touches the host directly. Everything that
//! creates, starts, stops or tears down a container goes through a [`Backend`].

mod capabilities;
pub mod insecure;
pub mod linux;
mod traits;

pub use capabilities::*;
pub use insecure::InsecureBackend;
pub use linux::LinuxBackend;
pub use traits::*;

use std::sync::Arc;

use crate::config::{BackendKind, Config};
use crate::supervisor::Supervisor;

/// Build the backend selected by the configuration.
pub fn from_config(config: &Config, supervisor: Supervisor) -> Arc<dyn Backend> {
    match config.backend {
        BackendKind::Insecure => Arc::new(InsecureBackend::new(&config.container_root, supervisor)),
        BackendKind::Linux => Arc::new(LinuxBackend::new(&config.container_root, supervisor)),
    }
}
