// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Optional resource controllers a backend may provide.
//!
//! The lifecycle engine calls through these when present and falls back to
//! recording the requested values when absent.

use std::sync::Arc;

use async_trait::async_trait;
use warden_protocol::messages::NetOutRequest;

use super::traits::ContainerSpec;
use crate::error::Result;

/// Memory cgroup control.
#[async_trait]
pub trait MemoryLimiter: Send + Sync {
    async fn limit_memory(&self, spec: &ContainerSpec, limit_in_bytes: u64) -> Result<()>;

    /// Command that exits successfully once the container hits its memory
    /// limit. `None` disables OOM detection.
    fn oom_notifier(&self, spec: &ContainerSpec) -> Option<Vec<String>> {
        let _ = spec;
        None
    }
}

/// Disk usage limits, all in their native units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskLimits {
    pub block_limit: Option<u64>,
    pub inode_limit: Option<u64>,
    pub byte_limit: Option<u64>,
}

impl DiskLimits {
    /// Overlay the values set in `other`.
    pub fn merge(&mut self, other: DiskLimits) {
        self.block_limit = other.block_limit.or(self.block_limit);
        self.inode_limit = other.inode_limit.or(self.inode_limit);
        self.byte_limit = other.byte_limit.or(self.byte_limit);
    }

    pub fn is_empty(&self) -> bool {
        self.block_limit.is_none() && self.inode_limit.is_none() && self.byte_limit.is_none()
    }
}

/// Per-uid disk quota.
#[async_trait]
pub trait DiskQuota: Send + Sync {
    async fn set_quota(&self, spec: &ContainerSpec, limits: DiskLimits) -> Result<()>;
}

/// Port forwarding, egress rules and traffic shaping.
#[async_trait]
pub trait NetworkController: Send + Sync {
    async fn net_in(&self, spec: &ContainerSpec, host_port: u16, container_port: u16) -> Result<()>;

    async fn net_out(&self, spec: &ContainerSpec, rule: &NetOutRequest) -> Result<()>;

    async fn limit_bandwidth(&self, spec: &ContainerSpec, rate: u64, burst: u64) -> Result<()>;
}

/// CPU share control.
#[async_trait]
pub trait CpuLimiter: Send + Sync {
    async fn limit_cpu(&self, spec: &ContainerSpec, shares: u64) -> Result<()>;
}

/// The set of controllers a backend offers.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub memory: Option<Arc<dyn MemoryLimiter>>,
    pub disk: Option<Arc<dyn DiskQuota>>,
    pub network: Option<Arc<dyn NetworkController>>,
    pub cpu: Option<Arc<dyn CpuLimiter>>,
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("memory", &self.memory.is_some())
            .field("disk", &self.disk.is_some())
            .field("network", &self.network.is_some())
            .field("cpu", &self.cpu.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_limits_merge() {
        let mut current = DiskLimits {
            block_limit: Some(10),
            inode_limit: Some(20),
            byte_limit: None,
        };
        current.merge(DiskLimits {
            inode_limit: Some(5),
            byte_limit: Some(1024),
            ..Default::default()
        });
        assert_eq!(
            current,
            DiskLimits {
                block_limit: Some(10),
                inode_limit: Some(5),
                byte_limit: Some(1024),
            }
        );
        assert!(!current.is_empty());
        assert!(DiskLimits::default().is_empty());
    }
}
