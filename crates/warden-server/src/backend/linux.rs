// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Linux backend.
//!
//! Delegates to the shell scripts shipped in the container root
//! (`create.sh`, `destroy.sh`, and the per-container `start.sh`, `stop.sh`,
//! `net.sh`). Jobs enter the container through `bin/wsh`. Resource limits are
//! applied through cgroup files and `setquota`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};
use warden_protocol::messages::{Mode, NetOutRequest};

use super::capabilities::*;
use super::traits::*;
use crate::error::{Error, Result};
use crate::supervisor::{SpawnOptions, Supervisor};

const DEFAULT_CGROUP_ROOT: &str = "/tmp/warden/cgroup";

#[derive(Debug, Clone)]
pub struct LinuxBackend {
    root: PathBuf,
    cgroup_root: PathBuf,
    quota_filesystem: Option<String>,
    supervisor: Supervisor,
}

fn s(value: impl ToString) -> String {
    value.to_string()
}

fn script(path: &Path, name: &str) -> String {
    path.join(name).display().to_string()
}

fn wsh(spec: &ContainerSpec) -> Vec<String> {
    vec![
        script(&spec.path, "bin/wsh"),
        s("--socket"),
        script(&spec.path, "run/wshd.sock"),
    ]
}

fn cgroup_dir(cgroup_root: &Path, subsystem: &str, spec: &ContainerSpec) -> PathBuf {
    cgroup_root.join(subsystem).join(format!("instance-{}", spec.id))
}

async fn write_cgroup(dir: &Path, file: &str, value: u64) -> Result<()> {
    let path = dir.join(file);
    tokio::fs::write(&path, value.to_string())
        .await
        .map_err(|e| Error::Backend(format!("{}: {}", path.display(), e)))
}

impl LinuxBackend {
    pub fn new(root: impl Into<PathBuf>, supervisor: Supervisor) -> Self {
        Self {
            root: root.into(),
            cgroup_root: PathBuf::from(DEFAULT_CGROUP_ROOT),
            quota_filesystem: None,
            supervisor,
        }
    }

    pub fn with_cgroup_root(mut self, cgroup_root: impl Into<PathBuf>) -> Self {
        self.cgroup_root = cgroup_root.into();
        self
    }

    /// Filesystem `setquota` applies disk limits on. Quotas are disabled when
    /// unset.
    pub fn with_quota_filesystem(mut self, filesystem: impl Into<String>) -> Self {
        self.quota_filesystem = Some(filesystem.into());
        self
    }

    /// Environment handed to `create.sh`.
    fn create_env(spec: &ContainerSpec) -> Vec<(String, String)> {
        let mut env = vec![
            (s("id"), spec.id.clone()),
            (s("network_host_ip"), s(spec.network.host_ip())),
            (s("network_container_ip"), s(spec.network.container_ip())),
            (s("network_netmask"), s("255.255.255.252")),
            (s("user_uid"), s(spec.uid)),
        ];
        if let Some(rootfs) = &spec.rootfs {
            env.push((s("rootfs_path"), rootfs.clone()));
        }
        env.push((s("bind_mount_count"), s(spec.bind_mounts.len())));
        for (i, mount) in spec.bind_mounts.iter().enumerate() {
            let mode = match mount.mode() {
                Mode::Ro => "ro",
                Mode::Rw => "rw",
            };
            env.push((format!("bind_mount_{i}"), format!("{}:{}:{}", mount.src_path, mount.dst_path, mode)));
        }
        env
    }

    fn rsync_shell(spec: &ContainerSpec) -> String {
        let mut shell = wsh(spec);
        shell.push(s("--rsh"));
        shell.join(" ")
    }

    async fn rsync(&self, spec: &ContainerSpec, src: String, dst: String) -> Result<()> {
        let argv = vec![
            s("rsync"),
            s("-r"),
            s("-p"),
            s("--links"),
            s("-e"),
            Self::rsync_shell(spec),
            src,
            dst,
        ];
        run_checked(&self.supervisor, argv, Vec::new(), None).await
    }
}

#[async_trait]
impl Backend for LinuxBackend {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn container_path(&self, id: &str) -> PathBuf {
        self.root.join("instances").join(id)
    }

    async fn setup(&self) -> Result<()> {
        let setup = self.root.join("setup.sh");
        if tokio::fs::try_exists(&setup).await? {
            info!(script = %setup.display(), "Running backend setup");
            run_checked(&self.supervisor, vec![script(&self.root, "setup.sh")], Vec::new(), Some(&self.root))
                .await?;
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<()> {
        let argv = vec![script(&self.root, "create.sh"), spec.path.display().to_string()];
        run_checked(&self.supervisor, argv, Self::create_env(spec), Some(&self.root)).await?;
        debug!(handle = %spec.handle, "Container created");
        Ok(())
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<()> {
        run_checked(&self.supervisor, vec![script(&spec.path, "start.sh")], Vec::new(), Some(&spec.path)).await
    }

    async fn stop(&self, spec: &ContainerSpec, kill: bool) -> Result<()> {
        let mut argv = vec![script(&spec.path, "stop.sh")];
        if kill {
            argv.extend([s("-w"), s("0")]);
        }
        run_checked(&self.supervisor, argv, Vec::new(), Some(&spec.path)).await
    }

    async fn destroy(&self, spec: &ContainerSpec) -> Result<()> {
        let argv = vec![script(&self.root, "destroy.sh"), spec.path.display().to_string()];
        run_checked(&self.supervisor, argv, Vec::new(), Some(&self.root)).await
    }

    fn job_command(&self, spec: &ContainerSpec, job: &JobRequest) -> Result<JobCommand> {
        let mut argv = wsh(spec);
        argv.extend([s("--user"), s(if job.privileged { "root" } else { "vcap" }), s("/bin/bash")]);

        let mut input = String::new();
        for (key, value) in &spec.env {
            input.push_str(&format!("export {}={}\n", key, shell_quote(value)));
        }
        if let Some(limits) = &job.rlimits {
            input.push_str(&ulimit_prologue(limits));
        }
        input.push_str(&job.script);

        Ok(JobCommand {
            argv,
            options: SpawnOptions {
                input: Some(Bytes::from(input)),
                ..Default::default()
            },
        })
    }

    async fn copy_in(&self, spec: &ContainerSpec, src: &str, dst: &str) -> Result<()> {
        self.rsync(spec, s(src), format!("vcap@container:{dst}")).await
    }

    async fn copy_out(&self, spec: &ContainerSpec, src: &str, dst: &str, owner: Option<&str>) -> Result<()> {
        self.rsync(spec, format!("vcap@container:{src}"), s(dst)).await?;
        if let Some(owner) = owner {
            run_checked(&self.supervisor, vec![s("chown"), s("-R"), s(owner), s(dst)], Vec::new(), None).await?;
        }
        Ok(())
    }

    async fn attach_image(&self, spec: &ContainerSpec, image: &str, mount: Option<&str>) -> Result<String> {
        let mut argv = vec![script(&spec.path, "attach_image.sh"), s(image)];
        argv.extend(mount.map(s));
        let status = self
            .supervisor
            .run(&argv, SpawnOptions::default())
            .await?;
        if !status.success() {
            return Err(Error::Backend(format!(
                "attach_image.sh failed: {}",
                String::from_utf8_lossy(&status.output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&status.output.stdout).trim().to_string())
    }

    async fn detach_image(&self, spec: &ContainerSpec, mount: Option<&str>) -> Result<()> {
        let mut argv = vec![script(&spec.path, "detach_image.sh")];
        argv.extend(mount.map(s));
        run_checked(&self.supervisor, argv, Vec::new(), Some(&spec.path)).await
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            memory: Some(Arc::new(CgroupMemory {
                cgroup_root: self.cgroup_root.clone(),
            })),
            cpu: Some(Arc::new(CgroupCpu {
                cgroup_root: self.cgroup_root.clone(),
            })),
            disk: self.quota_filesystem.clone().map(|filesystem| {
                Arc::new(SetQuota {
                    filesystem,
                    supervisor: self.supervisor.clone(),
                }) as Arc<dyn DiskQuota>
            }),
            network: Some(Arc::new(NetScripts {
                supervisor: self.supervisor.clone(),
            })),
        }
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

struct CgroupMemory {
    cgroup_root: PathBuf,
}

#[async_trait]
impl MemoryLimiter for CgroupMemory {
    async fn limit_memory(&self, spec: &ContainerSpec, limit_in_bytes: u64) -> Result<()> {
        let dir = cgroup_dir(&self.cgroup_root, "memory", spec);
        // memsw must never drop below the plain limit, so try it on both sides
        let _ = write_cgroup(&dir, "memory.memsw.limit_in_bytes", limit_in_bytes).await;
        write_cgroup(&dir, "memory.limit_in_bytes", limit_in_bytes).await?;
        let _ = write_cgroup(&dir, "memory.memsw.limit_in_bytes", limit_in_bytes).await;
        Ok(())
    }

    fn oom_notifier(&self, spec: &ContainerSpec) -> Option<Vec<String>> {
        let dir = cgroup_dir(&self.cgroup_root, "memory", spec);
        Some(vec![script(&spec.path, "bin/oom"), dir.display().to_string()])
    }
}

struct CgroupCpu {
    cgroup_root: PathBuf,
}

#[async_trait]
impl CpuLimiter for CgroupCpu {
    async fn limit_cpu(&self, spec: &ContainerSpec, shares: u64) -> Result<()> {
        write_cgroup(&cgroup_dir(&self.cgroup_root, "cpu", spec), "cpu.shares", shares).await
    }
}

struct SetQuota {
    filesystem: String,
    supervisor: Supervisor,
}

#[async_trait]
impl DiskQuota for SetQuota {
    async fn set_quota(&self, spec: &ContainerSpec, limits: DiskLimits) -> Result<()> {
        // byte limits are converted to 1KiB quota blocks
        let blocks = limits
            .byte_limit
            .map(|bytes| bytes.div_ceil(1024))
            .or(limits.block_limit)
            .unwrap_or(0);
        let argv = vec![
            s("setquota"),
            s("-u"),
            s(spec.uid),
            s(0),
            s(blocks),
            s(0),
            s(limits.inode_limit.unwrap_or(0)),
            self.filesystem.clone(),
        ];
        run_checked(&self.supervisor, argv, Vec::new(), None).await
    }
}

struct NetScripts {
    supervisor: Supervisor,
}

#[async_trait]
impl NetworkController for NetScripts {
    async fn net_in(&self, spec: &ContainerSpec, host_port: u16, container_port: u16) -> Result<()> {
        let env = vec![
            (s("HOST_PORT"), s(host_port)),
            (s("CONTAINER_PORT"), s(container_port)),
        ];
        run_checked(&self.supervisor, vec![script(&spec.path, "net.sh"), s("in")], env, Some(&spec.path)).await
    }

    async fn net_out(&self, spec: &ContainerSpec, rule: &NetOutRequest) -> Result<()> {
        let mut env = vec![(s("PROTOCOL"), s(format!("{:?}", rule.protocol()).to_lowercase()))];
        if let Some(network) = &rule.network {
            env.push((s("NETWORK"), network.clone()));
        }
        if let Some(port) = rule.port {
            env.push((s("PORTS"), s(port)));
        }
        if let Some(range) = &rule.port_range {
            env.push((s("PORTS"), range.clone()));
        }
        if let Some(icmp_type) = rule.icmp_type {
            env.push((s("ICMP_TYPE"), s(icmp_type)));
        }
        if let Some(icmp_code) = rule.icmp_code {
            env.push((s("ICMP_CODE"), s(icmp_code)));
        }
        if rule.log() {
            env.push((s("LOG"), s("true")));
        }
        run_checked(&self.supervisor, vec![script(&spec.path, "net.sh"), s("out")], env, Some(&spec.path)).await
    }

    async fn limit_bandwidth(&self, spec: &ContainerSpec, rate: u64, burst: u64) -> Result<()> {
        let env = vec![(s("RATE"), s(rate)), (s("BURST"), s(burst))];
        run_checked(&self.supervisor, vec![script(&spec.path, "net_rate.sh")], env, Some(&spec.path)).await
    }
}
