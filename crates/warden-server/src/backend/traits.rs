// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backend trait definitions.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use warden_protocol::messages::{BindMount, ResourceLimits};

use super::capabilities::Capabilities;
use crate::error::{Error, Result};
use crate::pool::Network;
use crate::supervisor::{SpawnOptions, Supervisor};

/// Everything a backend knows about one container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Client-facing handle
    pub handle: String,
    /// Backend identifier, derived from the network
    pub id: String,
    /// Container depot directory
    pub path: PathBuf,
    pub network: Network,
    pub uid: u32,
    pub bind_mounts: Vec<BindMount>,
    pub rootfs: Option<String>,
    /// Exported to every job
    pub env: Vec<(String, String)>,
}

/// A job ready to hand to the supervisor.
#[derive(Debug, Clone)]
pub struct JobCommand {
    pub argv: Vec<String>,
    pub options: SpawnOptions,
}

/// What to run for a job.
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    pub script: String,
    pub privileged: bool,
    pub rlimits: Option<ResourceLimits>,
}

/// Container backend driver.
///
/// Operations a backend does not support keep the default implementation,
/// which reports them as not implemented.
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Backend identifier (e.g. "insecure", "linux")
    fn name(&self) -> &'static str;

    /// Directory holding the container with this id.
    fn container_path(&self, id: &str) -> PathBuf;

    /// Prepare the host once at daemon start.
    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    /// Lay out the container on the host.
    async fn create(&self, spec: &ContainerSpec) -> Result<()> {
        let _ = spec;
        Err(Error::NotImplemented("create"))
    }

    /// Boot a created container.
    async fn start(&self, spec: &ContainerSpec) -> Result<()> {
        let _ = spec;
        Err(Error::NotImplemented("start"))
    }

    /// Stop everything running in the container.
    async fn stop(&self, spec: &ContainerSpec, kill: bool) -> Result<()> {
        let _ = (spec, kill);
        Err(Error::NotImplemented("stop"))
    }

    /// Remove the container from the host.
    async fn destroy(&self, spec: &ContainerSpec) -> Result<()> {
        let _ = spec;
        Err(Error::NotImplemented("destroy"))
    }

    /// Command line and options that run a job's script in the container.
    fn job_command(&self, spec: &ContainerSpec, job: &JobRequest) -> Result<JobCommand> {
        let _ = (spec, job);
        Err(Error::NotImplemented("spawn"))
    }

    async fn copy_in(&self, spec: &ContainerSpec, src: &str, dst: &str) -> Result<()> {
        let _ = (spec, src, dst);
        Err(Error::NotImplemented("copy_in"))
    }

    async fn copy_out(&self, spec: &ContainerSpec, src: &str, dst: &str, owner: Option<&str>) -> Result<()> {
        let _ = (spec, src, dst, owner);
        Err(Error::NotImplemented("copy_out"))
    }

    /// Attach a disk image; returns the device it was bound to.
    async fn attach_image(&self, spec: &ContainerSpec, image: &str, mount: Option<&str>) -> Result<String> {
        let _ = (spec, image, mount);
        Err(Error::NotImplemented("attach_image"))
    }

    async fn detach_image(&self, spec: &ContainerSpec, mount: Option<&str>) -> Result<()> {
        let _ = (spec, mount);
        Err(Error::NotImplemented("detach_image"))
    }

    /// Optional resource controllers.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}

/// Shell prologue applying resource limits before the job script.
pub fn ulimit_prologue(limits: &ResourceLimits) -> String {
    // ulimit takes 512-byte blocks for fsize and KiB for sizes
    let entries = [
        ("-v", limits.r#as.map(|v| v / 1024)),
        ("-c", limits.core.map(|v| v / 512)),
        ("-t", limits.cpu),
        ("-d", limits.data.map(|v| v / 1024)),
        ("-f", limits.fsize.map(|v| v / 512)),
        ("-l", limits.memlock.map(|v| v / 1024)),
        ("-n", limits.nofile),
        ("-u", limits.nproc),
        ("-m", limits.rss.map(|v| v / 1024)),
        ("-s", limits.stack.map(|v| v / 1024)),
    ];
    entries
        .iter()
        .filter_map(|(flag, value)| value.map(|v| format!("ulimit {flag} {v} 2>/dev/null\n")))
        .collect()
}

/// Run a backend script and turn a non-zero exit into a backend error.
pub(crate) async fn run_checked(
    supervisor: &Supervisor,
    argv: Vec<String>,
    env: Vec<(String, String)>,
    cwd: Option<&Path>,
) -> Result<()> {
    let options = SpawnOptions {
        env,
        cwd: cwd.map(Path::to_path_buf),
        ..Default::default()
    };
    let status = supervisor
        .run(&argv, options)
        .await
        .map_err(|e| Error::Backend(format!("{}: {}", argv.join(" "), e)))?;
    if status.success() {
        return Ok(());
    }
    let reason = match &status.failure {
        Some(failure) => failure.to_string(),
        None => format!("exit status {}", status.output.exit_status().unwrap_or(255)),
    };
    Err(Error::Backend(format!(
        "{} failed ({}): {}",
        argv.join(" "),
        reason,
        String::from_utf8_lossy(&status.output.stderr).trim()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ulimit_prologue_units() {
        let limits = ResourceLimits {
            nofile: Some(64),
            fsize: Some(1024),
            r#as: Some(4096),
            ..Default::default()
        };
        let prologue = ulimit_prologue(&limits);
        assert_eq!(
            prologue,
            "ulimit -v 4 2>/dev/null\nulimit -f 2 2>/dev/null\nulimit -n 64 2>/dev/null\n"
        );
    }

    #[test]
    fn test_ulimit_prologue_empty() {
        assert!(ulimit_prologue(&ResourceLimits::default()).is_empty());
    }

    #[tokio::test]
    async fn test_run_checked_reports_stderr() {
        let supervisor = Supervisor::start().unwrap();
        let argv = vec!["/bin/sh".into(), "-c".into(), "echo broken >&2; exit 2".into()];
        let err = run_checked(&supervisor, argv, Vec::new(), None).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("exit status 2"), "{message}");
        assert!(message.contains("broken"), "{message}");
    }

    #[tokio::test]
    async fn test_run_checked_success() {
        let supervisor = Supervisor::start().unwrap();
        let argv = vec!["/bin/sh".into(), "-c".into(), "test \"$X\" = y".into()];
        run_checked(&supervisor, argv, vec![("X".into(), "y".into())], None)
            .await
            .unwrap();
    }
}
