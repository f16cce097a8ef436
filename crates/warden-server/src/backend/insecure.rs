// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Insecure backend.
//!
//! A container is a plain directory and jobs are ordinary host processes
//! running `/bin/sh` inside it. There is no isolation; this backend exists for
//! development and tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use super::traits::*;
use crate::error::{Error, Result};
use crate::supervisor::{SpawnOptions, Supervisor};

#[derive(Debug, Clone)]
pub struct InsecureBackend {
    root: PathBuf,
    supervisor: Supervisor,
}

impl InsecureBackend {
    pub fn new(root: impl Into<PathBuf>, supervisor: Supervisor) -> Self {
        Self {
            root: root.into(),
            supervisor,
        }
    }

    /// Resolve a container-absolute path under the container directory.
    fn inside(spec: &ContainerSpec, path: &str) -> PathBuf {
        spec.path.join(path.trim_start_matches('/'))
    }

    async fn copy(&self, src: &Path, dst: &Path) -> Result<()> {
        let argv = vec![
            "cp".to_string(),
            "-R".to_string(),
            src.display().to_string(),
            dst.display().to_string(),
        ];
        run_checked(&self.supervisor, argv, Vec::new(), None).await
    }
}

#[async_trait]
impl Backend for InsecureBackend {
    fn name(&self) -> &'static str {
        "insecure"
    }

    fn container_path(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    async fn setup(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => info!(root = %self.root.display(), "Removed stale containers"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<()> {
        tokio::fs::create_dir_all(&spec.path).await?;
        for mount in &spec.bind_mounts {
            let link = Self::inside(spec, &mount.dst_path);
            if let Some(parent) = link.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::symlink(&mount.src_path, &link).await?;
        }
        debug!(handle = %spec.handle, path = %spec.path.display(), "Created container directory");
        Ok(())
    }

    async fn start(&self, _spec: &ContainerSpec) -> Result<()> {
        Ok(())
    }

    async fn stop(&self, _spec: &ContainerSpec, _kill: bool) -> Result<()> {
        // Jobs are host processes and are terminated by the engine
        Ok(())
    }

    async fn destroy(&self, spec: &ContainerSpec) -> Result<()> {
        match tokio::fs::remove_dir_all(&spec.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn job_command(&self, spec: &ContainerSpec, job: &JobRequest) -> Result<JobCommand> {
        let mut script = String::new();
        if let Some(limits) = &job.rlimits {
            script.push_str(&ulimit_prologue(limits));
        }
        script.push_str(&job.script);

        Ok(JobCommand {
            argv: vec!["/bin/sh".to_string()],
            options: SpawnOptions {
                input: Some(Bytes::from(script)),
                cwd: Some(spec.path.clone()),
                env: spec.env.clone(),
                ..Default::default()
            },
        })
    }

    async fn copy_in(&self, spec: &ContainerSpec, src: &str, dst: &str) -> Result<()> {
        self.copy(Path::new(src), &Self::inside(spec, dst)).await
    }

    async fn copy_out(&self, spec: &ContainerSpec, src: &str, dst: &str, owner: Option<&str>) -> Result<()> {
        self.copy(&Self::inside(spec, src), Path::new(dst)).await?;
        if let Some(owner) = owner {
            let argv = vec!["chown".to_string(), "-R".to_string(), owner.to_string(), dst.to_string()];
            run_checked(&self.supervisor, argv, Vec::new(), None)
                .await
                .map_err(|e| Error::Backend(format!("chown failed: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Network;
    use std::net::Ipv4Addr;
    use warden_protocol::messages::BindMount;

    fn spec(root: &Path) -> ContainerSpec {
        let network = Network::new(Ipv4Addr::new(10, 254, 0, 4));
        ContainerSpec {
            handle: network.handle(),
            id: network.handle(),
            path: root.join(network.handle()),
            network,
            uid: 10000,
            bind_mounts: Vec::new(),
            rootfs: None,
            env: vec![("GREETING".to_string(), "hello".to_string())],
        }
    }

    #[tokio::test]
    async fn test_setup_removes_stale_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("containers");
        std::fs::create_dir_all(root.join("stale")).unwrap();

        let backend = InsecureBackend::new(&root, Supervisor::start().unwrap());
        backend.setup().await.unwrap();
        assert!(root.exists());
        assert!(!root.join("stale").exists());
    }

    #[tokio::test]
    async fn test_create_and_destroy() {
        let dir = tempfile::tempdir().unwrap();
        let backend = InsecureBackend::new(dir.path(), Supervisor::start().unwrap());
        let mut spec = spec(dir.path());
        let source = dir.path().join("shared");
        std::fs::create_dir(&source).unwrap();
        spec.bind_mounts.push(BindMount {
            src_path: source.display().to_string(),
            dst_path: "/mnt/shared".to_string(),
            mode: 0,
        });

        backend.create(&spec).await.unwrap();
        assert!(spec.path.is_dir());
        assert!(spec.path.join("mnt/shared").exists());

        backend.destroy(&spec).await.unwrap();
        assert!(!spec.path.exists());
        // Destroying twice is fine
        backend.destroy(&spec).await.unwrap();
    }

    #[tokio::test]
    async fn test_job_runs_in_container_directory() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::start().unwrap();
        let backend = InsecureBackend::new(dir.path(), supervisor.clone());
        let spec = spec(dir.path());
        backend.create(&spec).await.unwrap();

        let command = backend
            .job_command(
                &spec,
                &JobRequest {
                    script: "echo $GREETING > out.txt; cat out.txt".to_string(),
                    ..Default::default()
                },
            )
            .unwrap();
        let status = supervisor.run(&command.argv, command.options).await.unwrap();
        assert_eq!(&status.output.stdout[..], b"hello\n");
        assert!(spec.path.join("out.txt").exists());
    }

    #[tokio::test]
    async fn test_copy_in_and_out() {
        let dir = tempfile::tempdir().unwrap();
        let backend = InsecureBackend::new(dir.path().join("root"), Supervisor::start().unwrap());
        let spec = spec(&dir.path().join("root"));
        backend.create(&spec).await.unwrap();

        let src = dir.path().join("input.txt");
        std::fs::write(&src, "payload").unwrap();
        backend
            .copy_in(&spec, src.to_str().unwrap(), "/input.txt")
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(spec.path.join("input.txt")).unwrap(), "payload");

        let dst = dir.path().join("output.txt");
        backend
            .copy_out(&spec, "/input.txt", dst.to_str().unwrap(), None)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dst).unwrap(), "payload");
    }

    #[tokio::test]
    async fn test_copy_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backend = InsecureBackend::new(dir.path(), Supervisor::start().unwrap());
        let spec = spec(dir.path());
        backend.create(&spec).await.unwrap();
        let err = backend
            .copy_in(&spec, "/nonexistent/warden", "/x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
    }

    #[tokio::test]
    async fn test_attach_image_not_implemented() {
        let dir = tempfile::tempdir().unwrap();
        let backend = InsecureBackend::new(dir.path(), Supervisor::start().unwrap());
        let err = backend
            .attach_image(&spec(dir.path()), "/tmp/image", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotImplemented("attach_image")));
    }
}
