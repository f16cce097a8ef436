// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container operations behind the dispatch table.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use warden_protocol::messages::*;

use super::{Container, Job, ResponseSink, State};
use crate::backend::{DiskLimits, JobRequest};
use crate::error::{Error, Result};
use crate::supervisor::{Process, SpawnOptions};

fn port(value: u32, what: &str) -> Result<u16> {
    u16::try_from(value).map_err(|_| Error::InvalidRequest(format!("invalid {what}: {value}")))
}

impl Container {
    // ========== Lifecycle ==========

    pub(crate) async fn do_create(&self) -> Result<()> {
        self.ctx.backend.create(&self.spec).await?;
        self.ctx.backend.start(&self.spec).await?;
        self.advance(State::Active).await;
        Ok(())
    }

    pub(crate) async fn do_stop(self: &Arc<Self>, request: StopRequest) -> Result<StopResponse> {
        let kill = request.kill();
        if request.background() {
            let container = self.clone();
            tokio::spawn(async move {
                if let Err(e) = container.stop_internal(kill).await {
                    warn!(handle = %container.handle(), error = %e, "Background stop failed");
                }
            });
        } else {
            self.stop_internal(kill).await?;
        }
        Ok(StopResponse {})
    }

    /// Stop the backend and terminate every job. No-op unless Active.
    ///
    /// On success the state leaves Active under the same lock that snapshots
    /// the jobs, so a job inserted later is rejected rather than missed.
    pub(crate) async fn stop_internal(&self, kill: bool) -> Result<()> {
        if self.state().await != State::Active {
            return Ok(());
        }
        let result = self.ctx.backend.stop(&self.spec, kill).await;

        let grace = if kill { Duration::ZERO } else { self.ctx.config.kill_grace };
        let (jobs, oom_watch) = {
            let mut inner = self.lock().await;
            if result.is_ok() && inner.state < State::Stopped {
                debug!(handle = %self.handle(), from = %inner.state, to = %State::Stopped, "State transition");
                inner.state = State::Stopped;
            }
            (inner.jobs.values().cloned().collect::<Vec<_>>(), inner.oom_watch.take())
        };
        for job in jobs.iter().filter(|job| !job.is_finished()) {
            debug!(handle = %self.handle(), job_id = job.id(), "Terminating job");
            job.kill(grace);
        }
        if let Some(watch) = oom_watch {
            watch.kill(Duration::ZERO);
        }

        result?;
        info!(handle = %self.handle(), kill, "Container stopped");
        Ok(())
    }

    pub(crate) async fn before_destroy(self: &Arc<Self>) -> Result<()> {
        self.ctx.registry.unregister(self).await;
        if let Err(e) = self.stop_internal(true).await {
            debug!(handle = %self.handle(), error = %e, "Stop before destroy failed");
        }
        Ok(())
    }

    pub(crate) async fn do_destroy(&self, _request: DestroyRequest) -> Result<DestroyResponse> {
        {
            let mut inner = self.lock().await;
            if inner.state == State::Destroyed {
                return Ok(DestroyResponse {});
            }
            inner.state = State::Destroyed;
            if let Some(timer) = inner.grace_timer.take() {
                timer.cancel();
            }
        }
        self.ctx.backend.destroy(&self.spec).await?;
        info!(handle = %self.handle(), "Container destroyed");
        Ok(DestroyResponse {})
    }

    pub(crate) async fn do_info(&self, _request: InfoRequest) -> Result<InfoResponse> {
        Ok(self.info().await)
    }

    // ========== Jobs ==========

    pub(crate) async fn job(&self, job_id: u32) -> Result<Job> {
        self.lock()
            .await
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(Error::UnknownJob(job_id))
    }

    pub(crate) async fn do_spawn(&self, request: SpawnRequest) -> Result<SpawnResponse> {
        let discard_output = request.discard_output();
        let job = JobRequest {
            privileged: request.privileged(),
            script: request.script,
            rlimits: request.rlimits,
        };

        let mut command = self.ctx.backend.job_command(&self.spec, &job)?;
        command.options.max_output_bytes = self.ctx.config.job_output_limit;
        command.options.discard_output = discard_output;
        command.options.kill_grace = self.ctx.config.kill_grace;

        let process = self
            .ctx
            .supervisor
            .spawn(&command.argv, command.options)
            .await
            .map_err(|e| Error::Backend(format!("Failed to spawn job: {e}")))?;

        let job_id = self.insert_job(process).await?;
        Ok(SpawnResponse { job_id })
    }

    /// Track a spawned process as a job. The container may have been stopped
    /// while the process was spawning; the process is then killed.
    pub(crate) async fn insert_job(&self, process: Process) -> Result<u32> {
        let mut inner = self.lock().await;
        if inner.state != State::Active {
            let state = inner.state;
            drop(inner);
            debug!(handle = %self.handle(), pid = process.pid(), %state, "Container left active during spawn, killing job");
            process.kill(Duration::ZERO);
            return Err(Error::InvalidState {
                state,
                expected: &[State::Active],
            });
        }
        let job_id = self.ctx.next_job_id();
        debug!(handle = %self.handle(), job_id, pid = process.pid(), "Job spawned");
        inner.jobs.insert(job_id, Job::new(job_id, process));
        Ok(job_id)
    }

    pub(crate) async fn do_link(&self, request: LinkRequest) -> Result<LinkResponse> {
        let job = self.job(request.job_id).await?;
        Ok(job.link(self).await)
    }

    /// Spawn followed by link on the same job.
    pub(crate) async fn do_run(&self, request: RunRequest) -> Result<RunResponse> {
        let SpawnResponse { job_id } = self.do_spawn(request.into()).await?;
        let linked = self
            .do_link(LinkRequest {
                handle: self.handle().to_string(),
                job_id,
            })
            .await?;
        Ok(linked.into())
    }

    pub(crate) async fn do_stream(&self, request: StreamRequest, sink: &ResponseSink) -> Result<StreamResponse> {
        let job = self.job(request.job_id).await?;
        Ok(job.stream(self, sink).await)
    }

    // ========== Network ==========

    pub(crate) async fn do_net_in(&self, request: NetInRequest) -> Result<NetInResponse> {
        let requested_container_port = request.container_port.map(|p| port(p, "container port")).transpose()?;
        let (host_port, acquired) = match request.host_port {
            Some(p) => (port(p, "host port")?, false),
            None => (self.ctx.pools().await.port.acquire()?, true),
        };
        let container_port = requested_container_port.unwrap_or(host_port);

        if let Some(network) = self.ctx.backend.capabilities().network
            && let Err(e) = network.net_in(&self.spec, host_port, container_port).await
        {
            if acquired {
                self.ctx.pools().await.port.release(host_port);
            }
            return Err(e);
        }

        if acquired {
            let mut inner = self.lock().await;
            if inner.released {
                // Destroyed meanwhile; the port must not outlive the container
                drop(inner);
                self.ctx.pools().await.port.release(host_port);
            } else {
                inner.ports.push(host_port);
            }
        }
        debug!(handle = %self.handle(), host_port, container_port, "Port forwarded");
        Ok(NetInResponse {
            host_port: host_port.into(),
            container_port: container_port.into(),
        })
    }

    pub(crate) async fn do_net_out(&self, request: NetOutRequest) -> Result<NetOutResponse> {
        if let Some(network) = self.ctx.backend.capabilities().network {
            network.net_out(&self.spec, &request).await?;
        }
        Ok(NetOutResponse {})
    }

    // ========== Files ==========

    pub(crate) async fn do_copy_in(&self, request: CopyInRequest) -> Result<CopyInResponse> {
        self.ctx
            .backend
            .copy_in(&self.spec, &request.src_path, &request.dst_path)
            .await?;
        Ok(CopyInResponse {})
    }

    pub(crate) async fn do_copy_out(&self, request: CopyOutRequest) -> Result<CopyOutResponse> {
        self.ctx
            .backend
            .copy_out(&self.spec, &request.src_path, &request.dst_path, request.owner.as_deref())
            .await?;
        Ok(CopyOutResponse {})
    }

    pub(crate) async fn do_attach_image(&self, request: AttachImageRequest) -> Result<AttachImageResponse> {
        let device = self
            .ctx
            .backend
            .attach_image(&self.spec, &request.image_path, request.mount_path.as_deref())
            .await?;
        Ok(AttachImageResponse { device: Some(device) })
    }

    pub(crate) async fn do_detach_image(&self, request: DetachImageRequest) -> Result<DetachImageResponse> {
        self.ctx
            .backend
            .detach_image(&self.spec, request.mount_path.as_deref())
            .await?;
        Ok(DetachImageResponse {})
    }

    // ========== Limits ==========

    pub(crate) async fn do_limit_memory(&self, request: LimitMemoryRequest) -> Result<LimitMemoryResponse> {
        if let Some(limit) = request.limit_in_bytes {
            if let Some(memory) = self.ctx.backend.capabilities().memory {
                memory.limit_memory(&self.spec, limit).await?;
            }
            self.lock().await.limits.memory = Some(limit);
        }
        Ok(LimitMemoryResponse {
            limit_in_bytes: self.lock().await.limits.memory,
        })
    }

    pub(crate) async fn do_limit_disk(&self, request: LimitDiskRequest) -> Result<LimitDiskResponse> {
        let update = DiskLimits {
            block_limit: request.block_limit,
            inode_limit: request.inode_limit,
            byte_limit: request.byte_limit,
        };
        let mut limits = self.lock().await.limits.disk;
        if !update.is_empty() {
            limits.merge(update);
            if let Some(disk) = self.ctx.backend.capabilities().disk {
                disk.set_quota(&self.spec, limits).await?;
            }
            self.lock().await.limits.disk = limits;
        }
        Ok(LimitDiskResponse {
            block_limit: limits.block_limit,
            inode_limit: limits.inode_limit,
            byte_limit: limits.byte_limit,
        })
    }

    pub(crate) async fn do_limit_bandwidth(&self, request: LimitBandwidthRequest) -> Result<LimitBandwidthResponse> {
        if let Some(network) = self.ctx.backend.capabilities().network {
            network
                .limit_bandwidth(&self.spec, request.rate, request.burst)
                .await?;
        }
        self.lock().await.limits.bandwidth = Some((request.rate, request.burst));
        Ok(LimitBandwidthResponse {
            rate: request.rate,
            burst: request.burst,
        })
    }

    pub(crate) async fn do_limit_cpu(&self, request: LimitCpuRequest) -> Result<LimitCpuResponse> {
        if let Some(shares) = request.limit_in_shares {
            if let Some(cpu) = self.ctx.backend.capabilities().cpu {
                cpu.limit_cpu(&self.spec, shares).await?;
            }
            self.lock().await.limits.cpu = Some(shares);
        }
        Ok(LimitCpuResponse {
            limit_in_shares: self.lock().await.limits.cpu,
        })
    }

    // ========== Out of memory ==========

    /// Start the backend's OOM notifier once a memory limit is in place.
    pub(crate) async fn watch_oom(self: &Arc<Self>) {
        let Some(memory) = self.ctx.backend.capabilities().memory else {
            return;
        };
        let Some(argv) = memory.oom_notifier(&self.spec) else {
            return;
        };

        let mut inner = self.lock().await;
        if inner.oom_watch.is_some() || inner.state != State::Active {
            return;
        }
        let process = match self.ctx.supervisor.spawn(&argv, SpawnOptions::default()).await {
            Ok(process) => process,
            Err(e) => {
                warn!(handle = %self.handle(), error = %e, "Failed to start OOM notifier");
                return;
            }
        };
        inner.oom_watch = Some(process.clone());
        drop(inner);

        let container = self.clone();
        tokio::spawn(async move {
            let status = process.wait().await;
            if status.success() {
                container.on_oom().await;
            }
        });
    }

    pub(crate) async fn on_oom(&self) {
        if self.state().await != State::Active {
            return;
        }
        warn!(handle = %self.handle(), "Container ran out of memory");
        self.record_event("oom").await;
        if let Err(e) = self.stop_internal(true).await {
            warn!(handle = %self.handle(), error = %e, "Stop after OOM failed");
        }
    }
}
