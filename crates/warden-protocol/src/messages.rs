// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Protocol messages.
//!
//! Messages use proto2 semantics (`required` / `optional` / `repeated`) and are
//! encoded with `prost`. Each one also derives `serde` so the flag mapper can
//! walk its fields generically, and carries a static [`MessageSchema`].

use serde::{Deserialize, Serialize};

use crate::schema::{Described, EnumSchema, FieldSchema, Kind, MessageSchema};

macro_rules! described {
    ($($ty:ident => $schema:ident),* $(,)?) => {
        $(
            impl Described for $ty {
                fn schema() -> &'static MessageSchema {
                    &$schema
                }
            }
        )*
    };
}

// ========== Enumerations ==========

/// Bind mount access mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Mode {
    Ro = 0,
    Rw = 1,
}

pub static MODE: EnumSchema = EnumSchema {
    name: "Mode",
    values: &[("RO", 0), ("RW", 1)],
};

/// Transport protocol for outbound network rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Protocol {
    Tcp = 0,
    Udp = 1,
    Icmp = 2,
    All = 3,
}

pub static PROTOCOL: EnumSchema = EnumSchema {
    name: "Protocol",
    values: &[("TCP", 0), ("UDP", 1), ("ICMP", 2), ("ALL", 3)],
};

// ========== Envelope ==========

/// Envelope for every request on the wire.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct WrappedRequest {
    #[prost(uint32, required, tag = "1")]
    pub r#type: u32,
    #[prost(bytes = "vec", required, tag = "2")]
    pub payload: Vec<u8>,
}

/// Envelope for every response on the wire.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct WrappedResponse {
    #[prost(uint32, required, tag = "1")]
    pub r#type: u32,
    #[prost(bytes = "vec", required, tag = "2")]
    pub payload: Vec<u8>,
}

// ========== Shared submessages ==========

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct BindMount {
    #[prost(string, required, tag = "1")]
    pub src_path: String,
    #[prost(string, required, tag = "2")]
    pub dst_path: String,
    #[prost(enumeration = "Mode", required, tag = "3")]
    pub mode: i32,
}

pub static BIND_MOUNT: MessageSchema = MessageSchema {
    name: "BindMount",
    description: "Host directory mounted into the container.",
    fields: &[
        FieldSchema::required("src_path", Kind::String, "Path on the host."),
        FieldSchema::required("dst_path", Kind::String, "Path inside the container."),
        FieldSchema::required("mode", Kind::Enum(&MODE), "Access mode (RO or RW)."),
    ],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentVariable {
    #[prost(string, required, tag = "1")]
    pub key: String,
    #[prost(string, required, tag = "2")]
    pub value: String,
}

pub static ENVIRONMENT_VARIABLE: MessageSchema = MessageSchema {
    name: "EnvironmentVariable",
    description: "Environment variable exported to every job.",
    fields: &[
        FieldSchema::required("key", Kind::String, "Variable name."),
        FieldSchema::required("value", Kind::String, "Variable value."),
    ],
};

/// Per-job resource limits, applied with setrlimit semantics.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    #[prost(uint64, optional, tag = "1")]
    pub r#as: Option<u64>,
    #[prost(uint64, optional, tag = "2")]
    pub core: Option<u64>,
    #[prost(uint64, optional, tag = "3")]
    pub cpu: Option<u64>,
    #[prost(uint64, optional, tag = "4")]
    pub data: Option<u64>,
    #[prost(uint64, optional, tag = "5")]
    pub fsize: Option<u64>,
    #[prost(uint64, optional, tag = "6")]
    pub memlock: Option<u64>,
    #[prost(uint64, optional, tag = "7")]
    pub nofile: Option<u64>,
    #[prost(uint64, optional, tag = "8")]
    pub nproc: Option<u64>,
    #[prost(uint64, optional, tag = "9")]
    pub rss: Option<u64>,
    #[prost(uint64, optional, tag = "10")]
    pub stack: Option<u64>,
}

pub static RESOURCE_LIMITS: MessageSchema = MessageSchema {
    name: "ResourceLimits",
    description: "Resource limits applied to a job.",
    fields: &[
        FieldSchema::optional("as", Kind::Uint64, "Address space size."),
        FieldSchema::optional("core", Kind::Uint64, "Core file size."),
        FieldSchema::optional("cpu", Kind::Uint64, "CPU time in seconds."),
        FieldSchema::optional("data", Kind::Uint64, "Data segment size."),
        FieldSchema::optional("fsize", Kind::Uint64, "Largest file created."),
        FieldSchema::optional("memlock", Kind::Uint64, "Locked memory."),
        FieldSchema::optional("nofile", Kind::Uint64, "Open file descriptors."),
        FieldSchema::optional("nproc", Kind::Uint64, "Number of processes."),
        FieldSchema::optional("rss", Kind::Uint64, "Resident set size."),
        FieldSchema::optional("stack", Kind::Uint64, "Stack size."),
    ],
};

// ========== Error ==========

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorResponse {
    #[prost(string, optional, tag = "2")]
    pub message: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub data: Option<String>,
    #[prost(string, repeated, tag = "3")]
    pub backtrace: Vec<String>,
}

pub static ERROR_RESPONSE: MessageSchema = MessageSchema {
    name: "ErrorResponse",
    description: "Error raised while handling a request.",
    fields: &[
        FieldSchema::optional("message", Kind::String, "Error message."),
        FieldSchema::optional("data", Kind::String, "Additional error data."),
        FieldSchema::repeated("backtrace", Kind::String, "Server-side backtrace."),
    ],
};

// ========== Lifecycle ==========

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateRequest {
    #[prost(message, repeated, tag = "1")]
    pub bind_mounts: Vec<BindMount>,
    #[prost(uint32, optional, tag = "2")]
    pub grace_time: Option<u32>,
    #[prost(string, optional, tag = "3")]
    pub handle: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub network: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub rootfs: Option<String>,
    #[prost(message, repeated, tag = "6")]
    pub env: Vec<EnvironmentVariable>,
}

pub static CREATE_REQUEST: MessageSchema = MessageSchema {
    name: "CreateRequest",
    description: "Create a container.",
    fields: &[
        FieldSchema::repeated("bind_mounts", Kind::Message(&BIND_MOUNT), "Bind mounts."),
        FieldSchema::optional(
            "grace_time",
            Kind::Uint32,
            "Seconds to keep the container after its last connection closes.",
        ),
        FieldSchema::optional("handle", Kind::String, "Handle to use instead of a generated one."),
        FieldSchema::optional("network", Kind::String, "Specific subnet to acquire."),
        FieldSchema::optional("rootfs", Kind::String, "Root filesystem path."),
        FieldSchema::repeated("env", Kind::Message(&ENVIRONMENT_VARIABLE), "Job environment."),
    ],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateResponse {
    #[prost(string, required, tag = "1")]
    pub handle: String,
}

pub static CREATE_RESPONSE: MessageSchema = MessageSchema {
    name: "CreateResponse",
    description: "Handle of the created container.",
    fields: &[FieldSchema::required("handle", Kind::String, "Container handle.")],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct StopRequest {
    #[prost(string, required, tag = "1")]
    pub handle: String,
    #[prost(bool, optional, tag = "10")]
    pub background: Option<bool>,
    #[prost(bool, optional, tag = "20")]
    pub kill: Option<bool>,
}

pub static STOP_REQUEST: MessageSchema = MessageSchema {
    name: "StopRequest",
    description: "Stop all processes in a container.",
    fields: &[
        FieldSchema::required("handle", Kind::String, "Container handle."),
        FieldSchema::optional("background", Kind::Bool, "Return before the stop completes."),
        FieldSchema::optional("kill", Kind::Bool, "Send KILL instead of TERM."),
    ],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct StopResponse {}

pub static STOP_RESPONSE: MessageSchema = MessageSchema {
    name: "StopResponse",
    description: "Container stopped.",
    fields: &[],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct DestroyRequest {
    #[prost(string, required, tag = "1")]
    pub handle: String,
}

pub static DESTROY_REQUEST: MessageSchema = MessageSchema {
    name: "DestroyRequest",
    description: "Destroy a container and release its resources.",
    fields: &[FieldSchema::required("handle", Kind::String, "Container handle.")],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct DestroyResponse {}

pub static DESTROY_RESPONSE: MessageSchema = MessageSchema {
    name: "DestroyResponse",
    description: "Container destroyed.",
    fields: &[],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct InfoRequest {
    #[prost(string, required, tag = "1")]
    pub handle: String,
}

pub static INFO_REQUEST: MessageSchema = MessageSchema {
    name: "InfoRequest",
    description: "Describe a container.",
    fields: &[FieldSchema::required("handle", Kind::String, "Container handle.")],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct InfoResponse {
    #[prost(string, optional, tag = "10")]
    pub state: Option<String>,
    #[prost(string, repeated, tag = "20")]
    pub events: Vec<String>,
    #[prost(string, optional, tag = "30")]
    pub host_ip: Option<String>,
    #[prost(string, optional, tag = "31")]
    pub container_ip: Option<String>,
    #[prost(string, optional, tag = "40")]
    pub container_path: Option<String>,
    #[prost(uint32, repeated, packed = "false", tag = "50")]
    pub job_ids: Vec<u32>,
    #[prost(uint32, optional, tag = "60")]
    pub grace_time: Option<u32>,
}

pub static INFO_RESPONSE: MessageSchema = MessageSchema {
    name: "InfoResponse",
    description: "Container state and resources.",
    fields: &[
        FieldSchema::optional("state", Kind::String, "Lifecycle state."),
        FieldSchema::repeated("events", Kind::String, "Recorded events."),
        FieldSchema::optional("host_ip", Kind::String, "Host side address."),
        FieldSchema::optional("container_ip", Kind::String, "Container side address."),
        FieldSchema::optional("container_path", Kind::String, "Container directory."),
        FieldSchema::repeated("job_ids", Kind::Uint32, "Known jobs."),
        FieldSchema::optional("grace_time", Kind::Uint32, "Grace time in seconds."),
    ],
};

// ========== Jobs ==========

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnRequest {
    #[prost(string, required, tag = "1")]
    pub handle: String,
    #[prost(string, required, tag = "2")]
    pub script: String,
    #[prost(bool, optional, tag = "3")]
    pub privileged: Option<bool>,
    #[prost(message, optional, tag = "4")]
    pub rlimits: Option<ResourceLimits>,
    #[prost(bool, optional, tag = "5")]
    pub discard_output: Option<bool>,
}

static SPAWN_FIELDS: [FieldSchema; 5] = [
    FieldSchema::required("handle", Kind::String, "Container handle."),
    FieldSchema::required("script", Kind::String, "Shell script to run."),
    FieldSchema::optional("privileged", Kind::Bool, "Run as root."),
    FieldSchema::optional("rlimits", Kind::Message(&RESOURCE_LIMITS), "Resource limits."),
    FieldSchema::optional("discard_output", Kind::Bool, "Drop stdout and stderr."),
];

pub static SPAWN_REQUEST: MessageSchema = MessageSchema {
    name: "SpawnRequest",
    description: "Start a job in a container.",
    fields: &SPAWN_FIELDS,
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnResponse {
    #[prost(uint32, required, tag = "1")]
    pub job_id: u32,
}

pub static SPAWN_RESPONSE: MessageSchema = MessageSchema {
    name: "SpawnResponse",
    description: "Identifier of the spawned job.",
    fields: &[FieldSchema::required("job_id", Kind::Uint32, "Job id.")],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkRequest {
    #[prost(string, required, tag = "1")]
    pub handle: String,
    #[prost(uint32, required, tag = "2")]
    pub job_id: u32,
}

static JOB_FIELDS: [FieldSchema; 2] = [
    FieldSchema::required("handle", Kind::String, "Container handle."),
    FieldSchema::required("job_id", Kind::Uint32, "Job id."),
];

pub static LINK_REQUEST: MessageSchema = MessageSchema {
    name: "LinkRequest",
    description: "Wait for a job to finish.",
    fields: &JOB_FIELDS,
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkResponse {
    #[prost(uint32, optional, tag = "1")]
    pub exit_status: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub stdout: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub stderr: Option<Vec<u8>>,
    #[prost(message, optional, tag = "4")]
    pub info: Option<InfoResponse>,
    #[prost(string, optional, tag = "5")]
    pub failure: Option<String>,
}

static JOB_STATUS_FIELDS: [FieldSchema; 5] = [
    FieldSchema::optional("exit_status", Kind::Uint32, "Exit status."),
    FieldSchema::optional("stdout", Kind::Bytes, "Captured stdout."),
    FieldSchema::optional("stderr", Kind::Bytes, "Captured stderr."),
    FieldSchema::optional("info", Kind::Message(&INFO_RESPONSE), "Container info."),
    FieldSchema::optional("failure", Kind::String, "Supervision failure, if any."),
];

pub static LINK_RESPONSE: MessageSchema = MessageSchema {
    name: "LinkResponse",
    description: "Terminal status of a job.",
    fields: &JOB_STATUS_FIELDS,
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct RunRequest {
    #[prost(string, required, tag = "1")]
    pub handle: String,
    #[prost(string, required, tag = "2")]
    pub script: String,
    #[prost(bool, optional, tag = "3")]
    pub privileged: Option<bool>,
    #[prost(message, optional, tag = "4")]
    pub rlimits: Option<ResourceLimits>,
    #[prost(bool, optional, tag = "5")]
    pub discard_output: Option<bool>,
}

pub static RUN_REQUEST: MessageSchema = MessageSchema {
    name: "RunRequest",
    description: "Spawn a job and wait for it to finish.",
    fields: &SPAWN_FIELDS,
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct RunResponse {
    #[prost(uint32, optional, tag = "1")]
    pub exit_status: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub stdout: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub stderr: Option<Vec<u8>>,
    #[prost(message, optional, tag = "4")]
    pub info: Option<InfoResponse>,
    #[prost(string, optional, tag = "5")]
    pub failure: Option<String>,
}

pub static RUN_RESPONSE: MessageSchema = MessageSchema {
    name: "RunResponse",
    description: "Terminal status of a job.",
    fields: &JOB_STATUS_FIELDS,
};

impl From<LinkResponse> for RunResponse {
    fn from(r: LinkResponse) -> Self {
        Self {
            exit_status: r.exit_status,
            stdout: r.stdout,
            stderr: r.stderr,
            info: r.info,
            failure: r.failure,
        }
    }
}

impl From<RunRequest> for SpawnRequest {
    fn from(r: RunRequest) -> Self {
        Self {
            handle: r.handle,
            script: r.script,
            privileged: r.privileged,
            rlimits: r.rlimits,
            discard_output: r.discard_output,
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamRequest {
    #[prost(string, required, tag = "1")]
    pub handle: String,
    #[prost(uint32, required, tag = "2")]
    pub job_id: u32,
}

pub static STREAM_REQUEST: MessageSchema = MessageSchema {
    name: "StreamRequest",
    description: "Stream a job's output as it is produced.",
    fields: &JOB_FIELDS,
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamResponse {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub data: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "3")]
    pub exit_status: Option<u32>,
    #[prost(message, optional, tag = "4")]
    pub info: Option<InfoResponse>,
    #[prost(string, optional, tag = "5")]
    pub failure: Option<String>,
}

pub static STREAM_RESPONSE: MessageSchema = MessageSchema {
    name: "StreamResponse",
    description: "One chunk of job output, or the final status.",
    fields: &[
        FieldSchema::optional("name", Kind::String, "Stream name (stdout or stderr)."),
        FieldSchema::optional("data", Kind::Bytes, "Output data."),
        FieldSchema::optional("exit_status", Kind::Uint32, "Exit status, on the final chunk."),
        FieldSchema::optional("info", Kind::Message(&INFO_RESPONSE), "Container info."),
        FieldSchema::optional("failure", Kind::String, "Supervision failure, if any."),
    ],
};

// ========== Network ==========

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct NetInRequest {
    #[prost(string, required, tag = "1")]
    pub handle: String,
    #[prost(uint32, optional, tag = "3")]
    pub host_port: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub container_port: Option<u32>,
}

pub static NET_IN_REQUEST: MessageSchema = MessageSchema {
    name: "NetInRequest",
    description: "Forward a host port into the container.",
    fields: &[
        FieldSchema::required("handle", Kind::String, "Container handle."),
        FieldSchema::optional("host_port", Kind::Uint32, "Host port (acquired if absent)."),
        FieldSchema::optional(
            "container_port",
            Kind::Uint32,
            "Container port (same as host port if absent).",
        ),
    ],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct NetInResponse {
    #[prost(uint32, required, tag = "1")]
    pub host_port: u32,
    #[prost(uint32, required, tag = "2")]
    pub container_port: u32,
}

pub static NET_IN_RESPONSE: MessageSchema = MessageSchema {
    name: "NetInResponse",
    description: "Established port mapping.",
    fields: &[
        FieldSchema::required("host_port", Kind::Uint32, "Host port."),
        FieldSchema::required("container_port", Kind::Uint32, "Container port."),
    ],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct NetOutRequest {
    #[prost(string, required, tag = "1")]
    pub handle: String,
    #[prost(string, optional, tag = "2")]
    pub network: Option<String>,
    #[prost(uint32, optional, tag = "3")]
    pub port: Option<u32>,
    #[prost(string, optional, tag = "4")]
    pub port_range: Option<String>,
    #[prost(enumeration = "Protocol", optional, tag = "5")]
    pub protocol: Option<i32>,
    #[prost(uint32, optional, tag = "6")]
    pub icmp_type: Option<u32>,
    #[prost(uint32, optional, tag = "7")]
    pub icmp_code: Option<u32>,
    #[prost(bool, optional, tag = "8")]
    pub log: Option<bool>,
}

pub static NET_OUT_REQUEST: MessageSchema = MessageSchema {
    name: "NetOutRequest",
    description: "Allow outbound traffic from the container.",
    fields: &[
        FieldSchema::required("handle", Kind::String, "Container handle."),
        FieldSchema::optional("network", Kind::String, "Destination network (CIDR)."),
        FieldSchema::optional("port", Kind::Uint32, "Destination port."),
        FieldSchema::optional("port_range", Kind::String, "Destination port range (a:b)."),
        FieldSchema::optional("protocol", Kind::Enum(&PROTOCOL), "Protocol."),
        FieldSchema::optional("icmp_type", Kind::Uint32, "ICMP type."),
        FieldSchema::optional("icmp_code", Kind::Uint32, "ICMP code."),
        FieldSchema::optional("log", Kind::Bool, "Log matching packets."),
    ],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct NetOutResponse {}

pub static NET_OUT_RESPONSE: MessageSchema = MessageSchema {
    name: "NetOutResponse",
    description: "Outbound rule installed.",
    fields: &[],
};

// ========== Files ==========

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyInRequest {
    #[prost(string, required, tag = "1")]
    pub handle: String,
    #[prost(string, required, tag = "2")]
    pub src_path: String,
    #[prost(string, required, tag = "3")]
    pub dst_path: String,
}

pub static COPY_IN_REQUEST: MessageSchema = MessageSchema {
    name: "CopyInRequest",
    description: "Copy files from the host into the container.",
    fields: &[
        FieldSchema::required("handle", Kind::String, "Container handle."),
        FieldSchema::required("src_path", Kind::String, "Path on the host."),
        FieldSchema::required("dst_path", Kind::String, "Path inside the container."),
    ],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyInResponse {}

pub static COPY_IN_RESPONSE: MessageSchema = MessageSchema {
    name: "CopyInResponse",
    description: "Files copied in.",
    fields: &[],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyOutRequest {
    #[prost(string, required, tag = "1")]
    pub handle: String,
    #[prost(string, required, tag = "2")]
    pub src_path: String,
    #[prost(string, required, tag = "3")]
    pub dst_path: String,
    #[prost(string, optional, tag = "4")]
    pub owner: Option<String>,
}

pub static COPY_OUT_REQUEST: MessageSchema = MessageSchema {
    name: "CopyOutRequest",
    description: "Copy files from the container to the host.",
    fields: &[
        FieldSchema::required("handle", Kind::String, "Container handle."),
        FieldSchema::required("src_path", Kind::String, "Path inside the container."),
        FieldSchema::required("dst_path", Kind::String, "Path on the host."),
        FieldSchema::optional("owner", Kind::String, "Owner of the copied files (user:group)."),
    ],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyOutResponse {}

pub static COPY_OUT_RESPONSE: MessageSchema = MessageSchema {
    name: "CopyOutResponse",
    description: "Files copied out.",
    fields: &[],
};

// ========== Limits ==========

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitMemoryRequest {
    #[prost(string, required, tag = "1")]
    pub handle: String,
    #[prost(uint64, optional, tag = "2")]
    pub limit_in_bytes: Option<u64>,
}

pub static LIMIT_MEMORY_REQUEST: MessageSchema = MessageSchema {
    name: "LimitMemoryRequest",
    description: "Set or read the memory limit.",
    fields: &[
        FieldSchema::required("handle", Kind::String, "Container handle."),
        FieldSchema::optional("limit_in_bytes", Kind::Uint64, "New limit in bytes."),
    ],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitMemoryResponse {
    #[prost(uint64, optional, tag = "1")]
    pub limit_in_bytes: Option<u64>,
}

pub static LIMIT_MEMORY_RESPONSE: MessageSchema = MessageSchema {
    name: "LimitMemoryResponse",
    description: "Effective memory limit.",
    fields: &[FieldSchema::optional("limit_in_bytes", Kind::Uint64, "Limit in bytes.")],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitDiskRequest {
    #[prost(string, required, tag = "1")]
    pub handle: String,
    #[prost(uint64, optional, tag = "2")]
    pub block_limit: Option<u64>,
    #[prost(uint64, optional, tag = "3")]
    pub inode_limit: Option<u64>,
    #[prost(uint64, optional, tag = "4")]
    pub byte_limit: Option<u64>,
}

pub static LIMIT_DISK_REQUEST: MessageSchema = MessageSchema {
    name: "LimitDiskRequest",
    description: "Set or read the disk quota.",
    fields: &[
        FieldSchema::required("handle", Kind::String, "Container handle."),
        FieldSchema::optional("block_limit", Kind::Uint64, "Block limit."),
        FieldSchema::optional("inode_limit", Kind::Uint64, "Inode limit."),
        FieldSchema::optional("byte_limit", Kind::Uint64, "Byte limit."),
    ],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitDiskResponse {
    #[prost(uint64, optional, tag = "1")]
    pub block_limit: Option<u64>,
    #[prost(uint64, optional, tag = "2")]
    pub inode_limit: Option<u64>,
    #[prost(uint64, optional, tag = "3")]
    pub byte_limit: Option<u64>,
}

pub static LIMIT_DISK_RESPONSE: MessageSchema = MessageSchema {
    name: "LimitDiskResponse",
    description: "Effective disk quota.",
    fields: &[
        FieldSchema::optional("block_limit", Kind::Uint64, "Block limit."),
        FieldSchema::optional("inode_limit", Kind::Uint64, "Inode limit."),
        FieldSchema::optional("byte_limit", Kind::Uint64, "Byte limit."),
    ],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitBandwidthRequest {
    #[prost(string, required, tag = "1")]
    pub handle: String,
    #[prost(uint64, required, tag = "2")]
    pub rate: u64,
    #[prost(uint64, required, tag = "3")]
    pub burst: u64,
}

pub static LIMIT_BANDWIDTH_REQUEST: MessageSchema = MessageSchema {
    name: "LimitBandwidthRequest",
    description: "Set the network bandwidth limit.",
    fields: &[
        FieldSchema::required("handle", Kind::String, "Container handle."),
        FieldSchema::required("rate", Kind::Uint64, "Rate in bytes per second."),
        FieldSchema::required("burst", Kind::Uint64, "Burst size in bytes."),
    ],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitBandwidthResponse {
    #[prost(uint64, required, tag = "1")]
    pub rate: u64,
    #[prost(uint64, required, tag = "2")]
    pub burst: u64,
}

pub static LIMIT_BANDWIDTH_RESPONSE: MessageSchema = MessageSchema {
    name: "LimitBandwidthResponse",
    description: "Effective bandwidth limit.",
    fields: &[
        FieldSchema::required("rate", Kind::Uint64, "Rate in bytes per second."),
        FieldSchema::required("burst", Kind::Uint64, "Burst size in bytes."),
    ],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitCpuRequest {
    #[prost(string, required, tag = "1")]
    pub handle: String,
    #[prost(uint64, optional, tag = "2")]
    pub limit_in_shares: Option<u64>,
}

pub static LIMIT_CPU_REQUEST: MessageSchema = MessageSchema {
    name: "LimitCpuRequest",
    description: "Set or read the CPU share weight.",
    fields: &[
        FieldSchema::required("handle", Kind::String, "Container handle."),
        FieldSchema::optional("limit_in_shares", Kind::Uint64, "CPU shares."),
    ],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitCpuResponse {
    #[prost(uint64, optional, tag = "1")]
    pub limit_in_shares: Option<u64>,
}

pub static LIMIT_CPU_RESPONSE: MessageSchema = MessageSchema {
    name: "LimitCpuResponse",
    description: "Effective CPU share weight.",
    fields: &[FieldSchema::optional("limit_in_shares", Kind::Uint64, "CPU shares.")],
};

// ========== Images ==========

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachImageRequest {
    #[prost(string, required, tag = "1")]
    pub handle: String,
    #[prost(string, required, tag = "2")]
    pub image_path: String,
    #[prost(string, optional, tag = "3")]
    pub mount_path: Option<String>,
}

pub static ATTACH_IMAGE_REQUEST: MessageSchema = MessageSchema {
    name: "AttachImageRequest",
    description: "Attach a filesystem image through a loop device.",
    fields: &[
        FieldSchema::required("handle", Kind::String, "Container handle."),
        FieldSchema::required("image_path", Kind::String, "Image file on the host."),
        FieldSchema::optional("mount_path", Kind::String, "Mount point inside the container."),
    ],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachImageResponse {
    #[prost(string, optional, tag = "1")]
    pub device: Option<String>,
}

pub static ATTACH_IMAGE_RESPONSE: MessageSchema = MessageSchema {
    name: "AttachImageResponse",
    description: "Loop device backing the image.",
    fields: &[FieldSchema::optional("device", Kind::String, "Loop device path.")],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct DetachImageRequest {
    #[prost(string, required, tag = "1")]
    pub handle: String,
    #[prost(string, optional, tag = "2")]
    pub mount_path: Option<String>,
}

pub static DETACH_IMAGE_REQUEST: MessageSchema = MessageSchema {
    name: "DetachImageRequest",
    description: "Detach a previously attached image.",
    fields: &[
        FieldSchema::required("handle", Kind::String, "Container handle."),
        FieldSchema::optional("mount_path", Kind::String, "Mount point inside the container."),
    ],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct DetachImageResponse {}

pub static DETACH_IMAGE_RESPONSE: MessageSchema = MessageSchema {
    name: "DetachImageResponse",
    description: "Image detached.",
    fields: &[],
};

// ========== Daemon ==========

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct PingRequest {}

pub static PING_REQUEST: MessageSchema = MessageSchema {
    name: "PingRequest",
    description: "Check that the daemon is alive.",
    fields: &[],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct PingResponse {}

pub static PING_RESPONSE: MessageSchema = MessageSchema {
    name: "PingResponse",
    description: "Daemon is alive.",
    fields: &[],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ListRequest {}

pub static LIST_REQUEST: MessageSchema = MessageSchema {
    name: "ListRequest",
    description: "List container handles.",
    fields: &[],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ListResponse {
    #[prost(string, repeated, tag = "1")]
    pub handles: Vec<String>,
}

pub static LIST_RESPONSE: MessageSchema = MessageSchema {
    name: "ListResponse",
    description: "Handles of all live containers.",
    fields: &[FieldSchema::repeated("handles", Kind::String, "Container handles.")],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoRequest {
    #[prost(string, required, tag = "1")]
    pub message: String,
}

pub static ECHO_REQUEST: MessageSchema = MessageSchema {
    name: "EchoRequest",
    description: "Echo a message back.",
    fields: &[FieldSchema::required("message", Kind::String, "Message to echo.")],
};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoResponse {
    #[prost(string, required, tag = "1")]
    pub message: String,
}

pub static ECHO_RESPONSE: MessageSchema = MessageSchema {
    name: "EchoResponse",
    description: "Echoed message.",
    fields: &[FieldSchema::required("message", Kind::String, "Message.")],
};

described! {
    BindMount => BIND_MOUNT,
    EnvironmentVariable => ENVIRONMENT_VARIABLE,
    ResourceLimits => RESOURCE_LIMITS,
    ErrorResponse => ERROR_RESPONSE,
    CreateRequest => CREATE_REQUEST,
    CreateResponse => CREATE_RESPONSE,
    StopRequest => STOP_REQUEST,
    StopResponse => STOP_RESPONSE,
    DestroyRequest => DESTROY_REQUEST,
    DestroyResponse => DESTROY_RESPONSE,
    InfoRequest => INFO_REQUEST,
    InfoResponse => INFO_RESPONSE,
    SpawnRequest => SPAWN_REQUEST,
    SpawnResponse => SPAWN_RESPONSE,
    LinkRequest => LINK_REQUEST,
    LinkResponse => LINK_RESPONSE,
    RunRequest => RUN_REQUEST,
    RunResponse => RUN_RESPONSE,
    StreamRequest => STREAM_REQUEST,
    StreamResponse => STREAM_RESPONSE,
    NetInRequest => NET_IN_REQUEST,
    NetInResponse => NET_IN_RESPONSE,
    NetOutRequest => NET_OUT_REQUEST,
    NetOutResponse => NET_OUT_RESPONSE,
    CopyInRequest => COPY_IN_REQUEST,
    CopyInResponse => COPY_IN_RESPONSE,
    CopyOutRequest => COPY_OUT_REQUEST,
    CopyOutResponse => COPY_OUT_RESPONSE,
    LimitMemoryRequest => LIMIT_MEMORY_REQUEST,
    LimitMemoryResponse => LIMIT_MEMORY_RESPONSE,
    LimitDiskRequest => LIMIT_DISK_REQUEST,
    LimitDiskResponse => LIMIT_DISK_RESPONSE,
    LimitBandwidthRequest => LIMIT_BANDWIDTH_REQUEST,
    LimitBandwidthResponse => LIMIT_BANDWIDTH_RESPONSE,
    LimitCpuRequest => LIMIT_CPU_REQUEST,
    LimitCpuResponse => LIMIT_CPU_RESPONSE,
    AttachImageRequest => ATTACH_IMAGE_REQUEST,
    AttachImageResponse => ATTACH_IMAGE_RESPONSE,
    DetachImageRequest => DETACH_IMAGE_REQUEST,
    DetachImageResponse => DETACH_IMAGE_RESPONSE,
    PingRequest => PING_REQUEST,
    PingResponse => PING_RESPONSE,
    ListRequest => LIST_REQUEST,
    ListResponse => LIST_RESPONSE,
    EchoRequest => ECHO_REQUEST,
    EchoResponse => ECHO_RESPONSE,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_spawn_request_round_trip() {
        let req = SpawnRequest {
            handle: "0afe0001".to_string(),
            script: "echo hi".to_string(),
            privileged: Some(false),
            rlimits: Some(ResourceLimits {
                nofile: Some(1024),
                r#as: Some(1 << 30),
                ..Default::default()
            }),
            discard_output: None,
        };
        let decoded = SpawnRequest::decode(req.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_empty_message_round_trip() {
        let decoded = PingRequest::decode(PingRequest {}.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, PingRequest {});
    }

    #[test]
    fn test_enum_accessor() {
        let mount = BindMount {
            src_path: "/a".into(),
            dst_path: "/b".into(),
            mode: Mode::Rw as i32,
        };
        assert_eq!(mount.mode(), Mode::Rw);
    }

    #[test]
    fn test_schema_field_names_match_serde() {
        let value = serde_json::to_value(ResourceLimits::default()).unwrap();
        let object = value.as_object().unwrap();
        for field in RESOURCE_LIMITS.fields {
            assert!(object.contains_key(field.name), "missing {}", field.name);
        }
        assert_eq!(object.len(), RESOURCE_LIMITS.fields.len());
    }

    #[test]
    fn test_run_shares_spawn_fields() {
        assert_eq!(RUN_REQUEST.fields.len(), SPAWN_REQUEST.fields.len());
        assert_eq!(RUN_RESPONSE.fields.len(), LINK_RESPONSE.fields.len());
    }
}
