// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed request/response multiplexing.
//!
//! Every message family has a numeric tag. A frame payload is a
//! [`WrappedRequest`] or [`WrappedResponse`] holding the tag and the encoded
//! inner message; the tables below map tags back to concrete types.

use bytes::Bytes;
use prost::Message;

use crate::flags::{FlagError, Parsed, deserialize, serialize};
use crate::frame::FrameError;
use crate::messages::*;
use crate::schema::{Described, MessageSchema};

/// Tag of the error response family.
pub const ERROR_TAG: u32 = 1;

macro_rules! protocol {
    ($($variant:ident = $tag:literal, $command:literal, $req:ident, $resp:ident;)*) => {
        /// Message family.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Type {
            Error,
            $($variant,)*
        }

        impl Type {
            /// Every family that can be requested, in tag order.
            pub const COMMANDS: &'static [Type] = &[$(Type::$variant,)*];

            pub fn tag(self) -> u32 {
                match self {
                    Type::Error => ERROR_TAG,
                    $(Type::$variant => $tag,)*
                }
            }

            pub fn from_tag(tag: u32) -> Option<Self> {
                match tag {
                    ERROR_TAG => Some(Type::Error),
                    $($tag => Some(Type::$variant),)*
                    _ => None,
                }
            }

            /// Command name used on the command line.
            pub fn command(self) -> &'static str {
                match self {
                    Type::Error => "error",
                    $(Type::$variant => $command,)*
                }
            }

            pub fn from_command(name: &str) -> Option<Self> {
                match name {
                    $($command => Some(Type::$variant),)*
                    _ => None,
                }
            }

            pub fn request_schema(self) -> Option<&'static MessageSchema> {
                match self {
                    Type::Error => None,
                    $(Type::$variant => Some(<$req as Described>::schema()),)*
                }
            }

            pub fn response_schema(self) -> &'static MessageSchema {
                match self {
                    Type::Error => <ErrorResponse as Described>::schema(),
                    $(Type::$variant => <$resp as Described>::schema(),)*
                }
            }
        }

        /// Any request.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Request {
            $($variant($req),)*
        }

        impl Request {
            pub fn message_type(&self) -> Type {
                match self {
                    $(Request::$variant(_) => Type::$variant,)*
                }
            }

            pub fn wrap(&self) -> WrappedRequest {
                let payload = match self {
                    $(Request::$variant(m) => m.encode_to_vec(),)*
                };
                WrappedRequest {
                    r#type: self.message_type().tag(),
                    payload,
                }
            }

            pub fn unwrap(wrapped: &WrappedRequest) -> Result<Self, FrameError> {
                let payload = wrapped.payload.as_slice();
                match Type::from_tag(wrapped.r#type) {
                    $(Some(Type::$variant) => Ok(Request::$variant(<$req as Message>::decode(payload)?)),)*
                    _ => Err(FrameError::UnknownType(wrapped.r#type)),
                }
            }

            /// Parse the flags of `command` into a request.
            pub fn from_flags(
                command: &str,
                tokens: &[String],
                delimiter: &str,
            ) -> Result<Parsed<Self>, FlagError> {
                match command {
                    $($command => Ok(deserialize::<$req>(tokens, delimiter)?.map(Request::$variant)),)*
                    _ => Err(FlagError::UnknownCommand(command.to_string())),
                }
            }

            pub fn to_flags(&self, delimiter: &str) -> Result<Vec<(String, String)>, FlagError> {
                match self {
                    $(Request::$variant(m) => serialize(m, delimiter),)*
                }
            }
        }

        /// Any response, including errors.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Response {
            Error(ErrorResponse),
            $($variant($resp),)*
        }

        impl Response {
            pub fn message_type(&self) -> Type {
                match self {
                    Response::Error(_) => Type::Error,
                    $(Response::$variant(_) => Type::$variant,)*
                }
            }

            pub fn wrap(&self) -> WrappedResponse {
                let payload = match self {
                    Response::Error(m) => m.encode_to_vec(),
                    $(Response::$variant(m) => m.encode_to_vec(),)*
                };
                WrappedResponse {
                    r#type: self.message_type().tag(),
                    payload,
                }
            }

            pub fn unwrap(wrapped: &WrappedResponse) -> Result<Self, FrameError> {
                let payload = wrapped.payload.as_slice();
                match Type::from_tag(wrapped.r#type) {
                    Some(Type::Error) => Ok(Response::Error(ErrorResponse::decode(payload)?)),
                    $(Some(Type::$variant) => Ok(Response::$variant(<$resp as Message>::decode(payload)?)),)*
                    None => Err(FrameError::UnknownType(wrapped.r#type)),
                }
            }

            pub fn to_flags(&self, delimiter: &str) -> Result<Vec<(String, String)>, FlagError> {
                match self {
                    Response::Error(m) => serialize(m, delimiter),
                    $(Response::$variant(m) => serialize(m, delimiter),)*
                }
            }
        }
    };
}

protocol! {
    Create = 11, "create", CreateRequest, CreateResponse;
    Stop = 12, "stop", StopRequest, StopResponse;
    Destroy = 13, "destroy", DestroyRequest, DestroyResponse;
    Info = 14, "info", InfoRequest, InfoResponse;
    Spawn = 21, "spawn", SpawnRequest, SpawnResponse;
    Link = 22, "link", LinkRequest, LinkResponse;
    Run = 23, "run", RunRequest, RunResponse;
    Stream = 24, "stream", StreamRequest, StreamResponse;
    NetIn = 31, "net_in", NetInRequest, NetInResponse;
    NetOut = 32, "net_out", NetOutRequest, NetOutResponse;
    CopyIn = 41, "copy_in", CopyInRequest, CopyInResponse;
    CopyOut = 42, "copy_out", CopyOutRequest, CopyOutResponse;
    LimitMemory = 51, "limit_memory", LimitMemoryRequest, LimitMemoryResponse;
    LimitDisk = 52, "limit_disk", LimitDiskRequest, LimitDiskResponse;
    LimitBandwidth = 53, "limit_bandwidth", LimitBandwidthRequest, LimitBandwidthResponse;
    LimitCpu = 54, "limit_cpu", LimitCpuRequest, LimitCpuResponse;
    AttachImage = 61, "attach_image", AttachImageRequest, AttachImageResponse;
    DetachImage = 62, "detach_image", DetachImageRequest, DetachImageResponse;
    Ping = 91, "ping", PingRequest, PingResponse;
    List = 92, "list", ListRequest, ListResponse;
    Echo = 93, "echo", EchoRequest, EchoResponse;
}

impl Request {
    /// Encode as a frame payload.
    pub fn encode(&self) -> Bytes {
        Bytes::from(self.wrap().encode_to_vec())
    }

    /// Decode a frame payload.
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        Self::unwrap(&WrappedRequest::decode(payload)?)
    }

    /// Handle of the container the request targets, if any.
    pub fn handle(&self) -> Option<&str> {
        match self {
            Request::Stop(r) => Some(&r.handle),
            Request::Destroy(r) => Some(&r.handle),
            Request::Info(r) => Some(&r.handle),
            Request::Spawn(r) => Some(&r.handle),
            Request::Link(r) => Some(&r.handle),
            Request::Run(r) => Some(&r.handle),
            Request::Stream(r) => Some(&r.handle),
            Request::NetIn(r) => Some(&r.handle),
            Request::NetOut(r) => Some(&r.handle),
            Request::CopyIn(r) => Some(&r.handle),
            Request::CopyOut(r) => Some(&r.handle),
            Request::LimitMemory(r) => Some(&r.handle),
            Request::LimitDisk(r) => Some(&r.handle),
            Request::LimitBandwidth(r) => Some(&r.handle),
            Request::LimitCpu(r) => Some(&r.handle),
            Request::AttachImage(r) => Some(&r.handle),
            Request::DetachImage(r) => Some(&r.handle),
            Request::Create(_) | Request::Ping(_) | Request::List(_) | Request::Echo(_) => None,
        }
    }

    /// Whether the request may produce intermediate stream responses or block
    /// on job completion.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Request::Link(_) | Request::Run(_) | Request::Stream(_))
    }
}

impl Response {
    /// Encode as a frame payload.
    pub fn encode(&self) -> Bytes {
        Bytes::from(self.wrap().encode_to_vec())
    }

    /// Decode a frame payload.
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        Self::unwrap(&WrappedResponse::decode(payload)?)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }

    /// A stream chunk that is not the final one.
    pub fn is_intermediate(&self) -> bool {
        matches!(self, Response::Stream(s) if s.exit_status.is_none())
    }
}

impl From<ErrorResponse> for Response {
    fn from(e: ErrorResponse) -> Self {
        Response::Error(e)
    }
}
