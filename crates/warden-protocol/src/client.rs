// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client helpers for talking to a warden daemon.

use std::net::SocketAddr;
use std::path::Path;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio_util::codec::Framed;
use tracing::{debug, instrument};

use crate::frame::{FrameCodec, FrameError};
use crate::messages::*;
use crate::wrap::{Request, Response, Type};

/// Errors that can occur in the client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server error: {message}")]
    Server {
        message: String,
        data: Option<String>,
        backtrace: Vec<String>,
    },

    #[error("expected {expected:?} response, got {got:?}")]
    UnexpectedResponse { expected: Type, got: Type },

    #[error("connection closed")]
    ConnectionClosed,
}

impl From<ErrorResponse> for ClientError {
    fn from(e: ErrorResponse) -> Self {
        ClientError::Server {
            message: e.message.unwrap_or_else(|| "unknown error".to_string()),
            data: e.data,
            backtrace: e.backtrace,
        }
    }
}

/// Connection to a warden daemon.
///
/// Requests on one connection are answered in order, so the client issues one
/// request at a time.
pub struct WardenClient<S> {
    framed: Framed<S, FrameCodec>,
}

impl WardenClient<UnixStream> {
    /// Connect over a Unix domain socket.
    #[instrument]
    pub async fn connect_unix(path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path).await?;
        debug!("connected");
        Ok(Self::new(stream))
    }
}

impl WardenClient<TcpStream> {
    /// Connect over TCP.
    #[instrument]
    pub async fn connect_tcp(addr: SocketAddr) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!("connected");
        Ok(Self::new(stream))
    }
}

macro_rules! typed_calls {
    ($($(#[$doc:meta])* $name:ident($req:ident) -> $resp:ident via $variant:ident;)*) => {
        $(
            $(#[$doc])*
            pub async fn $name(&mut self, request: $req) -> Result<$resp, ClientError> {
                match self.call(Request::$variant(request)).await? {
                    Response::$variant(r) => Ok(r),
                    other => Err(ClientError::UnexpectedResponse {
                        expected: Type::$variant,
                        got: other.message_type(),
                    }),
                }
            }
        )*
    };
}

impl<S: AsyncRead + AsyncWrite + Unpin> WardenClient<S> {
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, FrameCodec),
        }
    }

    pub fn into_inner(self) -> S {
        self.framed.into_inner()
    }

    /// Write one request frame.
    pub async fn send(&mut self, request: &Request) -> Result<(), ClientError> {
        self.framed.send(request.encode()).await?;
        Ok(())
    }

    /// Read one response frame, error responses included.
    pub async fn recv(&mut self) -> Result<Response, ClientError> {
        match self.framed.next().await {
            Some(frame) => Ok(Response::decode(&frame?)?),
            None => Err(ClientError::ConnectionClosed),
        }
    }

    /// Send a request and read its response.
    ///
    /// Error responses are returned as [`ClientError::Server`].
    pub async fn call(&mut self, request: Request) -> Result<Response, ClientError> {
        self.send(&request).await?;
        match self.recv().await? {
            Response::Error(e) => Err(e.into()),
            response => Ok(response),
        }
    }

    /// Stream a job's output, handing every chunk to `on_chunk`.
    ///
    /// Returns the final response carrying the exit status.
    pub async fn stream<F>(
        &mut self,
        request: StreamRequest,
        mut on_chunk: F,
    ) -> Result<StreamResponse, ClientError>
    where
        F: FnMut(&StreamResponse),
    {
        self.send(&Request::Stream(request)).await?;
        loop {
            match self.recv().await? {
                Response::Error(e) => return Err(e.into()),
                Response::Stream(chunk) if chunk.exit_status.is_none() => on_chunk(&chunk),
                Response::Stream(last) => return Ok(last),
                other => {
                    return Err(ClientError::UnexpectedResponse {
                        expected: Type::Stream,
                        got: other.message_type(),
                    });
                }
            }
        }
    }

    typed_calls! {
        /// Check that the daemon is alive.
        ping(PingRequest) -> PingResponse via Ping;
        echo(EchoRequest) -> EchoResponse via Echo;
        list(ListRequest) -> ListResponse via List;
        create(CreateRequest) -> CreateResponse via Create;
        stop(StopRequest) -> StopResponse via Stop;
        destroy(DestroyRequest) -> DestroyResponse via Destroy;
        info(InfoRequest) -> InfoResponse via Info;
        spawn(SpawnRequest) -> SpawnResponse via Spawn;
        /// Wait for a job to finish.
        link(LinkRequest) -> LinkResponse via Link;
        /// Spawn a job and wait for it to finish.
        run(RunRequest) -> RunResponse via Run;
        net_in(NetInRequest) -> NetInResponse via NetIn;
        net_out(NetOutRequest) -> NetOutResponse via NetOut;
        copy_in(CopyInRequest) -> CopyInResponse via CopyIn;
        copy_out(CopyOutRequest) -> CopyOutResponse via CopyOut;
        limit_memory(LimitMemoryRequest) -> LimitMemoryResponse via LimitMemory;
        limit_disk(LimitDiskRequest) -> LimitDiskResponse via LimitDisk;
        limit_bandwidth(LimitBandwidthRequest) -> LimitBandwidthResponse via LimitBandwidth;
        limit_cpu(LimitCpuRequest) -> LimitCpuResponse via LimitCpu;
        attach_image(AttachImageRequest) -> AttachImageResponse via AttachImage;
        detach_image(DetachImageRequest) -> DetachImageResponse via DetachImage;
    }
}
