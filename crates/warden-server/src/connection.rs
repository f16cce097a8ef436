// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! One client connection.
//!
//! A reader task decodes frames and queues requests; the connection task
//! answers them one at a time, in arrival order. A decode failure is fatal:
//! requests queued before it are still answered, then the connection closes
//! without a response to the bad frame.
//!
//! When the drain token fires the connection closes as soon as it is idle.
//! A non-streaming request in flight is allowed to finish; link, run and
//! stream are abandoned. They are also abandoned when the client goes away,
//! so its references are released without waiting for the job.

use std::collections::HashMap;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use warden_protocol::{FrameCodec, FrameError, Request, Response};

use crate::container::Container;
use crate::context::ServerContext;
use crate::handlers::handle_request;

/// Requests decoded ahead of the one being answered.
const REQUEST_QUEUE_DEPTH: usize = 32;

/// Containers a connection has referenced.
///
/// Every container named by a request on the connection is referenced once.
/// A handle reused by a new container replaces the old entry. When the
/// connection closes all references are dropped, which may arm the
/// containers' grace timers.
#[derive(Debug)]
pub struct References {
    id: u64,
    containers: Mutex<HashMap<String, Arc<Container>>>,
}

impl References {
    pub fn new(connection_id: u64) -> Self {
        Self {
            id: connection_id,
            containers: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn reference(&self, container: &Arc<Container>) {
        let mut containers = self.containers.lock().await;
        if let Some(known) = containers.get(container.handle())
            && Arc::ptr_eq(known, container)
        {
            return;
        }
        container.add_connection(self.id).await;
        if let Some(stale) = containers.insert(container.handle().to_string(), container.clone()) {
            stale.remove_connection(self.id).await;
        }
    }

    pub async fn release_all(&self) {
        let containers: Vec<_> = self.containers.lock().await.drain().map(|(_, c)| c).collect();
        for container in containers {
            container.remove_connection(self.id).await;
        }
    }

    pub async fn len(&self) -> usize {
        self.containers.lock().await.len()
    }
}

/// Serve one connection until the client disconnects, a protocol error
/// occurs, or `drain` fires.
#[instrument(skip_all, fields(connection_id = connection_id))]
pub async fn serve_connection<S>(stream: S, ctx: Arc<ServerContext>, connection_id: u64, drain: CancellationToken)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    debug!("Connection opened");

    let (reader, writer) = tokio::io::split(stream);
    let mut writer = FramedWrite::new(writer, FrameCodec);
    let (request_tx, mut requests) = mpsc::channel(REQUEST_QUEUE_DEPTH);
    let disconnected = CancellationToken::new();
    let reader_task = tokio::spawn(read_requests(
        FramedRead::new(reader, FrameCodec),
        request_tx,
        disconnected.clone(),
    ));

    let refs = References::new(connection_id);
    loop {
        let next = tokio::select! {
            biased;
            _ = drain.cancelled() => {
                debug!("Closing idle connection for drain");
                break;
            }
            next = requests.recv() => next,
        };
        let request = match next {
            Some(Ok(request)) => request,
            Some(Err(e)) => {
                warn!(error = %e, "Protocol error, closing connection");
                break;
            }
            None => break,
        };

        match answer(&ctx, &refs, request, &mut writer, &drain, &disconnected).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    drain = drain.is_cancelled(),
                    disconnected = disconnected.is_cancelled(),
                    "Abandoned streaming request"
                );
                break;
            }
            Err(e) => {
                debug!(error = %e, "Write failed, closing connection");
                break;
            }
        }
    }

    reader_task.abort();
    refs.release_all().await;
    info!("Connection closed");
}

/// Decode requests into the queue. `disconnected` fires once the client has
/// gone away, which a malformed frame alone does not imply.
async fn read_requests<R>(
    mut frames: FramedRead<R, FrameCodec>,
    requests: mpsc::Sender<Result<Request, FrameError>>,
    disconnected: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    while let Some(frame) = frames.next().await {
        let decoded = frame.and_then(|payload| Request::decode(&payload));
        let fatal = decoded.is_err();
        if matches!(decoded, Err(FrameError::Io(_) | FrameError::ConnectionClosed)) {
            disconnected.cancel();
        }
        if requests.send(decoded).await.is_err() || fatal {
            return;
        }
    }
    debug!("Client closed its end");
    disconnected.cancel();
}

/// Run one request, forwarding intermediate responses as they are produced,
/// then write the final response.
///
/// Returns `Ok(false)` when a streaming request was abandoned because of a
/// drain or a disconnect.
async fn answer<W>(
    ctx: &Arc<ServerContext>,
    refs: &References,
    request: Request,
    writer: &mut FramedWrite<W, FrameCodec>,
    drain: &CancellationToken,
    disconnected: &CancellationToken,
) -> Result<bool, FrameError>
where
    W: AsyncWrite + Unpin,
{
    let streaming = request.is_streaming();
    let (sink, mut intermediate) = mpsc::unbounded_channel::<Response>();
    let handler = handle_request(ctx, refs, request, &sink);
    tokio::pin!(handler);

    let response = loop {
        tokio::select! {
            response = &mut handler => break response,
            Some(chunk) = intermediate.recv() => writer.send(chunk.encode()).await?,
            _ = drain.cancelled(), if streaming => return Ok(false),
            _ = disconnected.cancelled(), if streaming => return Ok(false),
        }
    };

    while let Ok(chunk) = intermediate.try_recv() {
        writer.send(chunk.encode()).await?;
    }
    writer.send(response.encode()).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InsecureBackend;
    use crate::config::Config;
    use crate::container::State;
    use crate::supervisor::Supervisor;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use warden_protocol::messages::*;
    use warden_protocol::{WardenClient, encode_frame};

    fn context(dir: &std::path::Path) -> Arc<ServerContext> {
        context_with_grace(dir, None)
    }

    fn context_with_grace(dir: &std::path::Path, grace_time: Option<Duration>) -> Arc<ServerContext> {
        let config = Config {
            container_root: dir.to_path_buf(),
            grace_time,
            network_release_delay: Duration::ZERO,
            kill_grace: Duration::from_millis(100),
            ..Default::default()
        };
        let supervisor = Supervisor::start().unwrap();
        let backend = Arc::new(InsecureBackend::new(dir, supervisor.clone()));
        Arc::new(ServerContext::new(config, backend, supervisor))
    }

    fn connect(ctx: &Arc<ServerContext>, drain: &CancellationToken) -> (DuplexStream, tokio::task::JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(serve_connection(server, ctx.clone(), 1, drain.clone()));
        (client, task)
    }

    async fn reaches_state(container: &Container, state: State, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if container.state().await == state {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        false
    }

    // ========== Ordering Tests ==========

    #[tokio::test]
    async fn test_pipelined_requests_answered_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let (stream, _task) = connect(&ctx, &CancellationToken::new());
        let mut client = WardenClient::new(stream);

        let created = client.create(CreateRequest::default()).await.unwrap();
        let handle = created.handle;

        // Slow run first, fast echo second; the echo must wait its turn
        client
            .send(&Request::Run(RunRequest {
                handle: handle.clone(),
                script: "sleep 0.2; echo slow".to_string(),
                ..Default::default()
            }))
            .await
            .unwrap();
        client
            .send(&Request::Echo(EchoRequest {
                message: "fast".to_string(),
            }))
            .await
            .unwrap();

        assert!(matches!(client.recv().await.unwrap(), Response::Run(ref r) if r.stdout.as_deref() == Some(&b"slow\n"[..])));
        assert!(matches!(client.recv().await.unwrap(), Response::Echo(ref e) if e.message == "fast"));
    }

    #[tokio::test]
    async fn test_domain_error_keeps_connection_open() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let (stream, _task) = connect(&ctx, &CancellationToken::new());
        let mut client = WardenClient::new(stream);

        let err = client
            .info(InfoRequest {
                handle: "nope".to_string(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown handle"));
        client.ping(PingRequest {}).await.unwrap();
    }

    // ========== Protocol Error Tests ==========

    #[tokio::test]
    async fn test_malformed_frame_closes_connection() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let (mut stream, task) = connect(&ctx, &CancellationToken::new());

        let ping = Request::Ping(PingRequest {}).encode();
        stream.write_all(&encode_frame(&ping)).await.unwrap();
        stream.write_all(b"abc\r\n").await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        // The ping queued before the bad frame is answered, nothing after it
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        let mut buf = bytes::BytesMut::from(&received[..]);
        let frames: Vec<_> = warden_protocol::decode_frames(&mut buf).collect();
        assert_eq!(frames.len(), 1);
        let response = Response::decode(frames[0].as_ref().unwrap()).unwrap();
        assert!(matches!(response, Response::Ping(_)));
    }

    #[tokio::test]
    async fn test_unknown_type_tag_closes_connection() {
        use prost::Message;

        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let (mut stream, task) = connect(&ctx, &CancellationToken::new());

        let wrapped = WrappedRequest {
            r#type: 9999,
            payload: Vec::new(),
        };
        stream
            .write_all(&encode_frame(&wrapped.encode_to_vec()))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }

    // ========== Drain Tests ==========

    #[tokio::test]
    async fn test_drain_closes_idle_connection() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let drain = CancellationToken::new();
        let (stream, task) = connect(&ctx, &drain);
        let mut client = WardenClient::new(stream);
        client.ping(PingRequest {}).await.unwrap();

        drain.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(client.ping(PingRequest {}).await.is_err());
    }

    #[tokio::test]
    async fn test_drain_abandons_link_but_finishes_plain_request() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let drain = CancellationToken::new();
        let (stream, task) = connect(&ctx, &drain);
        let mut client = WardenClient::new(stream);

        let handle = client.create(CreateRequest::default()).await.unwrap().handle;
        let job_id = client
            .spawn(SpawnRequest {
                handle: handle.clone(),
                script: "sleep 5".to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
            .job_id;
        client
            .send(&Request::Link(LinkRequest { handle, job_id }))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        drain.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(client.recv().await.is_err());
    }

    #[tokio::test]
    async fn test_close_releases_references() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let (stream, task) = connect(&ctx, &CancellationToken::new());
        let mut client = WardenClient::new(stream);

        let handle = client.create(CreateRequest::default()).await.unwrap().handle;
        let container = ctx.registry.find(&handle).await.unwrap();
        assert_eq!(container.connection_count().await, 1);

        drop(client);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(container.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_reused_handle_is_referenced_again() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_grace(dir.path(), Some(Duration::from_millis(300)));
        let (stream, task) = connect(&ctx, &CancellationToken::new());
        let mut client = WardenClient::new(stream);
        let create_foo = || CreateRequest {
            handle: Some("foo".to_string()),
            ..Default::default()
        };

        client.create(create_foo()).await.unwrap();
        let first = ctx.registry.find("foo").await.unwrap();
        client
            .destroy(DestroyRequest {
                handle: "foo".to_string(),
            })
            .await
            .unwrap();
        client.create(create_foo()).await.unwrap();
        let second = ctx.registry.find("foo").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.connection_count().await, 1);
        assert_eq!(first.connection_count().await, 0);

        drop(client);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(reaches_state(&second, State::Destroyed, Duration::from_secs(3)).await);
        assert!(!ctx.registry.contains("foo").await);
    }

    // ========== Disconnect Tests ==========

    #[tokio::test]
    async fn test_disconnect_during_link_releases_references() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_grace(dir.path(), Some(Duration::from_millis(300)));
        let (stream, task) = connect(&ctx, &CancellationToken::new());
        let mut client = WardenClient::new(stream);

        let handle = client.create(CreateRequest::default()).await.unwrap().handle;
        let container = ctx.registry.find(&handle).await.unwrap();
        let job_id = client
            .spawn(SpawnRequest {
                handle: handle.clone(),
                script: "sleep 10".to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
            .job_id;
        client
            .send(&Request::Link(LinkRequest { handle, job_id }))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        drop(client);
        tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(container.connection_count().await, 0);
        assert!(reaches_state(&container, State::Destroyed, Duration::from_secs(3)).await);
    }

    #[tokio::test]
    async fn test_disconnect_after_plain_request_still_answers_queue() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let (mut stream, task) = connect(&ctx, &CancellationToken::new());

        let echo = Request::Echo(EchoRequest {
            message: "last".to_string(),
        })
        .encode();
        stream.write_all(&encode_frame(&echo)).await.unwrap();
        stream.shutdown().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        let mut buf = bytes::BytesMut::from(&received[..]);
        let frames: Vec<_> = warden_protocol::decode_frames(&mut buf).collect();
        assert_eq!(frames.len(), 1);
        let response = Response::decode(frames[0].as_ref().unwrap()).unwrap();
        assert!(matches!(response, Response::Echo(ref e) if e.message == "last"));
    }
}
