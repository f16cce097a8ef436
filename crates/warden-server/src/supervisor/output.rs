// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Output buffers with incremental listeners.
//!
//! Each listener tracks its own offset into the shared buffer and only ever
//! receives bytes past that offset. Closing a stream gives every listener one
//! final delivery (possibly empty) marked `eof`.

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

/// Which standard stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamName {
    Stdout,
    Stderr,
}

impl StreamName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamName::Stdout => "stdout",
            StreamName::Stderr => "stderr",
        }
    }
}

/// A slice of output delivered to a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub stream: StreamName,
    pub data: Bytes,
    /// No further chunks follow for this stream.
    pub eof: bool,
}

/// Receiving end for stream listeners.
pub type StreamSink = mpsc::UnboundedSender<StreamChunk>;

#[derive(Debug)]
struct Listener {
    offset: usize,
    sink: StreamSink,
}

/// Accumulated output of one stream.
#[derive(Debug)]
pub struct OutputStream {
    name: StreamName,
    buffer: BytesMut,
    discard: bool,
    closed: bool,
    listeners: Vec<Listener>,
}

impl OutputStream {
    pub fn new(name: StreamName, prepend: Option<Bytes>, discard: bool) -> Self {
        let mut buffer = BytesMut::new();
        if let Some(seed) = prepend {
            buffer.extend_from_slice(&seed);
        }
        Self {
            name,
            buffer,
            discard,
            closed: false,
            listeners: Vec::new(),
        }
    }

    pub fn name(&self) -> StreamName {
        self.name
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Copy of everything buffered so far.
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buffer)
    }

    /// Append data read from the child and deliver it to listeners.
    ///
    /// Returns the number of bytes actually buffered (zero when discarding or
    /// after close).
    pub fn append(&mut self, data: &[u8]) -> usize {
        if self.closed || self.discard || data.is_empty() {
            return 0;
        }
        self.buffer.extend_from_slice(data);
        self.deliver(false);
        data.len()
    }

    /// Close the stream: every listener gets its remaining bytes once, with
    /// `eof` set, and is then dropped.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.deliver(true);
        self.listeners.clear();
    }

    /// Attach a listener.
    ///
    /// On a closed stream the whole buffer is sent once with `eof` set. On a
    /// live stream the listener starts at offset zero and is caught up
    /// immediately.
    pub fn add_listener(&mut self, sink: StreamSink) {
        if self.closed {
            let _ = sink.send(StreamChunk {
                stream: self.name,
                data: self.snapshot(),
                eof: true,
            });
            return;
        }
        self.listeners.push(Listener { offset: 0, sink });
        self.deliver(false);
    }

    fn deliver(&mut self, eof: bool) {
        let name = self.name;
        let buffer = &self.buffer;
        self.listeners.retain_mut(|listener| {
            let end = buffer.len();
            if listener.offset == end && !eof {
                return true;
            }
            let data = Bytes::copy_from_slice(&buffer[listener.offset..end]);
            listener.offset = end;
            listener
                .sink
                .send(StreamChunk {
                    stream: name,
                    data,
                    eof,
                })
                .is_ok()
        });
    }

    #[cfg(test)]
    fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}
