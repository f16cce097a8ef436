// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for stream framing.
//!
//! Every message travels as one frame:
//! - ASCII decimal payload length
//! - `\r\n`
//! - N bytes: protobuf payload (a wrapped request or response)
//! - `\r\n`
//!
//! The decoder is restartable: feeding it an incomplete buffer yields nothing
//! and leaves the buffer untouched until the rest of the frame arrives.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum frame size (64 MB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Longest accepted length prefix, in digits.
pub const MAX_LENGTH_DIGITS: usize = 20;

const CRLF: &[u8] = b"\r\n";

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(u64),

    #[error("malformed length prefix: {0}")]
    MalformedLength(String),

    #[error("frame of {0} bytes is not terminated by CRLF")]
    MissingTerminator(usize),

    #[error("unknown message type: {0}")]
    UnknownType(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("connection closed")]
    ConnectionClosed,
}

/// Encode a payload as `"<len>\r\n<payload>\r\n"`.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    put_frame(payload, &mut buf);
    buf.freeze()
}

fn put_frame(payload: &[u8], dst: &mut BytesMut) {
    let prefix = payload.len().to_string();
    dst.reserve(prefix.len() + payload.len() + 2 * CRLF.len());
    dst.put_slice(prefix.as_bytes());
    dst.put_slice(CRLF);
    dst.put_slice(payload);
    dst.put_slice(CRLF);
}

/// Try to take one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed. On success the frame
/// (prefix, payload and terminator) is removed from the buffer.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
    let mut digits = 0;
    loop {
        match buf.get(digits) {
            None => return Ok(None),
            Some(b'\r') => break,
            Some(b) if b.is_ascii_digit() => {
                digits += 1;
                if digits > MAX_LENGTH_DIGITS {
                    return Err(FrameError::MalformedLength(format!(
                        "more than {MAX_LENGTH_DIGITS} digits"
                    )));
                }
            }
            Some(b) => {
                return Err(FrameError::MalformedLength(format!(
                    "unexpected byte 0x{b:02x}"
                )));
            }
        }
    }

    if digits == 0 {
        return Err(FrameError::MalformedLength("empty length".to_string()));
    }
    match buf.get(digits + 1) {
        None => return Ok(None),
        Some(b'\n') => {}
        Some(b) => {
            return Err(FrameError::MalformedLength(format!(
                "expected LF after CR, got 0x{b:02x}"
            )));
        }
    }

    // At most 20 ASCII digits, so this is valid UTF-8.
    let text = std::str::from_utf8(&buf[..digits])
        .map_err(|e| FrameError::MalformedLength(e.to_string()))?;
    let length: u64 = text
        .parse()
        .map_err(|_| FrameError::FrameTooLarge(u64::MAX))?;
    if length > MAX_FRAME_SIZE as u64 {
        return Err(FrameError::FrameTooLarge(length));
    }
    let length = length as usize;

    let header = digits + CRLF.len();
    let total = header + length + CRLF.len();
    if buf.len() < total {
        buf.reserve(total - buf.len());
        return Ok(None);
    }
    if &buf[header + length..total] != CRLF {
        return Err(FrameError::MissingTerminator(length));
    }

    buf.advance(header);
    let payload = buf.split_to(length).freeze();
    buf.advance(CRLF.len());
    Ok(Some(payload))
}

/// Lazily drain every complete frame currently held in a buffer.
///
/// Iteration stops at the first incomplete frame; whatever remains stays in
/// the buffer for the next call.
pub fn decode_frames(buf: &mut BytesMut) -> Frames<'_> {
    Frames { buf, failed: false }
}

/// Iterator returned by [`decode_frames`].
pub struct Frames<'a> {
    buf: &'a mut BytesMut,
    failed: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<Bytes, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match decode_frame(self.buf) {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Codec for length-prefixed frames, for use with `tokio_util::codec::Framed`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        decode_frame(src)
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        if item.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(item.len() as u64));
        }
        put_frame(&item, dst);
        Ok(())
    }
}
