//! Message framing and request/response correlation.
//!
//! Wire format of one physical frame:
//! - total length (4 bytes, counts itself)
//! - header (12 bytes): command, result, flags (2), version triple, reserved, request sequence (4)
//! - payload
//!
//! A logical response may span several frames; every frame but the last
//! carries [`FLAG_MORE_FRAMES`]. Frames whose sequence number differs from
//! the outstanding request are consumed and dropped.

use bytes::{BufMut, Bytes, BytesMut};

use super::codec::{ByteOrder, Charset, WireReader};
use crate::error::{Error, Result, ServerError};

/// Size of the length prefix.
pub const LENGTH_PREFIX: usize = 4;
/// Size of the fixed message header.
pub const HEADER_LEN: usize = 12;
/// Prefix plus header.
pub const FRAME_OVERHEAD: usize = LENGTH_PREFIX + HEADER_LEN;
/// Largest inbound frame accepted.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;
/// Largest reassembled payload of one logical response.
pub const MAX_RESPONSE_LEN: usize = MAX_FRAME_LEN;

/// "More frames follow for this logical response."
pub const FLAG_MORE_FRAMES: u16 = 0x0100;

/// Protocol version triple sent in every outbound header.
pub const CLIENT_VERSION: [u8; 3] = [2, 1, 0];

/// Size of the fixed diagnostic block in an error payload.
const ERROR_DIAG_LEN: usize = 12;

/// Command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Handshake = 0x01,
    AuthInit = 0x02,
    Login = 0x03,
    Logout = 0x04,
    Execute = 0x10,
    Fetch = 0x11,
    FreeStatement = 0x12,
    Commit = 0x13,
    Rollback = 0x14,
    Ping = 0x20,
}

impl Command {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => Command::Handshake,
            0x02 => Command::AuthInit,
            0x03 => Command::Login,
            0x04 => Command::Logout,
            0x10 => Command::Execute,
            0x11 => Command::Fetch,
            0x12 => Command::FreeStatement,
            0x13 => Command::Commit,
            0x14 => Command::Rollback,
            0x20 => Command::Ping,
            _ => return None,
        })
    }
}

/// Fixed message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub command: u8,
    pub result: u8,
    pub flags: u16,
    pub version: [u8; 3],
    pub seq: u32,
}

impl MessageHeader {
    /// Header for an outbound request frame.
    pub fn request(command: Command, seq: u32) -> Self {
        Self {
            command: command.code(),
            result: 0,
            flags: 0,
            version: CLIENT_VERSION,
            seq,
        }
    }

    pub fn has_more(&self) -> bool {
        self.flags & FLAG_MORE_FRAMES != 0
    }

    pub fn encode(&self, order: ByteOrder, buf: &mut BytesMut) {
        buf.put_u8(self.command);
        buf.put_u8(self.result);
        match order {
            ByteOrder::Little => buf.put_u16_le(self.flags),
            ByteOrder::Big => buf.put_u16(self.flags),
        }
        buf.put_slice(&self.version);
        buf.put_u8(0);
        match order {
            ByteOrder::Little => buf.put_u32_le(self.seq),
            ByteOrder::Big => buf.put_u32(self.seq),
        }
    }

    pub fn decode(order: ByteOrder, b: &[u8; HEADER_LEN]) -> Self {
        Self {
            command: b[0],
            result: b[1],
            flags: order.u16_from([b[2], b[3]]),
            version: [b[4], b[5], b[6]],
            seq: order.u32_from([b[8], b[9], b[10], b[11]]),
        }
    }
}

/// Encode one complete frame (prefix, header, payload).
pub fn encode_frame(order: ByteOrder, header: &MessageHeader, payload: &[u8]) -> BytesMut {
    let total = FRAME_OVERHEAD + payload.len();
    let mut buf = BytesMut::with_capacity(total);
    match order {
        ByteOrder::Little => buf.put_u32_le(total as u32),
        ByteOrder::Big => buf.put_u32(total as u32),
    }
    header.encode(order, &mut buf);
    buf.extend_from_slice(payload);
    buf
}

/// Split a request payload into frames no larger than `capacity` bytes.
///
/// `capacity == 0` (or a capacity too small to carry any payload) sends a
/// single frame. Every frame but the last carries [`FLAG_MORE_FRAMES`].
pub fn encode_request(
    order: ByteOrder,
    command: Command,
    seq: u32,
    payload: &[u8],
    capacity: usize,
) -> Vec<BytesMut> {
    let chunk = capacity.saturating_sub(FRAME_OVERHEAD);
    if capacity == 0 || chunk == 0 || payload.len() <= chunk {
        return vec![encode_frame(order, &MessageHeader::request(command, seq), payload)];
    }

    let mut frames = Vec::with_capacity(payload.len().div_ceil(chunk));
    let mut parts = payload.chunks(chunk).peekable();
    while let Some(part) = parts.next() {
        let mut header = MessageHeader::request(command, seq);
        if parts.peek().is_some() {
            header.flags |= FLAG_MORE_FRAMES;
        }
        frames.push(encode_frame(order, &header, part));
    }
    frames
}

/// Validate a received length prefix and return the number of bytes that
/// follow it (header plus payload).
pub fn body_len(order: ByteOrder, prefix: [u8; LENGTH_PREFIX]) -> Result<usize> {
    let total = order.u32_from(prefix) as usize;
    if total < FRAME_OVERHEAD {
        return Err(Error::malformed(format!(
            "frame length {total} shorter than header"
        )));
    }
    if total > MAX_FRAME_LEN {
        return Err(Error::malformed(format!(
            "frame length {total} exceeds {MAX_FRAME_LEN}"
        )));
    }
    Ok(total - LENGTH_PREFIX)
}

/// Split a frame body (everything after the length prefix) into header and payload.
pub fn split_body(order: ByteOrder, mut body: BytesMut) -> Result<(MessageHeader, Bytes)> {
    if body.len() < HEADER_LEN {
        return Err(Error::malformed("frame body shorter than header"));
    }
    let head = body.split_to(HEADER_LEN);
    let mut raw = [0u8; HEADER_LEN];
    raw.copy_from_slice(&head);
    Ok((MessageHeader::decode(order, &raw), body.freeze()))
}

/// A reassembled logical response.
#[derive(Debug, Clone)]
pub struct Response {
    /// Header of the first frame.
    pub header: MessageHeader,
    /// First non-zero result code seen across the frames, or 0.
    pub result: u8,
    /// Concatenated payloads in arrival order.
    pub payload: Bytes,
    /// Number of physical frames that made up the response.
    pub frames: usize,
}

impl Response {
    /// Payload on success; a decoded [`ServerError`] for a non-zero result code.
    pub fn into_payload(self, order: ByteOrder, charset: Charset) -> Result<Bytes> {
        if self.result == 0 {
            return Ok(self.payload);
        }
        Err(Error::Server(decode_server_error(
            self.result,
            self.payload,
            order,
            charset,
        )?))
    }
}

fn decode_server_error(
    result: u8,
    payload: Bytes,
    order: ByteOrder,
    charset: Charset,
) -> Result<ServerError> {
    if payload.len() < ERROR_DIAG_LEN {
        return Err(Error::malformed(format!(
            "error frame (result {result}) with {} payload bytes",
            payload.len()
        )));
    }
    let mut r = WireReader::new(payload, order);
    let code = r.get_i32()?;
    let line = r.get_i32()?;
    let column = r.get_i32()?;
    let message = charset.decode(&r.get_cstring()).into_owned();
    Ok(ServerError {
        code,
        line,
        column,
        message,
    })
}

/// Outcome of feeding one frame into a [`ResponseAssembler`].
#[derive(Debug)]
pub enum Assembly {
    /// Frame belonged to another request and was dropped.
    Skipped(MessageHeader),
    /// Frame accepted; more frames follow.
    Partial,
    /// Last frame accepted.
    Complete(Response),
}

/// Collects the frames answering one outstanding request.
#[derive(Debug)]
pub struct ResponseAssembler {
    seq: u32,
    first: Option<MessageHeader>,
    result: u8,
    payload: BytesMut,
    frames: usize,
    skipped: usize,
    limit: usize,
}

impl ResponseAssembler {
    pub fn new(seq: u32) -> Self {
        Self::with_limit(seq, MAX_RESPONSE_LEN)
    }

    /// Assembler that rejects responses whose payloads add up to more than `limit` bytes.
    pub fn with_limit(seq: u32, limit: usize) -> Self {
        Self {
            seq,
            first: None,
            result: 0,
            payload: BytesMut::new(),
            frames: 0,
            skipped: 0,
            limit,
        }
    }

    /// Frames dropped so far because of a sequence mismatch.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn push(&mut self, header: MessageHeader, payload: Bytes) -> Result<Assembly> {
        if header.seq != self.seq {
            self.skipped += 1;
            return Ok(Assembly::Skipped(header));
        }
        let total = self.payload.len() + payload.len();
        if total > self.limit {
            return Err(Error::malformed(format!(
                "response {} exceeds {} bytes after {} frames",
                self.seq, self.limit, self.frames
            )));
        }
        let first = *self.first.get_or_insert(header);
        if self.result == 0 {
            self.result = header.result;
        }
        self.frames += 1;
        if !header.has_more() && self.frames == 1 {
            // Single-frame response: hand the payload over without copying.
            return Ok(Assembly::Complete(Response {
                header: first,
                result: self.result,
                payload,
                frames: 1,
            }));
        }
        self.payload.extend_from_slice(&payload);
        if header.has_more() {
            return Ok(Assembly::Partial);
        }
        Ok(Assembly::Complete(Response {
            header: first,
            result: self.result,
            payload: std::mem::take(&mut self.payload).freeze(),
            frames: self.frames,
        }))
    }
}
