//! Scripted in-memory server for driving a `Connection` in tests.

#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use qail_native::protocol::codec::{ByteOrder, WireReader, WireWriter};
use qail_native::protocol::frame::{self, Command, MessageHeader, FLAG_MORE_FRAMES};
use qail_native::protocol::messages::{
    PREAMBLE_MAGIC, RESULT_DESCRIBED, RESULT_HAS_REMAIN, RESULT_ROWSET,
};
use qail_native::protocol::type_id;
use qail_native::{ConnectOptions, Pbkdf2Sha256};

pub const USER: &str = "app";
pub const PASSWORD: &str = "s3cret";

pub fn options() -> ConnectOptions {
    ConnectOptions::new("mock", 4588, USER, PASSWORD)
        .tenant("tenant_a")
        .fetch_size(2)
}

/// Client half and server half of one in-memory connection.
pub fn pair(order: ByteOrder) -> (DuplexStream, MockServer) {
    let (client, server) = tokio::io::duplex(256 * 1024);
    (client, MockServer { stream: server, order })
}

/// How the scripted handshake should behave.
#[derive(Debug, Clone)]
pub struct Script {
    pub preamble_flag: u16,
    pub capacity: u32,
    pub iterations: u32,
    /// Flip this byte of the echoed client key.
    pub tamper_echo_at: Option<usize>,
    pub wrong_signing_key: bool,
    pub charset: u32,
    pub banner: Vec<u8>,
    pub login_error: Option<(i32, &'static str)>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            preamble_flag: 0,
            capacity: 0,
            iterations: 64,
            tamper_echo_at: None,
            wrong_signing_key: false,
            charset: 0,
            banner: b"mock server 1.0".to_vec(),
            login_error: None,
        }
    }
}

/// What the server saw in the login request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSeen {
    pub user: Bytes,
    pub hash_matches: bool,
    pub client_addr: Bytes,
    pub tenant: Bytes,
    pub flags: u32,
}

/// One logical request as the server received it.
#[derive(Debug)]
pub struct Request {
    pub header: MessageHeader,
    pub payload: Bytes,
    pub frames: usize,
}

impl Request {
    pub fn command(&self) -> Option<Command> {
        Command::from_code(self.header.command)
    }

    pub fn seq(&self) -> u32 {
        self.header.seq
    }
}

pub struct MockServer {
    stream: DuplexStream,
    pub order: ByteOrder,
}

impl MockServer {
    pub fn writer(&self) -> WireWriter {
        WireWriter::new(self.order)
    }

    pub fn reader(&self, payload: Bytes) -> WireReader {
        WireReader::new(payload, self.order)
    }

    /// Read one logical request, joining continuation frames. `None` once
    /// the client has gone away.
    pub async fn try_read_request(&mut self) -> Option<Request> {
        let mut payload = BytesMut::new();
        let mut frames = 0;
        loop {
            let mut prefix = [0u8; frame::LENGTH_PREFIX];
            self.stream.read_exact(&mut prefix).await.ok()?;
            let len = frame::body_len(self.order, prefix).ok()?;
            let mut body = BytesMut::zeroed(len);
            self.stream.read_exact(&mut body).await.ok()?;
            let (header, part) = frame::split_body(self.order, body).ok()?;
            payload.extend_from_slice(&part);
            frames += 1;
            if !header.has_more() {
                return Some(Request {
                    header,
                    payload: payload.freeze(),
                    frames,
                });
            }
        }
    }

    pub async fn read_request(&mut self, expected: Command) -> Request {
        let req = self
            .try_read_request()
            .await
            .expect("client closed the stream");
        assert_eq!(req.command(), Some(expected), "unexpected request {:?}", req.header);
        req
    }

    fn header(&self, command: Command, seq: u32, result: u8, flags: u16) -> MessageHeader {
        MessageHeader {
            command: command.code(),
            result,
            flags,
            version: [9, 9, 9],
            seq,
        }
    }

    pub async fn send_frame(&mut self, header: MessageHeader, payload: &[u8]) {
        let bytes = frame::encode_frame(self.order, &header, payload);
        self.stream.write_all(&bytes).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn reply(&mut self, req: &Request, payload: &[u8]) {
        let header = self.header(req.command().unwrap(), req.seq(), 0, 0);
        self.send_frame(header, payload).await;
    }

    /// Reply with the payload split into `parts` continuation frames.
    pub async fn reply_in_frames(&mut self, req: &Request, payload: &[u8], parts: usize) {
        let chunk = payload.len().div_ceil(parts).max(1);
        let pieces: Vec<&[u8]> = payload.chunks(chunk).collect();
        for (i, piece) in pieces.iter().enumerate() {
            let flags = if i + 1 < pieces.len() { FLAG_MORE_FRAMES } else { 0 };
            let header = self.header(req.command().unwrap(), req.seq(), 0, flags);
            self.send_frame(header, piece).await;
        }
    }

    pub async fn reply_error(&mut self, req: &Request, code: i32, message: &[u8]) {
        let mut w = self.writer();
        w.put_i32(code).put_i32(1).put_i32(8).put_raw(message).put_u8(0);
        let header = self.header(req.command().unwrap(), req.seq(), 1, 0);
        self.send_frame(header, &w.finish()).await;
    }

    /// Send only the first `cut` bytes of a reply frame.
    pub async fn reply_partial(&mut self, req: &Request, payload: &[u8], cut: usize) {
        let header = self.header(req.command().unwrap(), req.seq(), 0, 0);
        let bytes = frame::encode_frame(self.order, &header, payload);
        self.send_raw(&bytes[..cut]).await;
    }

    /// A frame carrying a sequence number nobody asked for.
    pub async fn send_stale(&mut self, req: &Request, payload: &[u8]) {
        let header = self.header(req.command().unwrap(), req.seq().wrapping_add(100), 0, 0);
        self.send_frame(header, payload).await;
    }

    pub async fn read_magic(&mut self) {
        let mut magic = [0u8; 4];
        self.stream.read_exact(&mut magic).await.unwrap();
        assert_eq!(magic, PREAMBLE_MAGIC);
    }

    /// Play the server side of connect. Returns the login request when the
    /// script gets that far.
    pub async fn handshake(&mut self, script: &Script) -> Option<LoginSeen> {
        self.read_magic().await;
        let mut reply = self.writer();
        reply
            .put_u8(self.order.flag())
            .put_u8(3)
            .put_u16(script.preamble_flag);
        self.send_raw(&reply.finish()).await;
        if script.preamble_flag != 0 {
            return None;
        }

        let req = self.read_request(Command::Handshake).await;
        let client_key = self.reader(req.payload.clone()).get_field().unwrap();
        assert_eq!(client_key.len(), 32);
        let mut scramble = client_key.to_vec();
        scramble.extend_from_slice(&[0x5A; 16]);
        if let Some(at) = script.tamper_echo_at {
            scramble[at] ^= 0xFF;
        }
        let mut ack = self.writer();
        ack.put_u32(script.capacity)
            .put_u32(7)
            .put_field(&scramble)
            .put_u32(script.iterations);
        self.reply(&req, &ack.finish()).await;
        if script.tamper_echo_at.is_some() || script.iterations == 0 {
            return None;
        }

        let req = self.read_request(Command::AuthInit).await;
        let mut r = self.reader(req.payload.clone());
        assert_eq!(r.get_field().unwrap().as_ref(), USER.as_bytes());
        assert_eq!(r.get_field().unwrap(), client_key);
        let signing_key = if script.wrong_signing_key {
            Pbkdf2Sha256::server_key(b"other password", &scramble, script.iterations)
        } else {
            Pbkdf2Sha256::server_key(PASSWORD.as_bytes(), &scramble, script.iterations)
        };
        let mut challenge = self.writer();
        challenge.put_field(&signing_key);
        self.reply(&req, &challenge.finish()).await;
        if script.wrong_signing_key {
            return None;
        }

        let req = self.read_request(Command::Login).await;
        let mut r = self.reader(req.payload.clone());
        let user = r.get_field().unwrap();
        let hash = r.get_field().unwrap();
        let client_addr = r.get_field().unwrap();
        let _tz = r.get_i32().unwrap();
        let tenant = r.get_field().unwrap();
        let flags = r.get_u32().unwrap();
        let expected = {
            use qail_native::PasswordHasher;
            Pbkdf2Sha256.derive_hash(PASSWORD.as_bytes(), &scramble, script.iterations)
        };
        let seen = LoginSeen {
            user,
            hash_matches: hash.as_ref() == expected.as_slice(),
            client_addr,
            tenant,
            flags,
        };
        match script.login_error {
            Some((code, message)) => self.reply_error(&req, code, message.as_bytes()).await,
            None => {
                let mut ack = self.writer();
                ack.put_u32(script.charset).put_u32(4242).put_field(&script.banner);
                self.reply(&req, &ack.finish()).await;
            }
        }
        Some(seen)
    }
}

/// Decoded execute request.
#[derive(Debug)]
pub struct ExecuteSeen {
    pub handle: i32,
    pub describe: bool,
    pub fetch_size: u32,
    pub query: Bytes,
}

pub fn parse_execute(order: ByteOrder, payload: Bytes) -> ExecuteSeen {
    let mut r = WireReader::new(payload, order);
    ExecuteSeen {
        handle: r.get_i32().unwrap(),
        describe: r.get_u32().unwrap() & 1 != 0,
        fetch_size: r.get_u32().unwrap(),
        query: r.get_field().unwrap(),
    }
}

/// `(handle, fetch_size)` of a fetch request.
pub fn parse_fetch(order: ByteOrder, payload: Bytes) -> (i32, u32) {
    let mut r = WireReader::new(payload, order);
    (r.get_i32().unwrap(), r.get_u32().unwrap())
}

pub type TestRow = Vec<Option<Vec<u8>>>;

/// Column list as `(name, type id)`; every column is nullable.
pub fn put_columns(w: &mut WireWriter, columns: &[(&str, u32)]) {
    w.put_u32(columns.len() as u32);
    for (name, ty) in columns {
        let length = match *ty {
            type_id::INTEGER | type_id::DATE => 4,
            type_id::BIGINT | type_id::DOUBLE | type_id::TIMESTAMP | type_id::TIME => 8,
            _ => 64,
        };
        w.put_field(name.as_bytes())
            .put_u32(*ty)
            .put_u32(length)
            .put_i32(0)
            .put_i32(0)
            .put_u32(1);
    }
}

pub fn put_rows(w: &mut WireWriter, rows: &[TestRow]) {
    w.put_u32(rows.len() as u32);
    for row in rows {
        for col in row {
            w.put_nullable_field(col.as_deref());
        }
    }
}

pub fn execute_reply(
    order: ByteOrder,
    handle: i32,
    affected: u64,
    columns: Option<&[(&str, u32)]>,
    rows: Option<&[TestRow]>,
    has_remain: bool,
) -> BytesMut {
    let mut flags = 0;
    if columns.is_some() {
        flags |= RESULT_DESCRIBED;
    }
    if rows.is_some() {
        flags |= RESULT_ROWSET;
    }
    if has_remain {
        flags |= RESULT_HAS_REMAIN;
    }
    let mut w = WireWriter::new(order);
    w.put_i32(handle).put_u32(flags).put_u64(affected);
    if let Some(columns) = columns {
        put_columns(&mut w, columns);
    }
    if let Some(rows) = rows {
        put_rows(&mut w, rows);
    }
    w.finish()
}

pub fn fetch_reply(order: ByteOrder, rows: &[TestRow], has_remain: bool) -> BytesMut {
    let mut w = WireWriter::new(order);
    w.put_u32(if has_remain { RESULT_HAS_REMAIN } else { 0 });
    put_rows(&mut w, rows);
    w.finish()
}

/// Big- or little-endian i32 column value.
pub fn int(order: ByteOrder, v: i32) -> Option<Vec<u8>> {
    Some(match order {
        ByteOrder::Big => v.to_be_bytes().to_vec(),
        ByteOrder::Little => v.to_le_bytes().to_vec(),
    })
}

pub fn text(s: &str) -> Option<Vec<u8>> {
    Some(s.as_bytes().to_vec())
}
