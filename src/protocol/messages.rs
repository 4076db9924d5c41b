//! Request payload encoders and reply payload decoders, one pair per command.
//!
//! These only build and parse payloads; framing lives in [`super::frame`].

use bytes::{Bytes, BytesMut};

use super::codec::{ByteOrder, Charset, WireReader, WireWriter};
use super::types::FieldDescriptor;
use crate::error::{Error, Result};

/// Connection preamble sent before anything else.
pub const PREAMBLE_MAGIC: [u8; 4] = [0x7E, 0x51, 0x4E, 0x50];
/// Size of the server's preamble reply.
pub const PREAMBLE_REPLY_LEN: usize = 4;

/// Login flag: rows are returned in binary form.
pub const LOGIN_BINARY_ROWS: u32 = 0x1;
/// Login flag: the client accepts multi-frame responses.
pub const LOGIN_MULTI_FRAME: u32 = 0x2;

/// Execute request flag: send field descriptors.
pub const EXEC_DESCRIBE: u32 = 0x1;

/// Reply flag: field descriptors follow.
pub const RESULT_DESCRIBED: u32 = 0x1;
/// Reply flag: a row batch follows.
pub const RESULT_ROWSET: u32 = 0x2;
/// Reply flag: the server holds more rows for this statement.
pub const RESULT_HAS_REMAIN: u32 = 0x4;

/// Handle value asking the server to allocate a new statement.
pub const NEW_STATEMENT: i32 = -1;

/// Server reply to the preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreambleReply {
    pub byte_order: ByteOrder,
    pub server_version: u8,
    pub response_flag: u16,
}

impl PreambleReply {
    pub fn decode(raw: [u8; PREAMBLE_REPLY_LEN]) -> Result<Self> {
        let byte_order = ByteOrder::from_flag(raw[0])?;
        Ok(Self {
            byte_order,
            server_version: raw[1],
            response_flag: byte_order.u16_from([raw[2], raw[3]]),
        })
    }
}

pub fn encode_handshake(order: ByteOrder, client_key: &[u8]) -> BytesMut {
    let mut w = WireWriter::new(order);
    w.put_field(client_key);
    w.finish()
}

/// Handshake acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeAck {
    /// Largest frame the server accepts; 0 for unlimited.
    pub capacity: u32,
    pub server_protocol: u32,
    pub scramble: Bytes,
    pub iterations: u32,
}

impl HandshakeAck {
    pub fn decode(payload: Bytes, order: ByteOrder) -> Result<Self> {
        let mut r = WireReader::new(payload, order);
        Ok(Self {
            capacity: r.get_u32()?,
            server_protocol: r.get_u32()?,
            scramble: r.get_field()?,
            iterations: r.get_u32()?,
        })
    }
}

pub fn encode_auth_init(
    order: ByteOrder,
    charset: Charset,
    user: &str,
    client_key: &[u8],
    tenant: Option<&str>,
) -> BytesMut {
    let mut w = WireWriter::new(order);
    w.put_field(&charset.encode(user))
        .put_field(client_key)
        .put_field(&charset.encode(tenant.unwrap_or("")));
    w.finish()
}

/// Server's answer to the auth-init frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub server_signing_key: Bytes,
}

impl AuthChallenge {
    pub fn decode(payload: Bytes, order: ByteOrder) -> Result<Self> {
        let mut r = WireReader::new(payload, order);
        Ok(Self {
            server_signing_key: r.get_field()?,
        })
    }
}

/// Fields of the login request.
#[derive(Debug, Clone)]
pub struct LoginRequest<'a> {
    pub user: &'a str,
    pub password_hash: &'a [u8],
    pub client_addr: &'a str,
    pub tz_offset_secs: i32,
    pub tenant: Option<&'a str>,
    pub flags: u32,
}

impl LoginRequest<'_> {
    pub fn encode(&self, order: ByteOrder, charset: Charset) -> BytesMut {
        let mut w = WireWriter::new(order);
        w.put_field(&charset.encode(self.user))
            .put_field(self.password_hash)
            .put_field(self.client_addr.as_bytes())
            .put_i32(self.tz_offset_secs)
            .put_field(&charset.encode(self.tenant.unwrap_or("")))
            .put_u32(self.flags);
        w.finish()
    }
}

/// Final login acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAck {
    /// Raw charset value; see [`Charset::from_wire`].
    pub charset: u32,
    pub session_id: u32,
    pub banner: Bytes,
}

impl LoginAck {
    pub fn decode(payload: Bytes, order: ByteOrder) -> Result<Self> {
        let mut r = WireReader::new(payload, order);
        Ok(Self {
            charset: r.get_u32()?,
            session_id: r.get_u32()?,
            banner: r.get_field()?,
        })
    }
}

pub fn encode_execute(
    order: ByteOrder,
    charset: Charset,
    handle: i32,
    describe: bool,
    fetch_size: u32,
    query: &str,
) -> BytesMut {
    let text = charset.encode(query);
    let mut w = WireWriter::with_capacity(order, 16 + text.len());
    w.put_i32(handle)
        .put_u32(if describe { EXEC_DESCRIBE } else { 0 })
        .put_u32(fetch_size)
        .put_field(&text);
    w.finish()
}

pub fn encode_fetch(order: ByteOrder, handle: i32, fetch_size: u32) -> BytesMut {
    let mut w = WireWriter::new(order);
    w.put_i32(handle).put_u32(fetch_size);
    w.finish()
}

pub fn encode_free_statement(order: ByteOrder, handle: i32) -> BytesMut {
    let mut w = WireWriter::new(order);
    w.put_i32(handle);
    w.finish()
}

/// One row as received: raw column slices (`None` is NULL).
pub type RawRow = Vec<Option<Bytes>>;

/// Decode a row batch: count, then one nullable field per column per row.
pub fn decode_rows(r: &mut WireReader, columns: usize) -> Result<Vec<RawRow>> {
    let count = r.get_u32()? as usize;
    if columns == 0 && count > 0 {
        return Err(Error::malformed(format!(
            "{count} rows received for a result without columns"
        )));
    }
    // Every column costs at least four bytes on the wire.
    if count.saturating_mul(columns).saturating_mul(4) > r.remaining() {
        return Err(Error::malformed(format!(
            "batch of {count} rows x {columns} columns exceeds {} payload bytes",
            r.remaining()
        )));
    }
    let mut rows = Vec::with_capacity(count);
    for _ in 0..count {
        let mut row = Vec::with_capacity(columns);
        for _ in 0..columns {
            row.push(r.get_nullable_field()?);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Reply to an execute request.
#[derive(Debug, Clone)]
pub struct ExecuteReply {
    pub handle: i32,
    pub affected: u64,
    /// Present when the server described the result.
    pub fields: Option<Vec<FieldDescriptor>>,
    /// Present when the reply carries a row batch.
    pub rows: Option<Vec<RawRow>>,
    pub has_remain: bool,
}

impl ExecuteReply {
    /// Decode the reply. `known_columns` is the column count of a cached
    /// shape, used when the server does not describe the result.
    pub fn decode(
        payload: Bytes,
        order: ByteOrder,
        charset: Charset,
        known_columns: Option<usize>,
    ) -> Result<Self> {
        let mut r = WireReader::new(payload, order);
        let handle = r.get_i32()?;
        let flags = r.get_u32()?;
        let affected = r.get_u64()?;
        let fields = if flags & RESULT_DESCRIBED != 0 {
            Some(FieldDescriptor::decode_list(&mut r, charset)?)
        } else {
            None
        };
        let rows = if flags & RESULT_ROWSET != 0 {
            let columns = match (&fields, known_columns) {
                (Some(f), _) => f.len(),
                (None, Some(n)) => n,
                (None, None) => {
                    return Err(Error::malformed(
                        "row batch without field descriptors for an unknown query shape",
                    ));
                }
            };
            Some(decode_rows(&mut r, columns)?)
        } else {
            None
        };
        Ok(Self {
            handle,
            affected,
            fields,
            rows,
            has_remain: flags & RESULT_HAS_REMAIN != 0,
        })
    }
}

/// Reply to a fetch request.
#[derive(Debug, Clone)]
pub struct FetchReply {
    pub rows: Vec<RawRow>,
    pub has_remain: bool,
}

impl FetchReply {
    pub fn decode(payload: Bytes, order: ByteOrder, columns: usize) -> Result<Self> {
        let mut r = WireReader::new(payload, order);
        let flags = r.get_u32()?;
        let rows = decode_rows(&mut r, columns)?;
        Ok(Self {
            rows,
            has_remain: flags & RESULT_HAS_REMAIN != 0,
        })
    }
}
