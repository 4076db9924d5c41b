//! Byte codec: endianness-aware integers, padded variable fields, charsets.
//!
//! Every variable-length field on the wire is a 4-byte length, the raw
//! bytes, then zero padding up to the next multiple of 4. A length of
//! `0xFFFFFFFF` marks a NULL field and carries neither bytes nor padding.

use std::borrow::Cow;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Length value marking a NULL field.
pub const NULL_LENGTH: u32 = u32::MAX;

/// Zero bytes needed after a field of `len` bytes to reach 4-byte alignment.
#[inline]
pub fn padding(len: usize) -> usize {
    if len % 4 == 0 { 0 } else { 4 - (len % 4) }
}

/// Encoded size of a non-NULL field of `len` bytes.
#[inline]
pub fn field_size(len: usize) -> usize {
    4 + len + padding(len)
}

/// Byte order announced by the server in the connection preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    Little,
    #[default]
    Big,
}

impl ByteOrder {
    /// Decode the preamble endianness flag (`0` little, `1` big).
    pub fn from_flag(flag: u8) -> Result<Self> {
        match flag {
            0 => Ok(ByteOrder::Little),
            1 => Ok(ByteOrder::Big),
            other => Err(Error::Handshake(format!("unknown endianness flag {other}"))),
        }
    }

    pub fn flag(self) -> u8 {
        match self {
            ByteOrder::Little => 0,
            ByteOrder::Big => 1,
        }
    }

    pub fn u16_from(self, b: [u8; 2]) -> u16 {
        match self {
            ByteOrder::Little => u16::from_le_bytes(b),
            ByteOrder::Big => u16::from_be_bytes(b),
        }
    }

    pub fn u32_from(self, b: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Little => u32::from_le_bytes(b),
            ByteOrder::Big => u32::from_be_bytes(b),
        }
    }

    pub fn u64_from(self, b: [u8; 8]) -> u64 {
        match self {
            ByteOrder::Little => u64::from_le_bytes(b),
            ByteOrder::Big => u64::from_be_bytes(b),
        }
    }
}

/// Session character set selected by the server at login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8,
    Gbk,
}

impl Charset {
    /// Map the login-ack charset value. Only `0` and `1` are legal.
    pub fn from_wire(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Charset::Utf8),
            1 => Ok(Charset::Gbk),
            other => Err(Error::UnsupportedCharset(other)),
        }
    }

    pub fn name(self) -> &'static str {
        self.encoding().name()
    }

    fn encoding(self) -> &'static encoding_rs::Encoding {
        match self {
            Charset::Utf8 => encoding_rs::UTF_8,
            Charset::Gbk => encoding_rs::GBK,
        }
    }

    /// Encode text for the wire. Unmappable characters become numeric
    /// character references, as `encoding_rs` does for legacy encodings.
    pub fn encode<'a>(self, text: &'a str) -> Cow<'a, [u8]> {
        match self {
            Charset::Utf8 => Cow::Borrowed(text.as_bytes()),
            Charset::Gbk => self.encoding().encode(text).0,
        }
    }

    /// Decode wire bytes, replacing malformed sequences.
    pub fn decode<'a>(self, bytes: &'a [u8]) -> Cow<'a, str> {
        self.encoding().decode_without_bom_handling(bytes).0
    }
}

/// Builds a payload in the negotiated byte order.
#[derive(Debug)]
pub struct WireWriter {
    buf: BytesMut,
    order: ByteOrder,
}

impl WireWriter {
    pub fn new(order: ByteOrder) -> Self {
        Self::with_capacity(order, 64)
    }

    pub fn with_capacity(order: ByteOrder, capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            order,
        }
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        match self.order {
            ByteOrder::Little => self.buf.put_u16_le(v),
            ByteOrder::Big => self.buf.put_u16(v),
        }
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        match self.order {
            ByteOrder::Little => self.buf.put_u32_le(v),
            ByteOrder::Big => self.buf.put_u32(v),
        }
        self
    }

    pub fn put_i32(&mut self, v: i32) -> &mut Self {
        self.put_u32(v as u32)
    }

    pub fn put_u64(&mut self, v: u64) -> &mut Self {
        match self.order {
            ByteOrder::Little => self.buf.put_u64_le(v),
            ByteOrder::Big => self.buf.put_u64(v),
        }
        self
    }

    pub fn put_i64(&mut self, v: i64) -> &mut Self {
        self.put_u64(v as u64)
    }

    pub fn put_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Write a length-prefixed, 4-byte aligned field.
    pub fn put_field(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.reserve(field_size(bytes.len()));
        self.put_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
        self.buf.put_bytes(0, padding(bytes.len()));
        self
    }

    /// Write a field that may be NULL.
    pub fn put_nullable_field(&mut self, bytes: Option<&[u8]>) -> &mut Self {
        match bytes {
            Some(b) => self.put_field(b),
            None => self.put_u32(NULL_LENGTH),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> BytesMut {
        self.buf
    }
}

/// Reads a received payload in the negotiated byte order.
///
/// Variable fields are returned as zero-copy slices of the payload.
#[derive(Debug, Clone)]
pub struct WireReader {
    buf: Bytes,
    order: ByteOrder,
}

impl WireReader {
    pub fn new(buf: Bytes, order: ByteOrder) -> Self {
        Self { buf, order }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(Error::malformed(format!(
                "{what}: need {n} bytes, {} left",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        self.need(1, "u8")?;
        Ok(self.buf.get_u8())
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        self.need(2, "u16")?;
        Ok(match self.order {
            ByteOrder::Little => self.buf.get_u16_le(),
            ByteOrder::Big => self.buf.get_u16(),
        })
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        self.need(4, "u32")?;
        Ok(match self.order {
            ByteOrder::Little => self.buf.get_u32_le(),
            ByteOrder::Big => self.buf.get_u32(),
        })
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        Ok(self.get_u32()? as i32)
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.need(8, "u64")?;
        Ok(match self.order {
            ByteOrder::Little => self.buf.get_u64_le(),
            ByteOrder::Big => self.buf.get_u64(),
        })
    }

    pub fn get_raw(&mut self, n: usize) -> Result<Bytes> {
        self.need(n, "raw bytes")?;
        Ok(self.buf.split_to(n))
    }

    /// Read a padded field that must not be NULL.
    pub fn get_field(&mut self) -> Result<Bytes> {
        self.get_nullable_field()?
            .ok_or_else(|| Error::malformed("unexpected NULL field"))
    }

    /// Read a padded field; `None` for the NULL marker.
    pub fn get_nullable_field(&mut self) -> Result<Option<Bytes>> {
        let len = self.get_u32()?;
        if len == NULL_LENGTH {
            return Ok(None);
        }
        let len = len as usize;
        let pad = padding(len);
        self.need(len + pad, "field body")?;
        let data = self.buf.split_to(len);
        self.buf.advance(pad);
        Ok(Some(data))
    }

    /// Read a NUL-terminated string body (terminator consumed, not returned).
    /// A missing terminator takes the rest of the payload.
    pub fn get_cstring(&mut self) -> Bytes {
        match self.buf.iter().position(|&b| b == 0) {
            Some(end) => {
                let s = self.buf.split_to(end);
                self.buf.advance(1);
                s
            }
            None => self.buf.split_to(self.buf.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_padding_rule() {
        assert_eq!(padding(0), 0);
        assert_eq!(padding(1), 3);
        assert_eq!(padding(2), 2);
        assert_eq!(padding(3), 1);
        assert_eq!(padding(4), 0);
        assert_eq!(padding(5), 3);
    }

    #[test]
    fn test_field_layout_big_endian() {
        let mut w = WireWriter::new(ByteOrder::Big);
        w.put_field(b"abcde");
        let bytes = w.finish();
        assert_eq!(
            bytes.as_ref(),
            &[0, 0, 0, 5, b'a', b'b', b'c', b'd', b'e', 0, 0, 0]
        );
    }

    #[test]
    fn test_field_layout_little_endian() {
        let mut w = WireWriter::new(ByteOrder::Little);
        w.put_field(b"ab");
        assert_eq!(w.finish().as_ref(), &[2, 0, 0, 0, b'a', b'b', 0, 0]);
    }

    #[test]
    fn test_fields_after_padding_stay_in_sync() {
        let mut w = WireWriter::new(ByteOrder::Little);
        w.put_field(b"x").put_u32(0xDEADBEEF).put_field(b"").put_field(b"yz");
        let mut r = WireReader::new(w.finish().freeze(), ByteOrder::Little);
        assert_eq!(r.get_field().unwrap().as_ref(), b"x");
        assert_eq!(r.get_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(r.get_field().unwrap().as_ref(), b"");
        assert_eq!(r.get_field().unwrap().as_ref(), b"yz");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_null_field() {
        let mut w = WireWriter::new(ByteOrder::Big);
        w.put_nullable_field(None).put_nullable_field(Some(b"q"));
        let bytes = w.finish();
        assert_eq!(&bytes[..4], &[0xFF, 0xFF, 0xFF, 0xFF]);
        let mut r = WireReader::new(bytes.freeze(), ByteOrder::Big);
        assert_eq!(r.get_nullable_field().unwrap(), None);
        assert_eq!(r.get_nullable_field().unwrap().as_deref(), Some(&b"q"[..]));
        assert!(r.get_field().is_err());
    }

    #[test]
    fn test_truncated_field_is_malformed() {
        let mut w = WireWriter::new(ByteOrder::Big);
        w.put_u32(10).put_raw(b"short");
        let mut r = WireReader::new(w.finish().freeze(), ByteOrder::Big);
        let err = r.get_field().unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn test_truncated_padding_is_malformed() {
        let mut w = WireWriter::new(ByteOrder::Big);
        w.put_u32(3).put_raw(b"abc");
        let mut r = WireReader::new(w.finish().freeze(), ByteOrder::Big);
        assert!(r.get_field().is_err());
    }

    #[test]
    fn test_cstring() {
        let mut r = WireReader::new(Bytes::from_static(b"oops\0tail"), ByteOrder::Big);
        assert_eq!(r.get_cstring().as_ref(), b"oops");
        assert_eq!(r.get_cstring().as_ref(), b"tail");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_integers_follow_byte_order() {
        let mut w = WireWriter::new(ByteOrder::Little);
        w.put_u16(0x0102).put_i32(-2).put_u64(7);
        let bytes = w.finish();
        assert_eq!(&bytes[..2], &[0x02, 0x01]);
        let mut r = WireReader::new(bytes.freeze(), ByteOrder::Little);
        assert_eq!(r.get_u16().unwrap(), 0x0102);
        assert_eq!(r.get_i32().unwrap(), -2);
        assert_eq!(r.get_u64().unwrap(), 7);
    }

    #[test]
    fn test_charset_from_wire() {
        assert_eq!(Charset::from_wire(0).unwrap(), Charset::Utf8);
        assert_eq!(Charset::from_wire(1).unwrap(), Charset::Gbk);
        assert!(matches!(
            Charset::from_wire(2),
            Err(Error::UnsupportedCharset(2))
        ));
    }

    #[test]
    fn test_gbk_text() {
        let encoded = Charset::Gbk.encode("中文");
        assert_eq!(encoded.as_ref(), &[0xD6, 0xD0, 0xCE, 0xC4]);
        assert_eq!(Charset::Gbk.decode(&encoded), "中文");
        assert_eq!(Charset::Utf8.decode("中文".as_bytes()), "中文");
    }

    proptest! {
        #[test]
        fn prop_field_round_trip(len in 0usize..=1000, order in prop_oneof![Just(ByteOrder::Big), Just(ByteOrder::Little)]) {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8 + 1).collect();
            let mut w = WireWriter::new(order);
            w.put_field(&data);
            let encoded = w.finish();
            prop_assert_eq!(encoded.len() % 4, 0);
            prop_assert_eq!(encoded.len(), field_size(len));
            let mut r = WireReader::new(encoded.freeze(), order);
            let decoded = r.get_field().unwrap();
            prop_assert_eq!(decoded.as_ref(), &data[..]);
            prop_assert_eq!(r.remaining(), 0);
        }
    }
}
