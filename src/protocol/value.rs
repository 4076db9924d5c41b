//! Typed column decoding.
//!
//! Fixed-width values use the negotiated byte order. Temporal values are
//! day/microsecond counts (see [`crate::protocol::types`]).

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime};

use super::codec::{ByteOrder, Charset};
use super::numeric::decode_numeric;
use super::types::SqlType;

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Packed decimal in display form.
    Numeric(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Text(String),
    Bytes(Bytes),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Numeric(v) => f.write_str(v),
            Value::Date(v) => write!(f, "{}", v),
            Value::Time(v) => write!(f, "{}", v),
            Value::Timestamp(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
            Value::Bytes(v) => {
                f.write_str("0x")?;
                for b in v.iter() {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// Why a column could not be decoded. Callers attach the column name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    pub target: &'static str,
    pub reason: String,
}

impl DecodeFailure {
    fn new(target: &'static str, reason: impl Into<String>) -> Self {
        Self {
            target,
            reason: reason.into(),
        }
    }

    fn width(target: &'static str, len: usize) -> Self {
        Self::new(target, format!("unexpected width {len}"))
    }
}

type DecodeResult<T> = std::result::Result<T, DecodeFailure>;

/// Signed integer of width 1, 2, 4 or 8.
pub fn decode_i64(bytes: &[u8], order: ByteOrder) -> DecodeResult<i64> {
    Ok(match bytes.len() {
        1 => bytes[0] as i8 as i64,
        2 => order.u16_from([bytes[0], bytes[1]]) as i16 as i64,
        4 => order.u32_from(fixed::<4>(bytes)) as i32 as i64,
        8 => order.u64_from(fixed::<8>(bytes)) as i64,
        n => return Err(DecodeFailure::width("i64", n)),
    })
}

/// Unsigned integer of width 1, 2, 4 or 8.
pub fn decode_u64(bytes: &[u8], order: ByteOrder) -> DecodeResult<u64> {
    Ok(match bytes.len() {
        1 => bytes[0] as u64,
        2 => order.u16_from([bytes[0], bytes[1]]) as u64,
        4 => order.u32_from(fixed::<4>(bytes)) as u64,
        8 => order.u64_from(fixed::<8>(bytes)),
        n => return Err(DecodeFailure::width("u64", n)),
    })
}

/// IEEE-754 float of width 4 or 8.
pub fn decode_f64(bytes: &[u8], order: ByteOrder) -> DecodeResult<f64> {
    Ok(match bytes.len() {
        4 => f32::from_bits(order.u32_from(fixed::<4>(bytes))) as f64,
        8 => f64::from_bits(order.u64_from(fixed::<8>(bytes))),
        n => return Err(DecodeFailure::width("f64", n)),
    })
}

pub fn decode_bool(bytes: &[u8]) -> DecodeResult<bool> {
    match bytes {
        [b] => Ok(*b != 0),
        _ => Err(DecodeFailure::width("bool", bytes.len())),
    }
}

/// Days since 1970-01-01.
pub fn decode_date(bytes: &[u8], order: ByteOrder) -> DecodeResult<NaiveDate> {
    if bytes.len() != 4 {
        return Err(DecodeFailure::width("date", bytes.len()));
    }
    let days = order.u32_from(fixed::<4>(bytes)) as i32;
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|epoch| epoch.checked_add_signed(Duration::days(days as i64)))
        .ok_or_else(|| DecodeFailure::new("date", format!("day {days} out of range")))
}

/// Microseconds since midnight.
pub fn decode_time(bytes: &[u8], order: ByteOrder) -> DecodeResult<NaiveTime> {
    if bytes.len() != 8 {
        return Err(DecodeFailure::width("time", bytes.len()));
    }
    let micros = order.u64_from(fixed::<8>(bytes)) as i64;
    if !(0..86_400_000_000).contains(&micros) {
        return Err(DecodeFailure::new(
            "time",
            format!("{micros} microseconds past midnight"),
        ));
    }
    let secs = (micros / 1_000_000) as u32;
    let nanos = ((micros % 1_000_000) * 1_000) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
        .ok_or_else(|| DecodeFailure::new("time", "invalid time of day"))
}

/// Microseconds since the Unix epoch.
pub fn decode_timestamp(bytes: &[u8], order: ByteOrder) -> DecodeResult<NaiveDateTime> {
    if bytes.len() != 8 {
        return Err(DecodeFailure::width("timestamp", bytes.len()));
    }
    let micros = order.u64_from(fixed::<8>(bytes)) as i64;
    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| DecodeFailure::new("timestamp", format!("{micros} out of range")))
}

pub fn decode_numeric_text(bytes: &[u8]) -> DecodeResult<String> {
    decode_numeric(bytes).map_err(|e| DecodeFailure::new("number", e.to_string()))
}

/// Decode a column according to its logical type. `None` is SQL NULL.
pub fn decode_value(
    bytes: Option<&Bytes>,
    sql_type: SqlType,
    order: ByteOrder,
    charset: Charset,
) -> DecodeResult<Value> {
    let Some(bytes) = bytes else {
        return Ok(Value::Null);
    };
    Ok(match sql_type {
        SqlType::Boolean => Value::Bool(decode_bool(bytes)?),
        SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt => {
            Value::Int(decode_i64(bytes, order)?)
        }
        SqlType::UInt => Value::UInt(decode_u64(bytes, order)?),
        SqlType::Real | SqlType::Double => Value::Float(decode_f64(bytes, order)?),
        SqlType::Numeric => Value::Numeric(decode_numeric_text(bytes)?),
        SqlType::Date => Value::Date(decode_date(bytes, order)?),
        SqlType::Time => Value::Time(decode_time(bytes, order)?),
        SqlType::Timestamp => Value::Timestamp(decode_timestamp(bytes, order)?),
        SqlType::Char | SqlType::VarChar | SqlType::Clob => {
            Value::Text(charset.decode(bytes).into_owned())
        }
        SqlType::Binary | SqlType::VarBinary | SqlType::Blob | SqlType::Other(_) => {
            Value::Bytes(bytes.clone())
        }
    })
}

/// Copy a slice whose length the caller already checked.
fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_by_byte_order() {
        assert_eq!(decode_i64(&[0xFF, 0xFF, 0xFF, 0xFE], ByteOrder::Big).unwrap(), -2);
        assert_eq!(decode_i64(&[0xFE, 0xFF, 0xFF, 0xFF], ByteOrder::Little).unwrap(), -2);
        assert_eq!(
            decode_i64(&300i64.to_le_bytes(), ByteOrder::Little).unwrap(),
            300
        );
        assert_eq!(decode_i64(&[0x80], ByteOrder::Big).unwrap(), -128);
        assert_eq!(
            decode_u64(&[0xFF, 0xFF, 0xFF, 0xFF], ByteOrder::Big).unwrap(),
            u32::MAX as u64
        );
        assert!(decode_i64(&[1, 2, 3], ByteOrder::Big).is_err());
    }

    #[test]
    fn test_double_bit_pattern() {
        let bits = 1.5f64.to_bits();
        assert_eq!(decode_f64(&bits.to_be_bytes(), ByteOrder::Big).unwrap(), 1.5);
        assert_eq!(decode_f64(&bits.to_le_bytes(), ByteOrder::Little).unwrap(), 1.5);
        let bits = 0.25f32.to_bits();
        assert_eq!(decode_f64(&bits.to_be_bytes(), ByteOrder::Big).unwrap(), 0.25);
    }

    #[test]
    fn test_temporal() {
        let date = decode_date(&19_000i32.to_be_bytes(), ByteOrder::Big).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2022, 1, 8).unwrap());

        let micros: i64 = (13 * 3600 + 5 * 60 + 9) * 1_000_000 + 250;
        let time = decode_time(&micros.to_le_bytes(), ByteOrder::Little).unwrap();
        assert_eq!(time, NaiveTime::from_hms_micro_opt(13, 5, 9, 250).unwrap());
        assert!(decode_time(&(-1i64).to_be_bytes(), ByteOrder::Big).is_err());

        let ts = decode_timestamp(&1_700_000_000_000_000i64.to_be_bytes(), ByteOrder::Big)
            .unwrap();
        assert_eq!(ts.to_string(), "2023-11-14 22:13:20");
    }

    #[test]
    fn test_decode_value_dispatch() {
        let order = ByteOrder::Big;
        assert_eq!(
            decode_value(None, SqlType::Integer, order, Charset::Utf8).unwrap(),
            Value::Null
        );
        let text = Bytes::from_static(&[0xD6, 0xD0]);
        assert_eq!(
            decode_value(Some(&text), SqlType::VarChar, order, Charset::Gbk).unwrap(),
            Value::Text("中".to_string())
        );
        let blob = Bytes::from_static(&[0xD6, 0xD0]);
        assert_eq!(
            decode_value(Some(&blob), SqlType::Blob, order, Charset::Gbk).unwrap(),
            Value::Bytes(blob.clone())
        );
        let num = Bytes::from_static(&[0x02, 0x00, 0x07, 0x2B]);
        assert_eq!(
            decode_value(Some(&num), SqlType::Numeric, order, Charset::Utf8).unwrap(),
            Value::Numeric("1835".to_string())
        );
        let bad = Bytes::from_static(&[1, 2, 3]);
        let err = decode_value(Some(&bad), SqlType::Double, order, Charset::Utf8).unwrap_err();
        assert_eq!(err.target, "f64");
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Bytes(Bytes::from_static(&[0x0A, 0xFF])).to_string(), "0x0aff");
        assert_eq!(Value::Numeric("-18.3545".into()).to_string(), "-18.3545");
    }
}
