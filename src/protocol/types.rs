//! Server type identifiers and field descriptors.

use bytes::Bytes;

use super::codec::{Charset, WireReader};
use crate::error::Result;

/// Server type identifiers
#[allow(dead_code)]
pub mod type_id {
    // Boolean
    pub const BOOLEAN: u32 = 1;

    // Integers
    pub const TINYINT: u32 = 2;
    pub const SMALLINT: u32 = 3;
    pub const INTEGER: u32 = 4;
    pub const BIGINT: u32 = 5;
    pub const UINT: u32 = 6;

    // Float
    pub const REAL: u32 = 7;
    pub const DOUBLE: u32 = 8;

    // Packed decimal
    pub const NUMBER: u32 = 9;

    // Date/Time
    pub const DATE: u32 = 10;
    pub const TIME: u32 = 11;
    pub const TIMESTAMP: u32 = 12;

    // Characters
    pub const CHAR: u32 = 13;
    pub const VARCHAR: u32 = 14;
    pub const CLOB: u32 = 15;

    // Bytes
    pub const BINARY: u32 = 16;
    pub const VARBINARY: u32 = 17;
    pub const BLOB: u32 = 18;
}

/// Logical SQL type a server type maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    UInt,
    Real,
    Double,
    Numeric,
    Date,
    Time,
    Timestamp,
    Char,
    VarChar,
    Clob,
    Binary,
    VarBinary,
    Blob,
    /// Unknown server type; decoded as raw bytes.
    Other(u32),
}

impl SqlType {
    pub fn from_type_id(id: u32) -> Self {
        match id {
            type_id::BOOLEAN => SqlType::Boolean,
            type_id::TINYINT => SqlType::TinyInt,
            type_id::SMALLINT => SqlType::SmallInt,
            type_id::INTEGER => SqlType::Integer,
            type_id::BIGINT => SqlType::BigInt,
            type_id::UINT => SqlType::UInt,
            type_id::REAL => SqlType::Real,
            type_id::DOUBLE => SqlType::Double,
            type_id::NUMBER => SqlType::Numeric,
            type_id::DATE => SqlType::Date,
            type_id::TIME => SqlType::Time,
            type_id::TIMESTAMP => SqlType::Timestamp,
            type_id::CHAR => SqlType::Char,
            type_id::VARCHAR => SqlType::VarChar,
            type_id::CLOB => SqlType::Clob,
            type_id::BINARY => SqlType::Binary,
            type_id::VARBINARY => SqlType::VarBinary,
            type_id::BLOB => SqlType::Blob,
            other => SqlType::Other(other),
        }
    }

    /// Human-readable SQL name.
    pub fn name(self) -> &'static str {
        match self {
            SqlType::Boolean => "boolean",
            SqlType::TinyInt => "tinyint",
            SqlType::SmallInt => "smallint",
            SqlType::Integer => "integer",
            SqlType::BigInt => "bigint",
            SqlType::UInt => "uint",
            SqlType::Real => "real",
            SqlType::Double => "double",
            SqlType::Numeric => "number",
            SqlType::Date => "date",
            SqlType::Time => "time",
            SqlType::Timestamp => "timestamp",
            SqlType::Char => "char",
            SqlType::VarChar => "varchar",
            SqlType::Clob => "clob",
            SqlType::Binary => "binary",
            SqlType::VarBinary => "varbinary",
            SqlType::Blob => "blob",
            SqlType::Other(_) => "unknown",
        }
    }

    /// Rust type a column of this SQL type decodes into.
    pub fn host_type(self) -> &'static str {
        match self {
            SqlType::Boolean => "bool",
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt => "i64",
            SqlType::UInt => "u64",
            SqlType::Real | SqlType::Double => "f64",
            SqlType::Numeric => "String",
            SqlType::Date => "chrono::NaiveDate",
            SqlType::Time => "chrono::NaiveTime",
            SqlType::Timestamp => "chrono::NaiveDateTime",
            SqlType::Char | SqlType::VarChar | SqlType::Clob => "String",
            SqlType::Binary | SqlType::VarBinary | SqlType::Blob | SqlType::Other(_) => {
                "bytes::Bytes"
            }
        }
    }

    pub fn is_text(self) -> bool {
        matches!(self, SqlType::Char | SqlType::VarChar | SqlType::Clob)
    }

    pub fn is_binary(self) -> bool {
        matches!(
            self,
            SqlType::Binary | SqlType::VarBinary | SqlType::Blob | SqlType::Other(_)
        )
    }
}

/// Column metadata, decoded once per query shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub server_type: u32,
    pub sql_type: SqlType,
    /// Declared length in bytes.
    pub length: u32,
    pub precision: i32,
    pub scale: i32,
    pub nullable: bool,
}

impl FieldDescriptor {
    pub fn host_type(&self) -> &'static str {
        self.sql_type.host_type()
    }

    /// Decode a column list: count, then name/type/length/precision/scale/nullable per column.
    pub fn decode_list(r: &mut WireReader, charset: Charset) -> Result<Vec<Self>> {
        let count = r.get_u32()? as usize;
        let mut fields = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let name: Bytes = r.get_field()?;
            let server_type = r.get_u32()?;
            let length = r.get_u32()?;
            let precision = r.get_i32()?;
            let scale = r.get_i32()?;
            let nullable = r.get_u32()? != 0;
            fields.push(FieldDescriptor {
                name: charset.decode(&name).into_owned(),
                server_type,
                sql_type: SqlType::from_type_id(server_type),
                length,
                precision,
                scale,
                nullable,
            });
        }
        Ok(fields)
    }
}
