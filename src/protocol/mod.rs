//! Native wire protocol (Layer 2: Pure, Sync)
//!
//! Byte codec, framing, per-command payloads and column decoding.
//! No async and no I/O: bytes in, values out.

pub mod auth;
pub mod codec;
pub mod frame;
pub mod messages;
pub mod numeric;
pub mod types;
pub mod value;

pub use auth::{PasswordHasher, Pbkdf2Sha256};
pub use codec::{ByteOrder, Charset, WireReader, WireWriter};
pub use frame::{Command, MessageHeader, ResponseAssembler};
pub use numeric::{decode_numeric, PackedDecimal};
pub use types::{type_id, FieldDescriptor, SqlType};
pub use value::Value;
