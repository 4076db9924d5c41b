//! Native driver (Layer 3: Async I/O)
//!
//! Connection, handshake, statements and result streaming over any tokio
//! stream.

mod connection;
mod cursor;
mod handshake;
mod result_set;
mod statement;
mod transport;

pub use connection::{Connection, NativeStream, ServerInfo};
pub use cursor::Row;
pub use handshake::HandshakeState;
pub use result_set::ResultSet;
pub use statement::{Statement, StatementHandle};
