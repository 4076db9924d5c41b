//! Client core for the qail native database protocol.
//!
//! # Layers
//! - [`protocol`]: pure encoding and decoding of frames and payloads
//! - [`driver`]: async connection, handshake, statements and results
//!
//! # Example
//! ```no_run
//! use qail_native::{ConnectOptions, Connection};
//!
//! # async fn run() -> qail_native::Result<()> {
//! let opts = ConnectOptions::new("db.internal", 4588, "app", "secret");
//! let mut conn = Connection::connect(&opts).await?;
//! let mut stmt = conn.statement();
//! let mut rows = stmt.execute_query("select id, name from users").await?;
//! while rows.next().await? {
//!     println!("{:?} {:?}", rows.get_i64(0)?, rows.get_string(1)?);
//! }
//! drop(rows);
//! stmt.close().await?;
//! drop(stmt);
//! conn.close().await
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod protocol;

pub use config::ConnectOptions;
pub use driver::{
    Connection, HandshakeState, NativeStream, ResultSet, Row, ServerInfo, Statement,
    StatementHandle,
};
pub use error::{Error, ErrorKind, Result, ServerError};
pub use protocol::{ByteOrder, Charset, FieldDescriptor, PasswordHasher, Pbkdf2Sha256, SqlType, Value};
