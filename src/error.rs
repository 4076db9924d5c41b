//! Error type for native-protocol driver operations.
//!
//! Every failure carries an [`ErrorKind`] so callers can branch on the
//! category without matching on message text.

use std::fmt;

use thiserror::Error;

/// Failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Socket I/O failure or a connection that is no longer usable.
    Transport,
    /// Preamble, endianness, version or charset negotiation failure.
    Handshake,
    /// Client-key echo mismatch or signing-key verification failure.
    Auth,
    /// Non-zero result code reported by the server.
    Server,
    /// Malformed frame, bad statement handle or cursor misuse.
    Protocol,
    /// Local connection options could not be loaded or are invalid.
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Handshake => "handshake",
            ErrorKind::Auth => "auth",
            ErrorKind::Server => "server",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Config => "config",
        };
        f.write_str(name)
    }
}

/// Error reported by the server in a frame with a non-zero result code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Server error code.
    pub code: i32,
    /// Line of the offending statement text (0 when not applicable).
    pub line: i32,
    /// Column of the offending statement text (0 when not applicable).
    pub column: i32,
    /// Message decoded with the session charset.
    pub message: String,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(
                f,
                "[{}] {} (line {}, column {})",
                self.code, self.message, self.line, self.column
            )
        } else {
            write!(f, "[{}] {}", self.code, self.message)
        }
    }
}

/// Error type for driver operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by server")]
    ConnectionClosed,

    #[error("connection is broken after an interrupted exchange")]
    Broken,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("unsupported server charset {0} (configuration error)")]
    UnsupportedCharset(u32),

    #[error("protocol violation: scramble does not echo the client key at byte {offset}")]
    ClientKeyMismatch { offset: usize },

    #[error("server signing key verification failed")]
    SigningKeyRejected,

    #[error("server error {0}")]
    Server(ServerError),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("invalid statement handle {0}")]
    InvalidHandle(i32),

    #[error("row {0} is no longer available (released by forward scan)")]
    RowReleased(usize),

    #[error("cursor is not positioned on a row")]
    NoCurrentRow,

    #[error("column index {index} out of range ({count} columns)")]
    ColumnOutOfRange { index: usize, count: usize },

    #[error("cannot decode {column} as {target}: {reason}")]
    Decode {
        column: String,
        target: &'static str,
        reason: String,
    },

    #[error("result set aborted by an earlier fetch failure")]
    ResultAborted,

    #[error("statement is closed")]
    StatementClosed,

    #[error("invalid options: {0}")]
    Config(String),

    #[error("connection attempt failed: {0}")]
    ConnectFailed(#[source] Box<Error>),
}

impl Error {
    /// Category of this error. A wrapped connect failure reports the
    /// category of its cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::ConnectionClosed | Error::Broken => ErrorKind::Transport,
            Error::Handshake(_) | Error::UnsupportedCharset(_) => ErrorKind::Handshake,
            Error::ClientKeyMismatch { .. } | Error::SigningKeyRejected => ErrorKind::Auth,
            Error::Server(_) => ErrorKind::Server,
            Error::Malformed(_)
            | Error::InvalidHandle(_)
            | Error::RowReleased(_)
            | Error::NoCurrentRow
            | Error::ColumnOutOfRange { .. }
            | Error::Decode { .. }
            | Error::ResultAborted
            | Error::StatementClosed => ErrorKind::Protocol,
            Error::Config(_) => ErrorKind::Config,
            Error::ConnectFailed(inner) => inner.kind(),
        }
    }

    /// True for the wrapped error returned by a failed connect.
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, Error::ConnectFailed(_))
    }

    /// The innermost error, looking through connect-failure wrapping.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::ConnectFailed(inner) => inner.root_cause(),
            other => other,
        }
    }

    /// Server-reported details, if this is (or wraps) a server error.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self.root_cause() {
            Error::Server(err) => Some(err),
            _ => None,
        }
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::Malformed(msg.into())
    }

    pub(crate) fn connect_failed(cause: Error) -> Self {
        match cause {
            already @ Error::ConnectFailed(_) => already,
            other => Error::ConnectFailed(Box::new(other)),
        }
    }

    /// Whether the stream may be out of sync after this error.
    pub(crate) fn desyncs_stream(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transport | ErrorKind::Protocol
        ) && !matches!(self, Error::Broken)
    }
}

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_kind_per_category() {
        let io = Error::Io(std::io::Error::other("reset"));
        assert_eq!(io.kind(), ErrorKind::Transport);
        assert_eq!(Error::UnsupportedCharset(2).kind(), ErrorKind::Handshake);
        assert_eq!(
            Error::ClientKeyMismatch { offset: 3 }.kind(),
            ErrorKind::Auth
        );
        assert_eq!(Error::SigningKeyRejected.kind(), ErrorKind::Auth);
        assert_eq!(Error::malformed("short").kind(), ErrorKind::Protocol);
        assert_eq!(Error::RowReleased(0).kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_connect_failed_reports_inner_kind() {
        let err = Error::connect_failed(Error::SigningKeyRejected);
        assert!(err.is_connect_failure());
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(matches!(err.root_cause(), Error::SigningKeyRejected));
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("connection attempt failed"));
    }

    #[test]
    fn test_connect_failed_not_double_wrapped() {
        let err = Error::connect_failed(Error::connect_failed(Error::ConnectionClosed));
        match err {
            Error::ConnectFailed(inner) => assert!(matches!(*inner, Error::ConnectionClosed)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_server_error_display() {
        let err = Error::Server(ServerError {
            code: 1205,
            line: 1,
            column: 8,
            message: "table not found".to_string(),
        });
        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(
            err.to_string(),
            "server error [1205] table not found (line 1, column 8)"
        );
        assert_eq!(err.server_error().map(|e| e.code), Some(1205));
    }
}
