//! Native-protocol connection.
//!
//! Owns the stream and every piece of per-session state: negotiated byte
//! order and charset, server limits, authentication material and the
//! request sequence counter. Nothing here is shared between connections.
//!
//! One request is outstanding at a time: [`Connection::request`] writes a
//! request (split into frames when it exceeds the server capacity), then
//! reads frames until the response for that sequence number is complete.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use super::handshake::HandshakeState;
use super::statement::{Statement, StatementHandle};
use super::transport::Transport;
use crate::config::ConnectOptions;
use crate::error::{Error, Result};
use crate::protocol::auth::{PasswordHasher, Pbkdf2Sha256, CLIENT_KEY_LEN};
use crate::protocol::codec::{ByteOrder, Charset};
use crate::protocol::frame::{self, Assembly, Command, MessageHeader, Response, ResponseAssembler};
use crate::protocol::messages::{self, ExecuteReply, FetchReply};
use crate::protocol::types::FieldDescriptor;

/// Query shapes remembered per connection before the cache is reset.
const MAX_CACHED_SHAPES: usize = 256;

/// Streams a connection can run over.
pub trait NativeStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> NativeStream for T {}

/// What the server told us while connecting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    /// Version byte from the preamble reply.
    pub preamble_version: u8,
    /// Protocol version from the handshake acknowledgement.
    pub protocol_version: u32,
    /// Largest frame the server accepts; 0 for unlimited.
    pub capacity: u32,
    pub session_id: u32,
    pub banner: String,
}

/// Authentication material for this session.
#[derive(Default)]
pub(crate) struct SessionKeys {
    pub client_key: [u8; CLIENT_KEY_LEN],
    pub scramble: Bytes,
    pub iterations: u32,
}

/// A native-protocol connection.
pub struct Connection<S = TcpStream> {
    pub(crate) transport: Transport<S>,
    pub(crate) hasher: Arc<dyn PasswordHasher>,
    pub(crate) state: HandshakeState,
    pub(crate) byte_order: ByteOrder,
    pub(crate) charset: Charset,
    pub(crate) server: ServerInfo,
    pub(crate) keys: SessionKeys,
    pub(crate) fetch_size: u32,
    seq: u32,
    broken: bool,
    shapes: HashMap<String, Arc<[FieldDescriptor]>>,
}

impl Connection<TcpStream> {
    /// Connect over TCP and run the full handshake.
    ///
    /// Any failure after the options are validated is returned as
    /// [`Error::ConnectFailed`] carrying the cause; no half-open
    /// connection is ever returned.
    pub async fn connect(options: &ConnectOptions) -> Result<Self> {
        Self::connect_with_hasher(options, Arc::new(Pbkdf2Sha256)).await
    }

    pub async fn connect_with_hasher(
        options: &ConnectOptions,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Result<Self> {
        options.validate()?;
        let limit = Duration::from_secs(options.connect_timeout_secs.max(1));
        let attempt = async {
            let stream = TcpStream::connect(options.address())
                .await
                .map_err(|e| Error::connect_failed(e.into()))?;
            stream
                .set_nodelay(true)
                .map_err(|e| Error::connect_failed(e.into()))?;
            let client_addr = match &options.client_addr {
                Some(addr) => addr.clone(),
                None => stream
                    .local_addr()
                    .map(|a| a.ip().to_string())
                    .unwrap_or_else(|_| "0.0.0.0".to_string()),
            };
            Self::establish(stream, options, hasher, &client_addr).await
        };
        match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => Err(Error::connect_failed(Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {} timed out after {:?}", options.address(), limit),
            )))),
        }
    }
}

impl<S: NativeStream> Connection<S> {
    fn new(stream: S, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self {
            transport: Transport::new(stream),
            hasher,
            state: HandshakeState::Idle,
            byte_order: ByteOrder::default(),
            charset: Charset::default(),
            server: ServerInfo::default(),
            keys: SessionKeys::default(),
            fetch_size: 100,
            seq: 0,
            broken: false,
            shapes: HashMap::new(),
        }
    }

    /// Run the handshake over an already-open stream.
    pub async fn connect_stream(stream: S, options: &ConnectOptions) -> Result<Self> {
        Self::connect_stream_with_hasher(stream, options, Arc::new(Pbkdf2Sha256)).await
    }

    pub async fn connect_stream_with_hasher(
        stream: S,
        options: &ConnectOptions,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Result<Self> {
        options.validate()?;
        let client_addr = options
            .client_addr
            .clone()
            .unwrap_or_else(|| "0.0.0.0".to_string());
        Self::establish(stream, options, hasher, &client_addr).await
    }

    async fn establish(
        stream: S,
        options: &ConnectOptions,
        hasher: Arc<dyn PasswordHasher>,
        client_addr: &str,
    ) -> Result<Self> {
        let mut conn = Self::new(stream, hasher);
        conn.fetch_size = options.fetch_size;
        match conn.handshake(options, client_addr).await {
            Ok(()) => Ok(conn),
            Err(cause) => {
                conn.state = HandshakeState::Failed;
                warn!(state = ?HandshakeState::Failed, error = %cause, "connection attempt failed");
                if let Err(e) = conn.transport.shutdown().await {
                    debug!(error = %e, "shutdown after failed handshake");
                }
                Err(Error::connect_failed(cause))
            }
        }
    }

    /// Byte order negotiated in the preamble.
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Charset selected by the server at login.
    pub fn charset(&self) -> Charset {
        self.charset
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// True once an interrupted exchange has left the stream unusable.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// The underlying stream.
    pub fn get_ref(&self) -> &S {
        self.transport.get_ref()
    }

    /// Send one request and return the payload of its response.
    ///
    /// A server-reported error comes back as [`Error::Server`] with the
    /// stream still usable. Transport and framing failures latch the
    /// connection as broken, as does dropping the returned future before
    /// the response is complete.
    pub(crate) async fn request(&mut self, command: Command, payload: &[u8]) -> Result<Bytes> {
        if self.broken {
            return Err(Error::Broken);
        }
        // Stays latched if this future is dropped mid-exchange.
        self.broken = true;
        match self.round_trip(command, payload).await {
            Ok(response) => {
                self.broken = false;
                response.into_payload(self.byte_order, self.charset)
            }
            Err(e) => {
                self.broken = e.desyncs_stream();
                if self.broken {
                    warn!(?command, error = %e, "connection marked broken");
                }
                Err(e)
            }
        }
    }

    async fn round_trip(&mut self, command: Command, payload: &[u8]) -> Result<Response> {
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;
        let frames = frame::encode_request(
            self.byte_order,
            command,
            seq,
            payload,
            self.server.capacity as usize,
        );
        debug!(?command, seq, bytes = payload.len(), frames = frames.len(), "send request");
        for f in &frames {
            self.transport.write_all(f).await?;
        }
        self.transport.flush().await?;

        let mut assembler = ResponseAssembler::new(seq);
        loop {
            let (header, body) = self.read_frame().await?;
            match assembler.push(header, body)? {
                Assembly::Skipped(stale) => {
                    trace!(expected = seq, got = stale.seq, "dropping frame for another request");
                }
                Assembly::Partial => {}
                Assembly::Complete(response) => {
                    debug!(
                        ?command,
                        seq,
                        result = response.result,
                        frames = response.frames,
                        bytes = response.payload.len(),
                        "response complete"
                    );
                    return Ok(response);
                }
            }
        }
    }

    async fn read_frame(&mut self) -> Result<(MessageHeader, Bytes)> {
        let prefix = self.transport.read_array::<{ frame::LENGTH_PREFIX }>().await?;
        let len = frame::body_len(self.byte_order, prefix)?;
        let body = self.transport.read_exact(len).await?;
        frame::split_body(self.byte_order, body)
    }

    pub(crate) fn cached_shape(&self, query: &str) -> Option<Arc<[FieldDescriptor]>> {
        self.shapes.get(query).cloned()
    }

    pub(crate) fn remember_shape(
        &mut self,
        query: &str,
        fields: Vec<FieldDescriptor>,
    ) -> Arc<[FieldDescriptor]> {
        if let Some(known) = self.shapes.get(query) {
            if known.as_ref() == fields.as_slice() {
                return known.clone();
            }
        }
        if self.shapes.len() >= MAX_CACHED_SHAPES {
            self.shapes.clear();
        }
        let shared: Arc<[FieldDescriptor]> = fields.into();
        self.shapes.insert(query.to_string(), shared.clone());
        shared
    }

    /// Execute `query`, re-using `handle` when the statement already has one.
    pub(crate) async fn execute_raw(
        &mut self,
        handle: Option<StatementHandle>,
        query: &str,
        fetch_size: u32,
    ) -> Result<(ExecuteReply, Option<Arc<[FieldDescriptor]>>)> {
        let cached = self.cached_shape(query);
        let payload = messages::encode_execute(
            self.byte_order,
            self.charset,
            handle.map_or(messages::NEW_STATEMENT, StatementHandle::get),
            cached.is_none(),
            fetch_size,
            query,
        );
        let body = self.request(Command::Execute, &payload).await?;
        let mut reply = ExecuteReply::decode(
            body,
            self.byte_order,
            self.charset,
            cached.as_ref().map(|f| f.len()),
        )?;
        let fields = match reply.fields.take() {
            Some(fresh) => Some(self.remember_shape(query, fresh)),
            None => cached,
        };
        Ok((reply, fields))
    }

    pub(crate) async fn fetch_raw(
        &mut self,
        handle: StatementHandle,
        fetch_size: u32,
        columns: usize,
    ) -> Result<FetchReply> {
        let payload = messages::encode_fetch(self.byte_order, handle.get(), fetch_size);
        let body = self.request(Command::Fetch, &payload).await?;
        FetchReply::decode(body, self.byte_order, columns)
    }

    pub(crate) async fn free_statement(&mut self, handle: StatementHandle) -> Result<()> {
        let payload = messages::encode_free_statement(self.byte_order, handle.get());
        self.request(Command::FreeStatement, &payload).await?;
        Ok(())
    }

    /// New statement bound to this connection.
    pub fn statement(&mut self) -> Statement<'_, S> {
        Statement::new(self)
    }

    /// Round-trip an empty request.
    pub async fn ping(&mut self) -> Result<()> {
        self.request(Command::Ping, &[]).await?;
        Ok(())
    }

    /// Commit the current transaction.
    pub async fn commit(&mut self) -> Result<()> {
        self.request(Command::Commit, &[]).await?;
        Ok(())
    }

    /// Roll back the current transaction.
    pub async fn rollback(&mut self) -> Result<()> {
        self.request(Command::Rollback, &[]).await?;
        Ok(())
    }

    /// Log out (best effort) and shut the stream down.
    pub async fn close(mut self) -> Result<()> {
        if self.state == HandshakeState::Ready && !self.broken {
            if let Err(e) = self.request(Command::Logout, &[]).await {
                warn!(error = %e, "logout failed");
            }
        }
        self.transport.shutdown().await
    }
}
