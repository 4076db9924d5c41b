//! Connection handshake and authentication.
//!
//! ```text
//! Idle -> MarkSent -> EndianNegotiated -> HandshakeSent -> HandshakeAcked
//!      -> AuthInitSent -> AuthChallengeVerified -> LoginSent -> Ready
//! ```
//!
//! Any failure ends in `Failed`; the caller closes the stream and a new
//! attempt needs a new connection.

use tracing::debug;

use super::connection::{Connection, NativeStream, SessionKeys};
use crate::config::ConnectOptions;
use crate::error::{Error, Result};
use crate::protocol::auth::{generate_client_key, verify_key_echo};
use crate::protocol::codec::Charset;
use crate::protocol::frame::Command;
use crate::protocol::messages::{
    self, AuthChallenge, HandshakeAck, LoginAck, LoginRequest, PreambleReply, LOGIN_BINARY_ROWS,
    LOGIN_MULTI_FRAME, PREAMBLE_MAGIC,
};

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    MarkSent,
    EndianNegotiated,
    HandshakeSent,
    HandshakeAcked,
    AuthInitSent,
    AuthChallengeVerified,
    LoginSent,
    Ready,
    Failed,
}

impl<S: NativeStream> Connection<S> {
    fn advance(&mut self, next: HandshakeState) {
        debug!(from = ?self.state, to = ?next, "handshake");
        self.state = next;
    }

    pub(crate) async fn handshake(
        &mut self,
        options: &ConnectOptions,
        client_addr: &str,
    ) -> Result<()> {
        if self.state != HandshakeState::Idle {
            return Err(Error::Handshake(format!(
                "handshake cannot restart from {:?}",
                self.state
            )));
        }
        self.exchange_mark().await?;
        self.exchange_keys().await?;
        self.authenticate(options).await?;
        self.login(options, client_addr).await
    }

    /// Magic marker out, endianness/version/response flag back.
    async fn exchange_mark(&mut self) -> Result<()> {
        self.transport.write_all(&PREAMBLE_MAGIC).await?;
        self.transport.flush().await?;
        self.advance(HandshakeState::MarkSent);

        let raw = self
            .transport
            .read_array::<{ messages::PREAMBLE_REPLY_LEN }>()
            .await?;
        let reply = PreambleReply::decode(raw)?;
        if reply.response_flag != 0 {
            return Err(Error::Handshake(format!(
                "server rejected connection preamble (flag {:#06x})",
                reply.response_flag
            )));
        }
        self.byte_order = reply.byte_order;
        self.server.preamble_version = reply.server_version;
        self.advance(HandshakeState::EndianNegotiated);
        Ok(())
    }

    /// Client key out; capacity, scramble and iteration count back. The
    /// scramble must echo the client key before any credential is sent.
    async fn exchange_keys(&mut self) -> Result<()> {
        let client_key = generate_client_key();
        let payload = messages::encode_handshake(self.byte_order, &client_key);
        self.advance(HandshakeState::HandshakeSent);

        let body = self.request(Command::Handshake, &payload).await?;
        let ack = HandshakeAck::decode(body, self.byte_order)?;
        verify_key_echo(&client_key, &ack.scramble)?;
        if ack.iterations == 0 {
            return Err(Error::Handshake("server sent iteration count 0".to_string()));
        }

        self.server.capacity = ack.capacity;
        self.server.protocol_version = ack.server_protocol;
        self.keys = SessionKeys {
            client_key,
            scramble: ack.scramble,
            iterations: ack.iterations,
        };
        self.advance(HandshakeState::HandshakeAcked);
        Ok(())
    }

    /// User and client key out; the server's signing key must match the
    /// one derived from our password.
    async fn authenticate(&mut self, options: &ConnectOptions) -> Result<()> {
        let payload = messages::encode_auth_init(
            self.byte_order,
            self.charset,
            &options.user,
            &self.keys.client_key,
            options.tenant.as_deref(),
        );
        self.advance(HandshakeState::AuthInitSent);

        let body = self.request(Command::AuthInit, &payload).await?;
        let challenge = AuthChallenge::decode(body, self.byte_order)?;
        let verified = self.hasher.verify(
            options.password.as_bytes(),
            &self.keys.scramble,
            self.keys.iterations,
            &challenge.server_signing_key,
        );
        if !verified {
            return Err(Error::SigningKeyRejected);
        }
        self.advance(HandshakeState::AuthChallengeVerified);
        Ok(())
    }

    /// Password hash and session details out; charset and session id back.
    async fn login(&mut self, options: &ConnectOptions, client_addr: &str) -> Result<()> {
        let password_hash = self.hasher.derive_hash(
            options.password.as_bytes(),
            &self.keys.scramble,
            self.keys.iterations,
        );
        let request = LoginRequest {
            user: &options.user,
            password_hash: &password_hash,
            client_addr,
            tz_offset_secs: chrono::Local::now().offset().local_minus_utc(),
            tenant: options.tenant.as_deref(),
            flags: LOGIN_BINARY_ROWS | LOGIN_MULTI_FRAME,
        };
        let payload = request.encode(self.byte_order, self.charset);
        self.advance(HandshakeState::LoginSent);

        let body = self.request(Command::Login, &payload).await?;
        let ack = LoginAck::decode(body, self.byte_order)?;
        let charset = Charset::from_wire(ack.charset)?;
        self.charset = charset;
        self.server.session_id = ack.session_id;
        self.server.banner = charset.decode(&ack.banner).into_owned();
        self.advance(HandshakeState::Ready);
        debug!(
            session = ack.session_id,
            charset = charset.name(),
            byte_order = ?self.byte_order,
            "session ready"
        );
        Ok(())
    }
}
