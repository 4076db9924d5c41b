//! Challenge-response authentication material.
//!
//! The password hash primitives sit behind [`PasswordHasher`] so a
//! deployment can plug in the server's own derivation. [`Pbkdf2Sha256`]
//! is the default:
//!
//! ```text
//! salted   = PBKDF2-HMAC-SHA-256(password, scramble, iterations, 32)
//! hash     = SHA-256(HMAC(salted, "Client Key"))      sent at login
//! signing  = HMAC(salted, "Server Key")               expected from the server
//! ```

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Length of the locally generated client key.
pub const CLIENT_KEY_LEN: usize = 32;

/// Password hash derivation and server signing-key verification.
pub trait PasswordHasher: Send + Sync {
    /// Derive the login hash from the password, the session scramble and
    /// the server's iteration count.
    fn derive_hash(&self, password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8>;

    /// Check the server's signing key against one derived from the local
    /// secret.
    fn verify(
        &self,
        local_secret: &[u8],
        salt: &[u8],
        iterations: u32,
        server_signing_key: &[u8],
    ) -> bool;
}

/// PBKDF2/HMAC-SHA-256 derivation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pbkdf2Sha256;

impl Pbkdf2Sha256 {
    fn salted(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
        let mut out = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
        out
    }

    fn keyed(key: &[u8]) -> HmacSha256 {
        HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length")
    }

    /// Signing key a server holding this password presents.
    pub fn server_key(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
        let mut mac = Self::keyed(&Self::salted(password, salt, iterations));
        mac.update(b"Server Key");
        mac.finalize().into_bytes().to_vec()
    }
}

impl PasswordHasher for Pbkdf2Sha256 {
    fn derive_hash(&self, password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
        let mut mac = Self::keyed(&Self::salted(password, salt, iterations));
        mac.update(b"Client Key");
        let client_key = mac.finalize().into_bytes();
        Sha256::digest(client_key).to_vec()
    }

    fn verify(
        &self,
        local_secret: &[u8],
        salt: &[u8],
        iterations: u32,
        server_signing_key: &[u8],
    ) -> bool {
        let mut mac = Self::keyed(&Self::salted(local_secret, salt, iterations));
        mac.update(b"Server Key");
        // Constant-time comparison.
        mac.verify_slice(server_signing_key).is_ok()
    }
}

/// Fresh random client key for one handshake.
pub fn generate_client_key() -> [u8; CLIENT_KEY_LEN] {
    rand::random()
}

/// The scramble must start with the client key, byte for byte.
pub fn verify_key_echo(client_key: &[u8], scramble: &[u8]) -> Result<()> {
    for (offset, expected) in client_key.iter().enumerate() {
        if scramble.get(offset) != Some(expected) {
            return Err(Error::ClientKeyMismatch { offset });
        }
    }
    Ok(())
}
