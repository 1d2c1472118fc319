//! Secret keys and nullifier derivation
//!
//! - public_key = hash(secret_key)
//! - nullifier  = hash(salt || secret_key)
//!
//! A nullifier is revealed when its commitment is consumed. It is
//! deterministic for a given (salt, secret) pair, so the contract can refuse a
//! second spend, while revealing neither the secret nor which leaf was spent.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;

use super::hash::{concatenate_then_hash, decode_hex, hash, NodeHash, PublicKey, Salt};
use crate::error::EncodingError;

/// Secret key width in bytes
pub const SECRET_KEY_BYTES: usize = 32;

/// An owner's secret key. Never leaves the orchestrating process except as a
/// private witness input.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; SECRET_KEY_BYTES]);

impl SecretKey {
    /// Generate a fresh key from OS randomness
    pub fn random() -> Self {
        let mut bytes = [0u8; SECRET_KEY_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SECRET_KEY_BYTES]) -> Self {
        Self(bytes)
    }

    /// Parse hex of at most 32 bytes, left-padding shorter keys
    pub fn from_hex(s: &str) -> Result<Self, EncodingError> {
        let decoded = decode_hex(s)?;
        if decoded.len() > SECRET_KEY_BYTES {
            return Err(EncodingError::InvalidWidth {
                expected: SECRET_KEY_BYTES,
                got: decoded.len(),
            });
        }
        let mut bytes = [0u8; SECRET_KEY_BYTES];
        bytes[SECRET_KEY_BYTES - decoded.len()..].copy_from_slice(&decoded);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_BYTES] {
        &self.0
    }

    /// `0x`-prefixed hex, for witness assembly only
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// The public key this secret controls
    pub fn public_key(&self) -> PublicKey {
        hash(&self.0)
    }

    /// Whether this secret controls `public_key`
    pub fn owns(&self, public_key: &PublicKey) -> bool {
        self.public_key() == *public_key
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Nullifier for the commitment carrying `salt`, spent by `secret`
pub fn derive_nullifier(salt: &Salt, secret: &SecretKey) -> NodeHash {
    concatenate_then_hash(&[salt.as_bytes(), secret.as_bytes()])
}
