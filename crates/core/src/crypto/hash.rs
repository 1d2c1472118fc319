//! SHA-256 hash primitives truncated to the circuit's node-hash width
//!
//! Every node of the shield tree, every commitment, public key, salt and
//! nullifier is the trailing [`NODE_HASH_BYTES`] bytes of a SHA-256 digest.
//! The circuits hash at exactly this width, so anything wider (token ids in
//! particular) must be truncated *before* it is hashed.

use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::EncodingError;

/// Width of a tree node hash in bytes (216 bits)
pub const NODE_HASH_BYTES: usize = 27;

/// A node-width hash value
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeHash([u8; NODE_HASH_BYTES]);

/// Owner public key, `hash(secret_key)`
pub type PublicKey = NodeHash;

/// Commitment salt
pub type Salt = NodeHash;

impl NodeHash {
    /// The empty leaf
    pub const ZERO: NodeHash = NodeHash([0u8; NODE_HASH_BYTES]);

    pub const fn from_bytes(bytes: [u8; NODE_HASH_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NODE_HASH_BYTES] {
        &self.0
    }

    /// Keep the trailing node-width bytes, left-padding shorter input with zeros
    pub fn truncate(bytes: &[u8]) -> Self {
        let mut out = [0u8; NODE_HASH_BYTES];
        if bytes.len() >= NODE_HASH_BYTES {
            out.copy_from_slice(&bytes[bytes.len() - NODE_HASH_BYTES..]);
        } else {
            out[NODE_HASH_BYTES - bytes.len()..].copy_from_slice(bytes);
        }
        Self(out)
    }

    /// Fresh random value from OS randomness
    pub fn random() -> Self {
        let mut out = [0u8; NODE_HASH_BYTES];
        OsRng.fill_bytes(&mut out);
        Self(out)
    }

    /// Parse exactly node-width hex, with or without `0x`
    pub fn from_hex(s: &str) -> Result<Self, EncodingError> {
        let bytes = decode_hex(s)?;
        if bytes.len() != NODE_HASH_BYTES {
            return Err(EncodingError::InvalidWidth {
                expected: NODE_HASH_BYTES,
                got: bytes.len(),
            });
        }
        Ok(Self::truncate(&bytes))
    }

    /// `0x`-prefixed lowercase hex
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHash({})", self.to_hex())
    }
}

impl FromStr for NodeHash {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for NodeHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for NodeHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NodeHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Hash a single byte string
pub fn hash(data: &[u8]) -> NodeHash {
    concatenate_then_hash(&[data])
}

/// Concatenate the parts in order, SHA-256 the result and truncate
pub fn concatenate_then_hash(parts: &[&[u8]]) -> NodeHash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    NodeHash::truncate(&hasher.finalize())
}

/// Merkle node hash: `hash(left || right)`
pub fn hash_pair(left: &NodeHash, right: &NodeHash) -> NodeHash {
    concatenate_then_hash(&[left.as_bytes(), right.as_bytes()])
}

/// `bytes` random bytes as `0x`-prefixed hex
pub fn rnd_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    format!("0x{}", hex::encode(buf))
}

/// Drop a leading `0x` / `0X` if present
pub fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Decode hex, tolerating a `0x` prefix and an odd digit count
pub fn decode_hex(s: &str) -> Result<Vec<u8>, EncodingError> {
    let digits = strip_0x(s.trim());
    let decoded = if digits.len() % 2 == 1 {
        hex::decode(format!("0{}", digits))
    } else {
        hex::decode(digits)
    };
    decoded.map_err(|e| EncodingError::InvalidHex(format!("{}: {}", s, e)))
}

/// Left-pad hex digits with zeros to `bytes` bytes, keeping any longer input intact
pub fn left_pad_hex(s: &str, bytes: usize) -> String {
    let digits = strip_0x(s);
    format!("0x{:0>width$}", digits, width = bytes * 2)
}
