//! Hash commitments
//!
//! C = hash(value || owner_public_key || salt)
//!
//! Binding comes from the collision resistance of SHA-256, hiding from the
//! random node-width salt. `value` is a 128-bit big-endian amount for fungible
//! assets or the truncated token id for non-fungible ones.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::hash::{concatenate_then_hash, decode_hex, NodeHash, PublicKey, Salt, NODE_HASH_BYTES};
use super::nullifier::{derive_nullifier, SecretKey};
use crate::error::EncodingError;

/// Width of a fungible value in bytes
pub const VALUE_BYTES: usize = 16;

/// Width of a non-fungible token id as issued by the public ledger
pub const TOKEN_ID_BYTES: usize = 32;

/// Asset kind handled by one shield contract
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Fungible,
    NonFungible,
}

impl AssetKind {
    /// Short prefix used in circuit names
    pub fn prefix(&self) -> &'static str {
        match self {
            AssetKind::Fungible => "ft",
            AssetKind::NonFungible => "nft",
        }
    }
}

/// A 256-bit non-fungible token id
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId([u8; TOKEN_ID_BYTES]);

impl TokenId {
    pub fn from_bytes(bytes: [u8; TOKEN_ID_BYTES]) -> Self {
        Self(bytes)
    }

    /// Parse hex of at most 32 bytes, left-padding shorter ids
    pub fn from_hex(s: &str) -> Result<Self, EncodingError> {
        let decoded = decode_hex(s)?;
        if decoded.len() > TOKEN_ID_BYTES {
            return Err(EncodingError::InvalidWidth {
                expected: TOKEN_ID_BYTES,
                got: decoded.len(),
            });
        }
        let mut bytes = [0u8; TOKEN_ID_BYTES];
        bytes[TOKEN_ID_BYTES - decoded.len()..].copy_from_slice(&decoded);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_ID_BYTES] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// The id as the circuit sees it: trailing node-width bytes
    pub fn truncated(&self) -> NodeHash {
        NodeHash::truncate(&self.0)
    }
}

impl fmt::Debug for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenId({})", self.to_hex())
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for TokenId {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for TokenId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TokenId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TokenId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// The committed value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AssetValue {
    Fungible(#[serde(with = "amount_string")] u128),
    NonFungible(TokenId),
}

/// 128-bit amounts are carried as decimal strings.
mod amount_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&amount.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl AssetValue {
    pub fn kind(&self) -> AssetKind {
        match self {
            AssetValue::Fungible(_) => AssetKind::Fungible,
            AssetValue::NonFungible(_) => AssetKind::NonFungible,
        }
    }

    /// Amount, for fungible values
    pub fn amount(&self) -> Option<u128> {
        match self {
            AssetValue::Fungible(amount) => Some(*amount),
            AssetValue::NonFungible(_) => None,
        }
    }

    /// Fixed-width bytes exactly as hashed by the circuit
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            AssetValue::Fungible(amount) => amount.to_be_bytes().to_vec(),
            AssetValue::NonFungible(id) => id.truncated().as_bytes().to_vec(),
        }
    }

    /// Fixed-width `0x` hex of [`AssetValue::to_bytes`]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }

    /// Width of the hashed representation in bytes
    pub fn width(&self) -> usize {
        match self {
            AssetValue::Fungible(_) => VALUE_BYTES,
            AssetValue::NonFungible(_) => NODE_HASH_BYTES,
        }
    }
}

/// Where a commitment is in its lifecycle, as last reported by the contract
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CommitmentStatus {
    /// Created locally, not yet confirmed in the tree
    Pending,
    /// Mined at the given leaf index, in the given block
    Indexed {
        leaf_index: u64,
        #[serde(default)]
        block_number: u64,
    },
    /// Consumed by a transaction the contract accepted
    Spent { leaf_index: u64 },
}

/// The opening a sender discloses so a receiver can check a commitment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisclosedCommitment {
    pub value: AssetValue,
    pub owner_public_key: PublicKey,
    pub salt: Salt,
}

impl DisclosedCommitment {
    pub fn commitment_hash(&self) -> NodeHash {
        Commitment::commitment_hash(&self.value, &self.owner_public_key, &self.salt)
    }
}

/// A commitment together with its opening
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    /// The committed value
    pub value: AssetValue,
    /// Owner's public key
    pub owner_public_key: PublicKey,
    /// Random salt (hiding)
    pub salt: Salt,
    /// hash(value || owner_public_key || salt)
    pub hash: NodeHash,
    /// Lifecycle state
    pub status: CommitmentStatus,
}

impl Commitment {
    /// Commit with a fresh random salt
    pub fn new_random(value: AssetValue, owner_public_key: PublicKey) -> Self {
        Self::with_salt(value, owner_public_key, NodeHash::random())
    }

    /// Commit with an explicit salt, e.g. to rebuild a received commitment
    pub fn with_salt(value: AssetValue, owner_public_key: PublicKey, salt: Salt) -> Self {
        let hash = Self::commitment_hash(&value, &owner_public_key, &salt);
        Self {
            value,
            owner_public_key,
            salt,
            hash,
            status: CommitmentStatus::Pending,
        }
    }

    /// hash(value || owner_public_key || salt)
    pub fn commitment_hash(value: &AssetValue, owner_public_key: &PublicKey, salt: &Salt) -> NodeHash {
        let value_bytes = value.to_bytes();
        concatenate_then_hash(&[&value_bytes, owner_public_key.as_bytes(), salt.as_bytes()])
    }

    /// Check the stored hash against the opening
    pub fn verify(&self) -> bool {
        Self::commitment_hash(&self.value, &self.owner_public_key, &self.salt) == self.hash
    }

    /// Record the contract-assigned leaf index and the block it was mined in
    pub fn indexed(mut self, leaf_index: u64, block_number: u64) -> Self {
        self.status = CommitmentStatus::Indexed {
            leaf_index,
            block_number,
        };
        self
    }

    /// Mark consumed after the contract accepted the spend
    pub fn spent(mut self) -> Self {
        if let Some(leaf_index) = self.leaf_index() {
            self.status = CommitmentStatus::Spent { leaf_index };
        }
        self
    }

    pub fn leaf_index(&self) -> Option<u64> {
        match self.status {
            CommitmentStatus::Pending => None,
            CommitmentStatus::Indexed { leaf_index, .. } | CommitmentStatus::Spent { leaf_index } => {
                Some(leaf_index)
            }
        }
    }

    /// Block the commitment was mined in, while it is unspent
    pub fn mined_at(&self) -> Option<u64> {
        match self.status {
            CommitmentStatus::Indexed { block_number, .. } => Some(block_number),
            _ => None,
        }
    }

    /// Nullifier revealed when `secret` spends this commitment
    pub fn nullifier(&self, secret: &SecretKey) -> NodeHash {
        derive_nullifier(&self.salt, secret)
    }

    /// The opening to hand to a receiver
    pub fn disclose(&self) -> DisclosedCommitment {
        DisclosedCommitment {
            value: self.value,
            owner_public_key: self.owner_public_key,
            salt: self.salt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commitment_random_salt() {
        let pk = SecretKey::random().public_key();
        let c1 = Commitment::new_random(AssetValue::Fungible(1000), pk);
        let c2 = Commitment::new_random(AssetValue::Fungible(1000), pk);

        // Random salt should produce different commitments
        assert_ne!(c1.hash, c2.hash);
        assert_ne!(c1.salt, c2.salt);
        assert!(c1.verify() && c2.verify());
    }

    #[test]
    fn test_commitment_with_explicit_salt() {
        let pk = SecretKey::from_bytes([3u8; 32]).public_key();
        let salt = NodeHash::truncate(&[42]);

        let c1 = Commitment::with_salt(AssetValue::Fungible(1000), pk, salt);
        let c2 = Commitment::with_salt(AssetValue::Fungible(1000), pk, salt);
        assert_eq!(c1.hash, c2.hash);
        assert_eq!(c1.disclose().commitment_hash(), c1.hash);
    }

    #[test]
    fn test_fungible_value_is_fixed_width() {
        let v = AssetValue::Fungible(10_000);
        assert_eq!(v.to_hex(), "0x00000000000000000000000000002710");
        assert_eq!(v.to_bytes().len(), VALUE_BYTES);
    }

    #[test]
    fn test_token_id_truncated_before_hashing() {
        let mut wide = [0u8; 32];
        wide[0] = 0xff; // lives in the truncated-away prefix
        wide[31] = 0x01;
        let a = TokenId::from_bytes(wide);
        wide[0] = 0x00;
        let b = TokenId::from_bytes(wide);

        assert_eq!(AssetValue::NonFungible(a).to_bytes().len(), NODE_HASH_BYTES);
        assert_eq!(
            AssetValue::NonFungible(a).to_bytes(),
            AssetValue::NonFungible(b).to_bytes()
        );
    }

    #[test]
    fn test_lifecycle() {
        let pk = SecretKey::random().public_key();
        let c = Commitment::new_random(AssetValue::Fungible(5), pk);
        assert_eq!(c.status, CommitmentStatus::Pending);
        assert_eq!(c.clone().spent().status, CommitmentStatus::Pending);

        let c = c.indexed(7, 4);
        assert_eq!(c.leaf_index(), Some(7));
        assert_eq!(c.mined_at(), Some(4));
        let c = c.spent();
        assert_eq!(c.mined_at(), None);
        assert_eq!(c.status, CommitmentStatus::Spent { leaf_index: 7 });
        assert_eq!(c.leaf_index(), Some(7));
    }

    #[test]
    fn test_tampered_opening_fails_verification() {
        let pk = SecretKey::random().public_key();
        let mut c = Commitment::new_random(AssetValue::Fungible(5), pk);
        c.value = AssetValue::Fungible(6);
        assert!(!c.verify());
    }

    #[test]
    fn test_serde_roundtrip() {
        let pk = SecretKey::random().public_key();
        let id = TokenId::from_hex("0x1234").unwrap();
        let c = Commitment::new_random(AssetValue::NonFungible(id), pk).indexed(3, 2);
        let json = serde_json::to_string(&c).unwrap();
        let back: Commitment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
