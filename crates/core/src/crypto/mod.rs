//! Cryptographic primitives for shielded commitments

pub mod commitment;
pub mod hash;
pub mod merkle;
pub mod nullifier;

pub use commitment::{
    AssetKind, AssetValue, Commitment, CommitmentStatus, DisclosedCommitment, TokenId,
    TOKEN_ID_BYTES, VALUE_BYTES,
};
pub use hash::{
    concatenate_then_hash, hash, hash_pair, left_pad_hex, rnd_hex, strip_0x, NodeHash, PublicKey,
    Salt, NODE_HASH_BYTES,
};
pub use merkle::{
    leaf_node_index, path_layout, verify_merkle_proof, zero_hashes, MerkleError, ShieldTree,
    Side, SiblingPath, MAX_LEAVES, TREE_HEIGHT,
};
pub use nullifier::{derive_nullifier, SecretKey, SECRET_KEY_BYTES};
