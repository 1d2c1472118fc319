//! Mantle - Shielded Commitment Engine
//!
//! Client-side engine for shielded fungible and non-fungible tokens held as
//! hash commitments in an on-chain append-only Merkle tree.
//!
//! # Modules
//! - `crypto`: Commitments, nullifiers, truncated SHA-256 and the Merkle tree
//! - `witness`: Packing hex elements into 128-bit witness packets
//! - `mirror`: Merkle mirror client and the block-height consistency wait
//! - `path`: Sibling-path reconstruction and authentication
//! - `verifier`: Correctness checks on commitments received from others
//! - `proof`: Circuits, the prover adapter and verifying-key registry
//! - `contract`: The shield contract seam
//! - `shield`: Proof orchestration for mint, transfer, batch transfer and burn

pub mod config;
pub mod contract;
pub mod crypto;
pub mod error;
pub mod mirror;
pub mod path;
pub mod proof;
pub mod shield;
pub mod transaction;
pub mod verifier;
pub mod witness;

#[cfg(test)]
mod testing;

// Re-export common types
pub use config::EngineConfig;
pub use contract::{ContractContext, ShieldContract, ShieldDirectory};
pub use crypto::{AssetKind, AssetValue, Commitment, NodeHash, PublicKey, SecretKey, TokenId};
pub use error::{ContractError, EncodingError, MirrorError, ProverError, ShieldError, ShieldResult};
pub use mirror::{HttpMirrorClient, MerkleMirror};
pub use path::compute_authenticated_path;
pub use proof::{CircuitId, Operation, Proof, ProverAdapter, SubprocessProver};
pub use shield::{Engine, FungibleShield, NonFungibleShield, TransferOutput};
pub use transaction::{TransactionKind, TransactionRecord};
pub use verifier::{check_correctness, CorrectnessClaim, CorrectnessReport};
pub use witness::{compute_vectors, Element, EncodingKind, WitnessPlan, WitnessVector};
