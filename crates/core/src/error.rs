//! Unified Error Types for Mantle
//!
//! Every failure kind the engine can hit is reported as its own variant:
//! callers retry some, reject others and investigate the rest, so the kinds
//! must stay distinguishable all the way up to [`ShieldError`].

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::crypto::NodeHash;
use crate::proof::registry::VkId;

/// Top-level error type for the engine
#[derive(Error, Debug)]
pub enum ShieldError {
    /// Witness elements could not be encoded
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// External prover failed or produced an unusable proof
    #[error("Prover error: {0}")]
    Prover(#[from] ProverError),

    /// The shield contract reverted or could not be reached
    #[error("Chain rejected: {0}")]
    ChainRejected(#[from] ContractError),

    /// Mirror holds a different value at the leaf index than the caller claims
    #[error("Leaf mismatch at index {index}: expected {expected}, mirror has {found}")]
    LeafMismatch {
        index: u64,
        expected: NodeHash,
        found: NodeHash,
    },

    /// Recomputed root is absent from the contract's root history
    #[error("Root {0} is not in the contract's root history")]
    UnknownRoot(NodeHash),

    /// Mirror did not catch up within the polling bound
    #[error("Mirror timeout: block {target_block} not reached after {attempts} polls (last seen {last_seen})")]
    MirrorTimeout {
        target_block: u64,
        last_seen: u64,
        attempts: u32,
    },

    /// Shielded inputs and outputs do not conserve value
    #[error("Value mismatch: inputs sum to {inputs}, outputs sum to {outputs}")]
    ValueMismatch { inputs: u128, outputs: u128 },

    /// Mirror query failed after retries
    #[error("Mirror error: {0}")]
    Mirror(#[from] MirrorError),

    /// Secret key does not hash to the input's recorded owner key
    #[error("Secret key does not own commitment {0}")]
    NotOwner(NodeHash),

    /// Input sibling paths resolved against different roots
    #[error("Input paths disagree on the root: {first} vs {second}")]
    RootDivergence { first: NodeHash, second: NodeHash },

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ShieldError {
    /// Whether retrying the whole operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ShieldError::MirrorTimeout { .. } | ShieldError::RootDivergence { .. } => true,
            ShieldError::Mirror(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result type alias for engine operations
pub type ShieldResult<T> = Result<T, ShieldError>;

/// Errors from witness encoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Unknown encoding kind: {0}")]
    UnknownEncoding(String),

    #[error("Invalid hex string: {0}")]
    InvalidHex(String),

    #[error("Invalid width: expected {expected} bytes, got {got}")]
    InvalidWidth { expected: usize, got: usize },

    #[error("Packet count must be at least one")]
    ZeroPackets,

    #[error("Value needs {bits} bits but only {capacity} fit in the requested packets")]
    Overflow { bits: usize, capacity: usize },
}

/// Errors from the external prover
#[derive(Error, Debug)]
pub enum ProverError {
    #[error("Failed to launch prover: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Prover {stage} exited with status {status:?}: {output}")]
    Failed {
        stage: &'static str,
        status: Option<i32>,
        output: String,
    },

    #[error("Prover {stage} reported a failure: {output}")]
    FailureMarker { stage: &'static str, output: String },

    #[error("Prover timed out after {0:?}")]
    Timeout(Duration),

    #[error("Circuit artifact not found: {0}")]
    MissingArtifact(PathBuf),

    #[error("Invalid prover output: {0}")]
    InvalidOutput(String),

    #[error("Proof point {0} is not a valid BN254 point")]
    InvalidPoint(&'static str),

    #[error("Public input echo differs from the witness at position {position}")]
    InputMismatch { position: usize },
}

/// Errors from the Merkle mirror service
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Leaf {index} not indexed in tree {tree}")]
    NotFound { tree: String, index: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Malformed sibling path: {0}")]
    MalformedPath(String),

    #[error("Unknown tree: {0}")]
    UnknownTree(String),

    #[error("Event filter for tree {0} is not running yet")]
    NotStarted(String),
}

impl MirrorError {
    /// Transport-level failures are worth another attempt; answers are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            MirrorError::Network(_) | MirrorError::NotStarted(_) => true,
            MirrorError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for MirrorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            MirrorError::InvalidResponse(err.to_string())
        } else {
            MirrorError::Network(err.to_string())
        }
    }
}

/// Errors reported by the shield contract
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("Nullifier already spent: {0}")]
    NullifierSpent(NodeHash),

    #[error("Commitment already exists: {0}")]
    CommitmentExists(NodeHash),

    #[error("Root not in history: {0}")]
    UnknownRoot(NodeHash),

    #[error("Verifying key {0} is not registered")]
    UnknownVerificationKey(VkId),

    #[error("No shield contract at {0}")]
    UnknownContract(String),

    #[error("Merkle tree is full")]
    TreeFull,

    #[error("RPC error: {0}")]
    Rpc(String),
}

/// Input validation utilities
pub mod validation {
    use super::*;

    /// Sum shielded values, refusing to wrap.
    pub fn checked_sum<I>(values: I) -> Result<u128, ShieldError>
    where
        I: IntoIterator<Item = u128>,
    {
        values.into_iter().try_fold(0u128, |acc, v| {
            acc.checked_add(v)
                .ok_or_else(|| ShieldError::InvalidInput("Value sum overflows 128 bits".to_string()))
        })
    }

    /// Reject a transfer whose inputs and outputs do not balance
    pub fn ensure_conserved(inputs: &[u128], outputs: &[u128]) -> Result<(), ShieldError> {
        let inputs = checked_sum(inputs.iter().copied())?;
        let outputs = checked_sum(outputs.iter().copied())?;
        if inputs != outputs {
            return Err(ShieldError::ValueMismatch { inputs, outputs });
        }
        Ok(())
    }

    /// Validate a non-empty identifier such as an account or payee address
    pub fn validate_identifier(value: &str, name: &str) -> Result<(), ShieldError> {
        if value.trim().is_empty() {
            return Err(ShieldError::InvalidInput(format!("{} must not be empty", name)));
        }
        Ok(())
    }
}
