//! Circuit identities and witness layouts
//!
//! Each (asset kind, operation) pair is one compiled circuit with its own
//! verifying key. The layout functions below fix the order and packing of the
//! witness for each circuit. Public elements always come first, so the
//! contract can rebuild the expected public inputs from its call arguments
//! with the `*_public` functions alone.
//!
//! Public Inputs:
//! - mint: value, commitment
//! - transfer / batch transfer: root, nullifiers, output commitments
//! - burn: root, nullifier, value, payee digest
//!
//! Private Inputs (Witness):
//! - secret key, then per input: value, salt, sibling hashes, packed positions
//! - per output: value, owner public key, salt

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::{hash, AssetKind, AssetValue, Commitment, NodeHash, SecretKey, SiblingPath};
use crate::error::EncodingError;
use crate::witness::{compute_vectors, Element, WitnessPlan};

/// Outputs of a batch transfer
pub const BATCH_OUTPUTS: usize = 20;

/// Packets for any node-width hash (216 bits)
pub const HASH_PACKETS: usize = 2;

/// Packets for a 256-bit secret key
pub const SECRET_PACKETS: usize = 2;

/// Packets for the packed sibling positions
pub const POSITION_PACKETS: usize = 1;

/// Operation proven by a circuit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Mint,
    Transfer,
    BatchTransfer,
    Burn,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Mint => "mint",
            Operation::Transfer => "transfer",
            Operation::BatchTransfer => "batch-transfer",
            Operation::Burn => "burn",
        }
    }
}

/// One compiled circuit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CircuitId {
    pub asset: AssetKind,
    pub operation: Operation,
}

impl CircuitId {
    pub const fn new(asset: AssetKind, operation: Operation) -> Self {
        Self { asset, operation }
    }

    /// Directory name of the circuit's artifacts, e.g. `ft-mint`
    pub fn name(&self) -> String {
        format!("{}-{}", self.asset.prefix(), self.operation.as_str())
    }

    /// Every circuit the engine drives. Batch transfer is fungible only.
    pub fn all() -> Vec<CircuitId> {
        let mut circuits = Vec::with_capacity(7);
        for asset in [AssetKind::Fungible, AssetKind::NonFungible] {
            for operation in [
                Operation::Mint,
                Operation::Transfer,
                Operation::BatchTransfer,
                Operation::Burn,
            ] {
                let circuit = CircuitId::new(asset, operation);
                if circuit.is_supported() {
                    circuits.push(circuit);
                }
            }
        }
        circuits
    }

    pub fn is_supported(&self) -> bool {
        !(self.asset == AssetKind::NonFungible && self.operation == Operation::BatchTransfer)
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for CircuitId {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CircuitId::all()
            .into_iter()
            .find(|circuit| circuit.name() == s)
            .ok_or_else(|| EncodingError::UnknownEncoding(format!("circuit {}", s)))
    }
}

/// A commitment being consumed, with its membership path
#[derive(Clone, Copy, Debug)]
pub struct SpentInput<'a> {
    pub commitment: &'a Commitment,
    pub path: &'a SiblingPath,
}

fn hash_element(value: &NodeHash) -> Element {
    Element::field(value.to_hex(), HASH_PACKETS)
}

fn value_element(value: &AssetValue) -> Element {
    let packets = match value.kind() {
        AssetKind::Fungible => 1,
        AssetKind::NonFungible => HASH_PACKETS,
    };
    Element::field(value.to_hex(), packets)
}

/// Digest binding a burn proof to the payee that receives the public value
pub fn payee_digest(payee: &str) -> NodeHash {
    hash(payee.as_bytes())
}

pub fn mint_public(value: &AssetValue, commitment: &NodeHash) -> Vec<Element> {
    vec![value_element(value), hash_element(commitment)]
}

pub fn spend_public(root: &NodeHash, nullifiers: &[NodeHash], commitments: &[NodeHash]) -> Vec<Element> {
    std::iter::once(root)
        .chain(nullifiers.iter())
        .chain(commitments.iter())
        .map(hash_element)
        .collect()
}

pub fn burn_public(root: &NodeHash, nullifier: &NodeHash, value: &AssetValue, payee: &str) -> Vec<Element> {
    vec![
        hash_element(root),
        hash_element(nullifier),
        value_element(value),
        hash_element(&payee_digest(payee)),
    ]
}

/// Encoded public inputs, as a verifier would assemble them
pub fn public_inputs(elements: &[Element]) -> Result<Vec<u128>, EncodingError> {
    compute_vectors(elements)
}

fn with_public(elements: Vec<Element>) -> WitnessPlan {
    elements.into_iter().fold(WitnessPlan::new(), WitnessPlan::public)
}

fn push_input(plan: WitnessPlan, input: &SpentInput<'_>, include_value: bool) -> WitnessPlan {
    let plan = if include_value {
        plan.private(value_element(&input.commitment.value))
    } else {
        plan
    };
    let plan = plan.private(hash_element(&input.commitment.salt));
    let plan = input
        .path
        .siblings
        .iter()
        .fold(plan, |plan, sibling| plan.private(hash_element(sibling)));
    plan.private(Element::field(input.path.positions_hex(), POSITION_PACKETS))
}

fn push_output(plan: WitnessPlan, output: &Commitment) -> WitnessPlan {
    plan.private(value_element(&output.value))
        .private(hash_element(&output.owner_public_key))
        .private(hash_element(&output.salt))
}

fn secret_element(secret: &SecretKey) -> Element {
    Element::field(secret.to_hex(), SECRET_PACKETS)
}

/// Mint: prove `commitment` opens to `value` under some key and salt
pub fn mint_plan(commitment: &Commitment) -> WitnessPlan {
    with_public(mint_public(&commitment.value, &commitment.hash))
        .private(hash_element(&commitment.owner_public_key))
        .private(hash_element(&commitment.salt))
}

/// Transfer and batch transfer: consume `inputs`, create `outputs`
pub fn transfer_plan(
    secret: &SecretKey,
    inputs: &[SpentInput<'_>],
    outputs: &[Commitment],
    root: &NodeHash,
) -> WitnessPlan {
    let nullifiers: Vec<NodeHash> = inputs.iter().map(|i| i.commitment.nullifier(secret)).collect();
    let commitments: Vec<NodeHash> = outputs.iter().map(|o| o.hash).collect();

    let plan = with_public(spend_public(root, &nullifiers, &commitments)).private(secret_element(secret));
    let plan = inputs.iter().fold(plan, |plan, input| push_input(plan, input, true));
    outputs.iter().fold(plan, push_output)
}

/// Burn: consume `input`, releasing its value to `payee`
pub fn burn_plan(secret: &SecretKey, input: &SpentInput<'_>, root: &NodeHash, payee: &str) -> WitnessPlan {
    let nullifier = input.commitment.nullifier(secret);
    let plan = with_public(burn_public(root, &nullifier, &input.commitment.value, payee))
        .private(secret_element(secret));
    push_input(plan, input, false)
}
