//! Proof artifacts produced by the external prover
//!
//! This module defines the Groth16 proof as it travels from the prover to the
//! shield contract, and the adapters that produce it.
//!
//! Components:
//! - `circuit`: circuit identities and their witness layouts
//! - `prover`: the `ProverAdapter` seam and the subprocess implementation
//! - `registry`: verifying-key registration per circuit
//!
//! Points arrive as big-endian hex coordinates. Every point is checked to be
//! on BN254 and in the prime-order subgroup before a proof is accepted.

pub mod circuit;
pub mod prover;
pub mod registry;

use ark_bn254::{Fq, Fq2, G1Affine, G2Affine};
use ark_ff::{BigInt, BigInteger, PrimeField};
use serde::{Deserialize, Serialize};

use crate::crypto::hash::decode_hex;
use crate::error::ProverError;

pub use circuit::{CircuitId, Operation};
pub use prover::{ProverAdapter, SubprocessProver};
pub use registry::{VerificationKey, VerifyingKeyRegistry, VkId};

/// Width of one base-field coordinate
pub const COORDINATE_BYTES: usize = 32;

/// Serialized proof width: A (64) || B (128) || C (64)
pub const PROOF_BYTES: usize = 256;

/// Parse a big-endian hex coordinate, rejecting values outside the field
fn parse_fq(hex: &str, point: &'static str) -> Result<Fq, ProverError> {
    let bytes = decode_hex(hex).map_err(|_| ProverError::InvalidPoint(point))?;
    if bytes.len() > COORDINATE_BYTES {
        return Err(ProverError::InvalidPoint(point));
    }
    let mut padded = [0u8; COORDINATE_BYTES];
    padded[COORDINATE_BYTES - bytes.len()..].copy_from_slice(&bytes);

    // little-endian u64 limbs
    let mut limbs = [0u64; 4];
    for (i, chunk) in padded.rchunks(8).enumerate() {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        limbs[i] = u64::from_be_bytes(word);
    }
    Fq::from_bigint(BigInt::new(limbs)).ok_or(ProverError::InvalidPoint(point))
}

fn fq_to_bytes(value: &Fq) -> [u8; COORDINATE_BYTES] {
    let mut out = [0u8; COORDINATE_BYTES];
    out.copy_from_slice(&value.into_bigint().to_bytes_be());
    out
}

fn fq_to_hex(value: &Fq) -> String {
    format!("0x{}", hex::encode(fq_to_bytes(value)))
}

/// G1 point as `[x, y]` hex coordinates
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct G1Point(pub [String; 2]);

impl G1Point {
    pub fn from_affine(point: &G1Affine) -> Self {
        Self([fq_to_hex(&point.x), fq_to_hex(&point.y)])
    }

    /// Parse and check the point is on the curve and in the subgroup
    pub fn to_affine(&self, name: &'static str) -> Result<G1Affine, ProverError> {
        let x = parse_fq(&self.0[0], name)?;
        let y = parse_fq(&self.0[1], name)?;
        let point = G1Affine::new_unchecked(x, y);
        if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
            return Err(ProverError::InvalidPoint(name));
        }
        Ok(point)
    }
}

/// G2 point as `[[x.c0, x.c1], [y.c0, y.c1]]` hex coordinates
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct G2Point(pub [[String; 2]; 2]);

impl G2Point {
    pub fn from_affine(point: &G2Affine) -> Self {
        Self([
            [fq_to_hex(&point.x.c0), fq_to_hex(&point.x.c1)],
            [fq_to_hex(&point.y.c0), fq_to_hex(&point.y.c1)],
        ])
    }

    pub fn to_affine(&self, name: &'static str) -> Result<G2Affine, ProverError> {
        let [x, y] = &self.0;
        let x = Fq2::new(parse_fq(&x[0], name)?, parse_fq(&x[1], name)?);
        let y = Fq2::new(parse_fq(&y[0], name)?, parse_fq(&y[1], name)?);
        let point = G2Affine::new_unchecked(x, y);
        if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
            return Err(ProverError::InvalidPoint(name));
        }
        Ok(point)
    }
}

/// The three proof points as written by the prover
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofPoints {
    pub a: G1Point,
    pub b: G2Point,
    pub c: G1Point,
}

/// `proof.json` written by `generate-proof`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProofFile {
    pub proof: ProofPoints,
    /// Public inputs echoed back as hex field elements
    pub inputs: Vec<String>,
}

impl ProofFile {
    /// Validate the points and decode the echoed inputs
    pub fn into_proof(self) -> Result<Proof, ProverError> {
        let inputs = self
            .inputs
            .iter()
            .map(|input| parse_input(input))
            .collect::<Result<Vec<_>, _>>()?;
        Proof::new(self.proof, inputs)
    }
}

/// Public inputs of our circuits are packet-sized; anything wider is a bad echo
fn parse_input(hex: &str) -> Result<u128, ProverError> {
    let bytes = decode_hex(hex).map_err(|e| ProverError::InvalidOutput(e.to_string()))?;
    let split = bytes.len().saturating_sub(16);
    if bytes[..split].iter().any(|&b| b != 0) {
        return Err(ProverError::InvalidOutput(format!(
            "public input {} exceeds 128 bits",
            hex
        )));
    }
    Ok(bytes[split..].iter().fold(0u128, |acc, &b| (acc << 8) | u128::from(b)))
}

/// A validated Groth16 proof with its public inputs
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub points: ProofPoints,
    pub inputs: Vec<u128>,
}

impl Proof {
    /// Build a proof, rejecting points that are not on BN254
    pub fn new(points: ProofPoints, inputs: Vec<u128>) -> Result<Self, ProverError> {
        let _a = points.a.to_affine("A")?;
        let _b = points.b.to_affine("B")?;
        let _c = points.c.to_affine("C")?;
        Ok(Self { points, inputs })
    }

    /// Check the echoed public inputs against the witness we supplied
    pub fn check_inputs(&self, expected: &[u128]) -> Result<(), ProverError> {
        for (position, (echoed, ours)) in self.inputs.iter().zip(expected.iter()).enumerate() {
            if echoed != ours {
                return Err(ProverError::InputMismatch { position });
            }
        }
        if self.inputs.len() != expected.len() {
            return Err(ProverError::InputMismatch {
                position: self.inputs.len().min(expected.len()),
            });
        }
        Ok(())
    }

    /// Contract calldata layout, big-endian: A.x A.y B.x.c1 B.x.c0 B.y.c1 B.y.c0 C.x C.y
    pub fn to_bytes(&self) -> Result<[u8; PROOF_BYTES], ProverError> {
        let a = self.points.a.to_affine("A")?;
        let b = self.points.b.to_affine("B")?;
        let c = self.points.c.to_affine("C")?;

        let words = [
            a.x, a.y, b.x.c1, b.x.c0, b.y.c1, b.y.c0, c.x, c.y,
        ];
        let mut bytes = [0u8; PROOF_BYTES];
        for (slot, word) in bytes.chunks_mut(COORDINATE_BYTES).zip(words.iter()) {
            slot.copy_from_slice(&fq_to_bytes(word));
        }
        Ok(bytes)
    }
}
