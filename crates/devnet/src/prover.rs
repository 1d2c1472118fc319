//! Deterministic development prover
//!
//! Proof points are multiples of the BN254 generators by a scalar derived
//! from the circuit name and the public inputs. They are valid curve points,
//! so they pass every check the engine applies, and the local contract can
//! recompute them to "verify" a proof. They prove nothing.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use ark_bn254::{Fr, G1Affine, G2Affine};
use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::PrimeField;
use async_trait::async_trait;
use tracing::{debug, warn};

use mantle_core::crypto::concatenate_then_hash;
use mantle_core::error::ProverError;
use mantle_core::proof::{G1Point, G2Point, ProofPoints, VerificationKey};
use mantle_core::{CircuitId, Proof, ProverAdapter, WitnessVector};

fn scalar(circuit: CircuitId, inputs: &[u128]) -> Fr {
    let name = circuit.name();
    let words: Vec<[u8; 16]> = inputs.iter().map(|input| input.to_be_bytes()).collect();
    let mut parts: Vec<&[u8]> = vec![name.as_bytes()];
    parts.extend(words.iter().map(|w| w.as_slice()));
    let digest = concatenate_then_hash(&parts);
    // never zero, so no point lands at infinity
    Fr::from_be_bytes_mod_order(digest.as_bytes()) + Fr::from(1u64)
}

/// The points a proof for `circuit` over `inputs` must carry
pub fn dev_proof_points(circuit: CircuitId, inputs: &[u128]) -> ProofPoints {
    let s = scalar(circuit, inputs);
    let a = (G1Affine::generator() * s).into_affine();
    let b = (G2Affine::generator() * (s + Fr::from(1u64))).into_affine();
    let c = (G1Affine::generator() * (s + Fr::from(2u64))).into_affine();
    ProofPoints {
        a: G1Point::from_affine(&a),
        b: G2Point::from_affine(&b),
        c: G1Point::from_affine(&c),
    }
}

/// Synthetic verifying key, distinct per circuit
pub fn dev_verification_key(circuit: CircuitId) -> VerificationKey {
    let point = G1Point::from_affine(&(G1Affine::generator() * scalar(circuit, &[])).into_affine());
    let [x, y] = point.0;
    VerificationKey {
        words: vec![circuit.name(), x, y],
    }
}

/// In-process [`ProverAdapter`]
#[derive(Debug, Default)]
pub struct DevProver {
    calls: AtomicUsize,
    failures: AtomicUsize,
}

impl DevProver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `generate_proof` calls so far, failed ones included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make the next `count` proofs fail
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ProverAdapter for DevProver {
    async fn generate_proof(&self, circuit: CircuitId, witness: &WitnessVector) -> Result<Proof, ProverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !circuit.is_supported() {
            return Err(ProverError::MissingArtifact(PathBuf::from(circuit.name())));
        }
        if self.take_failure() {
            warn!(%circuit, "Injected prover failure");
            return Err(ProverError::Failed {
                stage: "generate-proof",
                status: Some(1),
                output: "injected failure".to_string(),
            });
        }

        let inputs = witness.public_inputs().to_vec();
        debug!(%circuit, witness_len = witness.len(), public = inputs.len(), "Dev proof");
        Proof::new(dev_proof_points(circuit, &inputs), inputs)
    }

    async fn verification_key(&self, circuit: CircuitId) -> Result<VerificationKey, ProverError> {
        if !circuit.is_supported() {
            return Err(ProverError::MissingArtifact(PathBuf::from(circuit.name())));
        }
        Ok(dev_verification_key(circuit))
    }
}
