//! External prover adapter
//!
//! Proof generation is delegated to an external circuit compiler/prover
//! executable. Each proof runs in its own temporary work directory:
//!
//! 1. `compute-witness -i <circuit>/out -o witness -a <args...>`
//! 2. `generate-proof -i <circuit>/out -w witness -p <circuit>/proving.key -j proof.json`
//!
//! `proof.json` is parsed, its points checked on BN254, and its public-input
//! echo compared against the witness we supplied. A prover failure is never
//! retried.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};

use super::circuit::CircuitId;
use super::registry::VerificationKey;
use super::{Proof, ProofFile};
use crate::config::ProverConfig;
use crate::error::ProverError;
use crate::witness::WitnessVector;

/// Compiled circuit program inside a circuit's artifact directory
pub const PROGRAM_FILE: &str = "out";
/// Proving key inside a circuit's artifact directory
pub const PROVING_KEY_FILE: &str = "proving.key";
/// Verifying key inside a circuit's artifact directory
pub const VERIFICATION_KEY_FILE: &str = "verification.key";

const WITNESS_FILE: &str = "witness";
const PROOF_FILE: &str = "proof.json";

/// Produces proofs for a circuit given its witness
#[async_trait]
pub trait ProverAdapter: Send + Sync {
    async fn generate_proof(&self, circuit: CircuitId, witness: &WitnessVector) -> Result<Proof, ProverError>;

    /// The circuit's verifying key, for registration on-chain
    async fn verification_key(&self, circuit: CircuitId) -> Result<VerificationKey, ProverError>;
}

/// Runs the external prover as a subprocess
#[derive(Clone, Debug)]
pub struct SubprocessProver {
    config: ProverConfig,
}

impl SubprocessProver {
    pub fn new(config: ProverConfig) -> Self {
        Self { config }
    }

    fn circuit_dir(&self, circuit: CircuitId) -> PathBuf {
        self.config.artifacts_dir.join(circuit.name())
    }

    async fn require(path: PathBuf) -> Result<PathBuf, ProverError> {
        match tokio::fs::metadata(&path).await {
            Ok(_) => Ok(path),
            Err(_) => Err(ProverError::MissingArtifact(path)),
        }
    }

    /// Run one prover stage to completion
    async fn run_stage(&self, stage: &'static str, work_dir: &Path, args: Vec<String>) -> Result<String, ProverError> {
        debug!(stage, binary = %self.config.binary.display(), "Running prover stage");
        let output = Command::new(&self.config.binary)
            .arg(stage)
            .args(&args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{}{}", stdout, stderr);

        if !output.status.success() {
            error!(stage, status = ?output.status.code(), "Prover stage failed");
            return Err(ProverError::Failed {
                stage,
                status: output.status.code(),
                output: combined,
            });
        }
        if reports_failure(&combined) {
            error!(stage, "Prover stage reported an error");
            return Err(ProverError::FailureMarker { stage, output: combined });
        }
        Ok(combined)
    }

    async fn prove(&self, circuit: CircuitId, witness: &WitnessVector) -> Result<Proof, ProverError> {
        let dir = self.circuit_dir(circuit);
        let program = Self::require(dir.join(PROGRAM_FILE)).await?;
        let proving_key = Self::require(dir.join(PROVING_KEY_FILE)).await?;

        let work = tempfile::tempdir()?;
        let witness_path = work.path().join(WITNESS_FILE);
        let proof_path = work.path().join(PROOF_FILE);

        let mut args = vec![
            "-i".to_string(),
            program.display().to_string(),
            "-o".to_string(),
            witness_path.display().to_string(),
            "-a".to_string(),
        ];
        args.extend(witness.to_args());
        self.run_stage("compute-witness", work.path(), args).await?;

        let args = vec![
            "-i".to_string(),
            program.display().to_string(),
            "-w".to_string(),
            witness_path.display().to_string(),
            "-p".to_string(),
            proving_key.display().to_string(),
            "-j".to_string(),
            proof_path.display().to_string(),
        ];
        self.run_stage("generate-proof", work.path(), args).await?;

        let raw = tokio::fs::read_to_string(&proof_path)
            .await
            .map_err(|_| ProverError::MissingArtifact(proof_path.clone()))?;
        let file: ProofFile =
            serde_json::from_str(&raw).map_err(|e| ProverError::InvalidOutput(e.to_string()))?;
        let proof = file.into_proof()?;
        proof.check_inputs(witness.public_inputs())?;
        Ok(proof)
    }
}

#[async_trait]
impl ProverAdapter for SubprocessProver {
    async fn generate_proof(&self, circuit: CircuitId, witness: &WitnessVector) -> Result<Proof, ProverError> {
        let timeout: Duration = self.config.timeout();
        info!(%circuit, witness_len = witness.len(), "Generating proof");
        match tokio::time::timeout(timeout, self.prove(circuit, witness)).await {
            Ok(result) => result,
            Err(_) => {
                error!(%circuit, ?timeout, "Prover timed out");
                Err(ProverError::Timeout(timeout))
            }
        }
    }

    async fn verification_key(&self, circuit: CircuitId) -> Result<VerificationKey, ProverError> {
        let path = Self::require(self.circuit_dir(circuit).join(VERIFICATION_KEY_FILE)).await?;
        VerificationKey::load(&path).await
    }
}

/// A line starting with `Error:` (any case) marks a failed stage even on a zero exit
fn reports_failure(output: &str) -> bool {
    output
        .lines()
        .any(|line| line.trim_start().to_ascii_lowercase().starts_with("error:"))
}
