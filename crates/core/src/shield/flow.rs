//! Per-transaction flow state machine
//!
//! ```text
//! PreparingInputs -> AwaitingSiblingPaths -> GeneratingProof -> SubmittingOnChain -> Done
//!        \_______________________________/
//!                  (mint skips paths)          any non-terminal state -> Failed
//! ```

use std::fmt;

use tracing::{info, warn};

use crate::error::{ShieldError, ShieldResult};
use crate::proof::{CircuitId, Operation};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowState {
    PreparingInputs,
    AwaitingSiblingPaths,
    GeneratingProof,
    SubmittingOnChain,
    Done,
    Failed(String),
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowState::Done | FlowState::Failed(_))
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowState::PreparingInputs => f.write_str("preparing-inputs"),
            FlowState::AwaitingSiblingPaths => f.write_str("awaiting-sibling-paths"),
            FlowState::GeneratingProof => f.write_str("generating-proof"),
            FlowState::SubmittingOnChain => f.write_str("submitting-on-chain"),
            FlowState::Done => f.write_str("done"),
            FlowState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Tracks one transaction through its stages
#[derive(Debug)]
pub struct Flow {
    circuit: CircuitId,
    state: FlowState,
}

impl Flow {
    pub fn start(circuit: CircuitId) -> Self {
        info!(%circuit, "Flow started");
        Self {
            circuit,
            state: FlowState::PreparingInputs,
        }
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn circuit(&self) -> CircuitId {
        self.circuit
    }

    fn allowed(&self, next: &FlowState) -> bool {
        let spends = self.circuit.operation != Operation::Mint;
        match (&self.state, next) {
            (from, FlowState::Failed(_)) => !from.is_terminal(),
            (FlowState::PreparingInputs, FlowState::AwaitingSiblingPaths) => spends,
            (FlowState::PreparingInputs, FlowState::GeneratingProof) => !spends,
            (FlowState::AwaitingSiblingPaths, FlowState::GeneratingProof) => true,
            (FlowState::GeneratingProof, FlowState::SubmittingOnChain) => true,
            (FlowState::SubmittingOnChain, FlowState::Done) => true,
            _ => false,
        }
    }

    /// Move to `next`, rejecting transitions the flow does not allow
    pub fn advance(&mut self, next: FlowState) -> ShieldResult<()> {
        if !self.allowed(&next) {
            return Err(ShieldError::InvalidInput(format!(
                "{} flow cannot move from {} to {}",
                self.circuit, self.state, next
            )));
        }
        info!(circuit = %self.circuit, from = %self.state, to = %next, "Flow transition");
        self.state = next;
        Ok(())
    }

    /// Record `err` as the terminal failure
    pub fn fail(&mut self, err: &ShieldError) {
        if self.state.is_terminal() {
            return;
        }
        warn!(circuit = %self.circuit, at = %self.state, error = %err, "Flow failed");
        self.state = FlowState::Failed(err.to_string());
    }

    /// Pass `result` through, failing the flow on error
    pub fn guard<T>(&mut self, result: ShieldResult<T>) -> ShieldResult<T> {
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }
}
