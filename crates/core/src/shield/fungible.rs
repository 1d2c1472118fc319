//! Fungible-token shield
//!
//! Value is a 128-bit amount. Transfers are two-in / two-out (receiver
//! amount plus change); batch transfers fan one input out to
//! [`BATCH_OUTPUTS`] outputs. Every spend must conserve value, which is
//! checked before the prover is ever started.

use std::sync::Arc;

use super::{BurnOutcome, Engine, MintOutcome, ShieldCore, TransferOutcome, TransferOutput};
use crate::contract::{ContractContext, ShieldContract};
use crate::crypto::{AssetKind, AssetValue, Commitment, PublicKey, SecretKey};
use crate::error::validation::ensure_conserved;
use crate::error::{ShieldError, ShieldResult};
use crate::proof::circuit::BATCH_OUTPUTS;
use crate::proof::{Operation, VerifyingKeyRegistry};
use crate::verifier::{CorrectnessClaim, CorrectnessReport};

/// Inputs and outputs of a fungible transfer
pub const TRANSFER_INPUTS: usize = 2;
pub const TRANSFER_OUTPUTS: usize = 2;

/// Shielded fungible tokens on one shield contract
#[derive(Clone)]
pub struct FungibleShield {
    core: ShieldCore,
}

fn amounts(commitments: &[Commitment]) -> ShieldResult<Vec<u128>> {
    commitments
        .iter()
        .map(|c| {
            c.value
                .amount()
                .ok_or_else(|| ShieldError::InvalidInput(format!("input {} is not fungible", c.hash)))
        })
        .collect()
}

fn outputs_to_commitments(outputs: &[TransferOutput]) -> Vec<Commitment> {
    outputs
        .iter()
        .map(|o| Commitment::new_random(AssetValue::Fungible(o.amount), o.owner))
        .collect()
}

impl FungibleShield {
    /// Start the mirror's event filter and register the fungible verifying keys
    pub async fn setup(engine: Engine, contract: Arc<dyn ShieldContract>, ctx: &ContractContext) -> ShieldResult<Self> {
        let core = ShieldCore::setup(engine, contract, ctx, AssetKind::Fungible).await?;
        Ok(Self { core })
    }

    /// Use keys registered earlier
    pub fn with_registry(engine: Engine, contract: Arc<dyn ShieldContract>, registry: VerifyingKeyRegistry) -> Self {
        Self {
            core: ShieldCore::with_registry(engine, contract, registry, AssetKind::Fungible),
        }
    }

    /// Shield `amount` of the caller's public balance into a commitment owned by `owner`
    pub async fn mint(&self, ctx: &ContractContext, amount: u128, owner: PublicKey) -> ShieldResult<MintOutcome> {
        self.core.mint(ctx, AssetValue::Fungible(amount), owner).await
    }

    /// Spend two commitments into a receiver output and a change output
    pub async fn transfer(
        &self,
        ctx: &ContractContext,
        secret: &SecretKey,
        inputs: [Commitment; TRANSFER_INPUTS],
        outputs: [TransferOutput; TRANSFER_OUTPUTS],
    ) -> ShieldResult<TransferOutcome> {
        ensure_conserved(&amounts(&inputs)?, &outputs.iter().map(|o| o.amount).collect::<Vec<_>>())?;
        let outputs = outputs_to_commitments(&outputs);
        self.core
            .spend(ctx, Operation::Transfer, secret, &inputs, outputs)
            .await
    }

    /// Pay `amount` to `receiver` from two inputs, returning the rest to the sender
    pub async fn send(
        &self,
        ctx: &ContractContext,
        secret: &SecretKey,
        inputs: [Commitment; TRANSFER_INPUTS],
        receiver: PublicKey,
        amount: u128,
    ) -> ShieldResult<TransferOutcome> {
        let total = crate::error::validation::checked_sum(amounts(&inputs)?)?;
        let change = total.checked_sub(amount).ok_or(ShieldError::ValueMismatch {
            inputs: total,
            outputs: amount,
        })?;
        let outputs = [
            TransferOutput {
                owner: receiver,
                amount,
            },
            TransferOutput {
                owner: secret.public_key(),
                amount: change,
            },
        ];
        self.transfer(ctx, secret, inputs, outputs).await
    }

    /// Spend one commitment into up to [`BATCH_OUTPUTS`] outputs
    ///
    /// Unused output slots are filled with zero-value commitments owned by
    /// the sender.
    pub async fn batch_transfer(
        &self,
        ctx: &ContractContext,
        secret: &SecretKey,
        input: Commitment,
        outputs: &[TransferOutput],
    ) -> ShieldResult<TransferOutcome> {
        if outputs.len() > BATCH_OUTPUTS {
            return Err(ShieldError::InvalidInput(format!(
                "batch transfer takes at most {} outputs, got {}",
                BATCH_OUTPUTS,
                outputs.len()
            )));
        }
        let requested: Vec<u128> = outputs.iter().map(|o| o.amount).collect();
        ensure_conserved(&amounts(std::slice::from_ref(&input))?, &requested)?;

        let sender = secret.public_key();
        let mut padded = outputs.to_vec();
        padded.resize(BATCH_OUTPUTS, TransferOutput { owner: sender, amount: 0 });

        self.core
            .spend(
                ctx,
                Operation::BatchTransfer,
                secret,
                std::slice::from_ref(&input),
                outputs_to_commitments(&padded),
            )
            .await
    }

    /// Spend a commitment, releasing its amount to `payee` on the public ledger
    pub async fn burn(
        &self,
        ctx: &ContractContext,
        secret: &SecretKey,
        input: &Commitment,
        payee: &str,
    ) -> ShieldResult<BurnOutcome> {
        self.core.burn(ctx, secret, input, payee).await
    }

    /// Check a fungible commitment a counterparty claims to have sent
    pub async fn check_correctness(&self, ctx: &ContractContext, claim: &CorrectnessClaim) -> ShieldResult<CorrectnessReport> {
        self.core.check_correctness(ctx, claim).await
    }
}
