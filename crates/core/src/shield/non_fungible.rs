//! Non-fungible-token shield
//!
//! Value is a token id, truncated to node width before hashing. Transfers
//! are one-in / one-out and carry the same token id, so value is conserved
//! by construction. There is no batch transfer.

use std::sync::Arc;

use super::{BurnOutcome, Engine, MintOutcome, ShieldCore, TransferOutcome};
use crate::contract::{ContractContext, ShieldContract};
use crate::crypto::{AssetKind, AssetValue, Commitment, PublicKey, SecretKey, TokenId};
use crate::error::ShieldResult;
use crate::proof::{Operation, VerifyingKeyRegistry};
use crate::verifier::{CorrectnessClaim, CorrectnessReport};

/// Shielded non-fungible tokens on one shield contract
#[derive(Clone)]
pub struct NonFungibleShield {
    core: ShieldCore,
}

impl NonFungibleShield {
    /// Start the mirror's event filter and register the non-fungible verifying keys
    pub async fn setup(engine: Engine, contract: Arc<dyn ShieldContract>, ctx: &ContractContext) -> ShieldResult<Self> {
        let core = ShieldCore::setup(engine, contract, ctx, AssetKind::NonFungible).await?;
        Ok(Self { core })
    }

    pub fn with_registry(engine: Engine, contract: Arc<dyn ShieldContract>, registry: VerifyingKeyRegistry) -> Self {
        Self {
            core: ShieldCore::with_registry(engine, contract, registry, AssetKind::NonFungible),
        }
    }

    /// Shield a token the caller owns publicly into a commitment owned by `owner`
    pub async fn mint(&self, ctx: &ContractContext, token_id: TokenId, owner: PublicKey) -> ShieldResult<MintOutcome> {
        self.core.mint(ctx, AssetValue::NonFungible(token_id), owner).await
    }

    /// Hand the token in `input` to `receiver`
    pub async fn transfer(
        &self,
        ctx: &ContractContext,
        secret: &SecretKey,
        input: Commitment,
        receiver: PublicKey,
    ) -> ShieldResult<TransferOutcome> {
        let output = Commitment::new_random(input.value, receiver);
        self.core
            .spend(ctx, Operation::Transfer, secret, std::slice::from_ref(&input), vec![output])
            .await
    }

    /// Release the token in `input` to `payee` on the public ledger
    ///
    /// The spender's public key is always derived from `secret` and must match
    /// the owner recorded in `input`.
    pub async fn burn(
        &self,
        ctx: &ContractContext,
        secret: &SecretKey,
        input: &Commitment,
        payee: &str,
    ) -> ShieldResult<BurnOutcome> {
        self.core.burn(ctx, secret, input, payee).await
    }

    /// Check a non-fungible commitment a counterparty claims to have sent
    pub async fn check_correctness(&self, ctx: &ContractContext, claim: &CorrectnessClaim) -> ShieldResult<CorrectnessReport> {
        self.core.check_correctness(ctx, claim).await
    }
}
