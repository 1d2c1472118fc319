//! Proof orchestration for shielded transactions
//!
//! An [`Engine`] bundles the collaborators every flow needs: the Merkle
//! mirror, the prover and configuration. A shield front end
//! ([`FungibleShield`], [`NonFungibleShield`]) adds one shield contract and
//! its registered verifying keys, and drives each transaction through
//! [`flow::Flow`]:
//!
//! 1. validate inputs locally (ownership, openings, value conservation)
//! 2. reconstruct and authenticate input paths
//! 3. encode the witness and run the prover
//! 4. submit, and read leaf indices back from the receipt
//!
//! Nothing is persisted between proving and submitting: a failed flow is
//! simply started again.

pub mod flow;
pub mod fungible;
pub mod non_fungible;

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::contract::{BurnCall, ContractContext, MintCall, Receipt, ShieldContract, TransferCall};
use crate::crypto::{AssetKind, AssetValue, Commitment, CommitmentStatus, NodeHash, PublicKey, SecretKey, SiblingPath};
use crate::error::{ContractError, ShieldError, ShieldResult};
use crate::mirror::{start_event_filter_with_retry, wait_for_block_height, HttpMirrorClient, MerkleMirror};
use crate::path::compute_authenticated_path;
use crate::proof::circuit::{burn_plan, mint_plan, transfer_plan, SpentInput};
use crate::proof::{CircuitId, Operation, Proof, ProverAdapter, SubprocessProver, VerifyingKeyRegistry};
use crate::transaction::{TransactionKind, TransactionRecord};
use crate::verifier::{check_correctness, CorrectnessClaim, CorrectnessReport};
use crate::witness::WitnessPlan;

pub use flow::{Flow, FlowState};
pub use fungible::FungibleShield;
pub use non_fungible::NonFungibleShield;

/// Shared collaborators for all shields
#[derive(Clone)]
pub struct Engine {
    mirror: Arc<dyn MerkleMirror>,
    prover: Arc<dyn ProverAdapter>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(mirror: Arc<dyn MerkleMirror>, prover: Arc<dyn ProverAdapter>, config: EngineConfig) -> Self {
        Self { mirror, prover, config }
    }

    /// Production wiring: HTTP mirror and subprocess prover
    pub fn from_config(config: EngineConfig) -> ShieldResult<Self> {
        config.validate()?;
        let mirror = HttpMirrorClient::new(&config.mirror)?;
        let prover = SubprocessProver::new(config.prover.clone());
        Ok(Self::new(Arc::new(mirror), Arc::new(prover), config))
    }

    pub fn mirror(&self) -> &Arc<dyn MerkleMirror> {
        &self.mirror
    }

    pub fn prover(&self) -> &Arc<dyn ProverAdapter> {
        &self.prover
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// A new output: who owns it and how much
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferOutput {
    pub owner: PublicKey,
    pub amount: u128,
}

#[derive(Clone, Debug)]
pub struct MintOutcome {
    /// The new commitment, indexed at the contract-assigned leaf
    pub commitment: Commitment,
    pub block_number: u64,
    pub record: TransactionRecord,
}

#[derive(Clone, Debug)]
pub struct TransferOutcome {
    pub spent: Vec<Commitment>,
    /// Outputs in request order, indexed at their contract-assigned leaves
    pub outputs: Vec<Commitment>,
    pub block_number: u64,
    pub record: TransactionRecord,
}

#[derive(Clone, Debug)]
pub struct BurnOutcome {
    pub spent: Commitment,
    pub block_number: u64,
    pub record: TransactionRecord,
}

/// One shield contract plus the engine
#[derive(Clone)]
pub(crate) struct ShieldCore {
    engine: Engine,
    contract: Arc<dyn ShieldContract>,
    registry: VerifyingKeyRegistry,
    asset: AssetKind,
}

impl ShieldCore {
    /// Start the mirror's event filter and register this asset's verifying keys
    pub(crate) async fn setup(
        engine: Engine,
        contract: Arc<dyn ShieldContract>,
        ctx: &ContractContext,
        asset: AssetKind,
    ) -> ShieldResult<Self> {
        let expected_tree = engine.config.trees.for_asset(asset);
        if ctx.tree != expected_tree {
            warn!(tree = %ctx.tree, expected = %expected_tree, "Context tree differs from configured tree");
        }

        start_event_filter_with_retry(engine.mirror.as_ref(), &ctx.tree, &engine.config.mirror.retry_policy())
            .await?;

        let circuits: Vec<CircuitId> = CircuitId::all().into_iter().filter(|c| c.asset == asset).collect();
        let registry =
            VerifyingKeyRegistry::setup(contract.as_ref(), ctx, engine.prover.as_ref(), &circuits).await?;

        Ok(Self::with_registry(engine, contract, registry, asset))
    }

    pub(crate) fn with_registry(
        engine: Engine,
        contract: Arc<dyn ShieldContract>,
        registry: VerifyingKeyRegistry,
        asset: AssetKind,
    ) -> Self {
        Self {
            engine,
            contract,
            registry,
            asset,
        }
    }

    pub(crate) fn circuit(&self, operation: Operation) -> CircuitId {
        CircuitId::new(self.asset, operation)
    }

    /// Inputs must be well-formed, indexed, unspent, distinct and owned by `secret`
    fn check_owned_inputs(&self, inputs: &[Commitment], secret: &SecretKey) -> ShieldResult<()> {
        let mut seen = HashSet::new();
        for input in inputs {
            if input.value.kind() != self.asset {
                return Err(ShieldError::InvalidInput(format!(
                    "input {} is not a {:?} commitment",
                    input.hash, self.asset
                )));
            }
            if !input.verify() {
                return Err(ShieldError::InvalidInput(format!(
                    "opening of {} does not hash to it",
                    input.hash
                )));
            }
            if !secret.owns(&input.owner_public_key) {
                return Err(ShieldError::NotOwner(input.hash));
            }
            match input.status {
                CommitmentStatus::Indexed { .. } => {}
                CommitmentStatus::Pending => {
                    return Err(ShieldError::InvalidInput(format!("input {} is not indexed yet", input.hash)))
                }
                CommitmentStatus::Spent { .. } => {
                    return Err(ShieldError::InvalidInput(format!("input {} is already spent", input.hash)))
                }
            }
            if !seen.insert(input.hash) {
                return Err(ShieldError::InvalidInput(format!("input {} given twice", input.hash)));
            }
        }
        Ok(())
    }

    /// Authenticated paths for every input, all against one root
    ///
    /// Waits first until the mirror has indexed the block of the most recently
    /// mined input, so a spend straight after a mint does not race the mirror.
    async fn resolve_paths(&self, ctx: &ContractContext, inputs: &[Commitment]) -> ShieldResult<(Vec<SiblingPath>, NodeHash)> {
        if let Some(target_block) = inputs.iter().filter_map(Commitment::mined_at).max() {
            let poll = self.engine.config.mirror.poll_policy();
            wait_for_block_height(self.engine.mirror.as_ref(), &ctx.tree, target_block, &poll).await?;
        }

        let attempts = self.engine.config.root_refetch_attempts + 1;
        let mut divergence = None;

        for attempt in 1..=attempts {
            let fetches = inputs.iter().map(|input| {
                let leaf_index = input.leaf_index().unwrap_or_default();
                compute_authenticated_path(
                    ctx,
                    self.contract.as_ref(),
                    self.engine.mirror.as_ref(),
                    &input.hash,
                    leaf_index,
                )
            });
            let paths = try_join_all(fetches).await?;

            let first = match paths.first() {
                Some(path) => path.root,
                None => return Err(ShieldError::InvalidInput("no inputs to spend".into())),
            };
            match paths.iter().find(|path| path.root != first) {
                None => return Ok((paths, first)),
                Some(other) => {
                    warn!(tree = %ctx.tree, attempt, first = %first, second = %other.root, "Input paths disagree on the root");
                    divergence = Some((first, other.root));
                }
            }
        }

        let (first, second) = divergence.unwrap_or_default();
        Err(ShieldError::RootDivergence { first, second })
    }

    /// Encode the witness, run the prover and check its echo
    async fn prove(&self, circuit: CircuitId, plan: &WitnessPlan) -> ShieldResult<Proof> {
        let witness = plan.encode()?;
        let proof = self.engine.prover.generate_proof(circuit, &witness).await?;
        proof.check_inputs(witness.public_inputs())?;
        Ok(proof)
    }

    /// Mark outputs with the leaf indices the contract assigned
    fn place_outputs(receipt: &Receipt, outputs: Vec<Commitment>) -> ShieldResult<Vec<Commitment>> {
        outputs
            .into_iter()
            .map(|output| match receipt.leaf_index_of(&output.hash) {
                Some(leaf_index) => Ok(output.indexed(leaf_index, receipt.block_number)),
                None => Err(ShieldError::ChainRejected(ContractError::Reverted(format!(
                    "receipt does not contain commitment {}",
                    output.hash
                )))),
            })
            .collect()
    }

    pub(crate) async fn mint(
        &self,
        ctx: &ContractContext,
        value: AssetValue,
        owner: PublicKey,
    ) -> ShieldResult<MintOutcome> {
        let mut flow = Flow::start(self.circuit(Operation::Mint));
        let result = self.run_mint(&mut flow, ctx, value, owner).await;
        flow.guard(result)
    }

    async fn run_mint(
        &self,
        flow: &mut Flow,
        ctx: &ContractContext,
        value: AssetValue,
        owner: PublicKey,
    ) -> ShieldResult<MintOutcome> {
        let commitment = Commitment::new_random(value, owner);

        flow.advance(FlowState::GeneratingProof)?;
        let circuit = flow.circuit();
        let proof = self.prove(circuit, &mint_plan(&commitment)).await?;
        let vk_id = self.registry.get(circuit)?;

        flow.advance(FlowState::SubmittingOnChain)?;
        let call = MintCall {
            proof,
            vk_id,
            value,
            commitment: commitment.hash,
        };
        let receipt = self.contract.mint(ctx, call).await?;
        let commitment = Self::place_outputs(&receipt, vec![commitment])?
            .pop()
            .ok_or_else(|| ShieldError::InvalidInput("mint produced no commitment".into()))?;

        flow.advance(FlowState::Done)?;
        info!(tree = %ctx.tree, leaf_index = ?commitment.leaf_index(), block = receipt.block_number, "Minted");
        let record = TransactionRecord::new(
            self.asset,
            receipt.block_number,
            TransactionKind::Minted {
                commitment: commitment.clone(),
            },
        );
        Ok(MintOutcome {
            commitment,
            block_number: receipt.block_number,
            record,
        })
    }

    /// Consume `inputs` into `outputs`. `operation` selects transfer or batch transfer.
    pub(crate) async fn spend(
        &self,
        ctx: &ContractContext,
        operation: Operation,
        secret: &SecretKey,
        inputs: &[Commitment],
        outputs: Vec<Commitment>,
    ) -> ShieldResult<TransferOutcome> {
        let mut flow = Flow::start(self.circuit(operation));
        let result = self.run_spend(&mut flow, ctx, secret, inputs, outputs).await;
        flow.guard(result)
    }

    async fn run_spend(
        &self,
        flow: &mut Flow,
        ctx: &ContractContext,
        secret: &SecretKey,
        inputs: &[Commitment],
        outputs: Vec<Commitment>,
    ) -> ShieldResult<TransferOutcome> {
        self.check_owned_inputs(inputs, secret)?;

        flow.advance(FlowState::AwaitingSiblingPaths)?;
        let (paths, root) = self.resolve_paths(ctx, inputs).await?;

        flow.advance(FlowState::GeneratingProof)?;
        let circuit = flow.circuit();
        let spent_inputs: Vec<SpentInput<'_>> = inputs
            .iter()
            .zip(paths.iter())
            .map(|(commitment, path)| SpentInput { commitment, path })
            .collect();
        let plan = transfer_plan(secret, &spent_inputs, &outputs, &root);
        let proof = self.prove(circuit, &plan).await?;
        let vk_id = self.registry.get(circuit)?;

        flow.advance(FlowState::SubmittingOnChain)?;
        let nullifiers: Vec<NodeHash> = inputs.iter().map(|input| input.nullifier(secret)).collect();
        let call = TransferCall {
            proof,
            vk_id,
            root,
            nullifiers: nullifiers.clone(),
            commitments: outputs.iter().map(|o| o.hash).collect(),
        };
        let receipt = match circuit.operation {
            Operation::BatchTransfer => self.contract.simple_batch_transfer(ctx, call).await?,
            _ => self.contract.transfer(ctx, call).await?,
        };
        let outputs = Self::place_outputs(&receipt, outputs)?;
        let spent: Vec<Commitment> = inputs.iter().cloned().map(Commitment::spent).collect();

        flow.advance(FlowState::Done)?;
        info!(
            tree = %ctx.tree,
            spent = spent.len(),
            created = outputs.len(),
            block = receipt.block_number,
            "Transferred"
        );
        let record = TransactionRecord::new(
            self.asset,
            receipt.block_number,
            TransactionKind::Transferred {
                spent: spent.clone(),
                outputs: outputs.clone(),
                nullifiers,
            },
        );
        Ok(TransferOutcome {
            spent,
            outputs,
            block_number: receipt.block_number,
            record,
        })
    }

    pub(crate) async fn burn(
        &self,
        ctx: &ContractContext,
        secret: &SecretKey,
        input: &Commitment,
        payee: &str,
    ) -> ShieldResult<BurnOutcome> {
        let mut flow = Flow::start(self.circuit(Operation::Burn));
        let result = self.run_burn(&mut flow, ctx, secret, input, payee).await;
        flow.guard(result)
    }

    async fn run_burn(
        &self,
        flow: &mut Flow,
        ctx: &ContractContext,
        secret: &SecretKey,
        input: &Commitment,
        payee: &str,
    ) -> ShieldResult<BurnOutcome> {
        crate::error::validation::validate_identifier(payee, "payee")?;
        self.check_owned_inputs(std::slice::from_ref(input), secret)?;

        flow.advance(FlowState::AwaitingSiblingPaths)?;
        let (mut paths, root) = self.resolve_paths(ctx, std::slice::from_ref(input)).await?;
        let path = paths
            .pop()
            .ok_or_else(|| ShieldError::InvalidInput("no path for burn input".into()))?;

        flow.advance(FlowState::GeneratingProof)?;
        let circuit = flow.circuit();
        let spent_input = SpentInput {
            commitment: input,
            path: &path,
        };
        let proof = self.prove(circuit, &burn_plan(secret, &spent_input, &root, payee)).await?;
        let vk_id = self.registry.get(circuit)?;

        flow.advance(FlowState::SubmittingOnChain)?;
        let nullifier = input.nullifier(secret);
        let call = BurnCall {
            proof,
            vk_id,
            root,
            nullifier,
            value: input.value,
            payee: payee.to_string(),
        };
        let receipt = self.contract.burn(ctx, call).await?;
        let spent = input.clone().spent();

        flow.advance(FlowState::Done)?;
        info!(tree = %ctx.tree, leaf_index = ?spent.leaf_index(), payee, block = receipt.block_number, "Burned");
        let record = TransactionRecord::new(
            self.asset,
            receipt.block_number,
            TransactionKind::Burned {
                spent: spent.clone(),
                nullifier,
                payee: payee.to_string(),
            },
        );
        Ok(BurnOutcome {
            spent,
            block_number: receipt.block_number,
            record,
        })
    }

    pub(crate) async fn check_correctness(
        &self,
        ctx: &ContractContext,
        claim: &CorrectnessClaim,
    ) -> ShieldResult<CorrectnessReport> {
        if claim.disclosed.value.kind() != self.asset {
            return Err(ShieldError::InvalidInput(format!(
                "claim is not a {:?} commitment",
                self.asset
            )));
        }
        check_correctness(
            ctx,
            self.contract.as_ref(),
            self.engine.mirror.as_ref(),
            &self.engine.config.mirror.poll_policy(),
            claim,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::crypto::{path_layout, ShieldTree};
    use crate::error::{MirrorError, ProverError};
    use crate::mirror::{LatestLeaf, MirrorLeaf, MirrorNode};
    use crate::proof::VerificationKey;
    use crate::testing::{context, FakeChain};
    use crate::witness::WitnessVector;

    /// Mirror that serves one leaf's path from an older snapshot of the tree
    struct StalePath {
        chain: Arc<FakeChain>,
        snapshot: ShieldTree,
        stale_leaf: u64,
        stale_reads: AtomicUsize,
    }

    #[async_trait]
    impl MerkleMirror for StalePath {
        async fn start_event_filter(&self, tree: &str) -> Result<(), MirrorError> {
            self.chain.start_event_filter(tree).await
        }
        async fn latest_leaf(&self, tree: &str) -> Result<LatestLeaf, MirrorError> {
            self.chain.latest_leaf(tree).await
        }
        async fn leaf_by_index(&self, tree: &str, leaf_index: u64) -> Result<MirrorLeaf, MirrorError> {
            self.chain.leaf_by_index(tree, leaf_index).await
        }
        async fn sibling_path(&self, tree: &str, leaf_index: u64) -> Result<Vec<MirrorNode>, MirrorError> {
            if leaf_index != self.stale_leaf {
                return self.chain.sibling_path(tree, leaf_index).await;
            }
            self.stale_reads.fetch_add(1, Ordering::SeqCst);
            Ok(path_layout(leaf_index)
                .into_iter()
                .map(|(node_index, _)| MirrorNode {
                    node_index,
                    value: self.snapshot.node(node_index),
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct CountingProver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProverAdapter for CountingProver {
        async fn generate_proof(&self, _circuit: CircuitId, _witness: &WitnessVector) -> Result<Proof, ProverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProverError::InvalidOutput("not proving in unit tests".into()))
        }

        async fn verification_key(&self, circuit: CircuitId) -> Result<VerificationKey, ProverError> {
            Err(ProverError::MissingArtifact(circuit.name().into()))
        }
    }

    fn owned(chain: &FakeChain, secret: &SecretKey, amount: u128) -> Commitment {
        let c = Commitment::new_random(AssetValue::Fungible(amount), secret.public_key());
        let (leaf_index, block) = chain.append(c.hash);
        c.indexed(leaf_index, block)
    }

    #[tokio::test]
    async fn test_inputs_on_different_roots_diverge() {
        let chain = Arc::new(FakeChain::new());
        let secret = SecretKey::random();
        let a = owned(&chain, &secret, 3);
        let b = owned(&chain, &secret, 4);
        let snapshot = chain.tree.lock().unwrap().clone();
        owned(&chain, &secret, 5);

        let mirror = Arc::new(StalePath {
            chain: Arc::clone(&chain),
            snapshot,
            stale_leaf: 1,
            stale_reads: AtomicUsize::new(0),
        });
        let prover = Arc::new(CountingProver::default());
        let config = EngineConfig::default();
        let attempts = config.root_refetch_attempts as usize + 1;
        let engine = Engine::new(mirror.clone(), prover.clone(), config);
        let core = ShieldCore::with_registry(
            engine,
            chain.clone(),
            VerifyingKeyRegistry::new(),
            AssetKind::Fungible,
        );

        let err = core
            .spend(&context(), Operation::Transfer, &secret, &[a, b], Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ShieldError::RootDivergence { first, second } if first != second));
        assert!(err.is_transient());
        assert_eq!(mirror.stale_reads.load(Ordering::SeqCst), attempts);
        assert_eq!(prover.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_inputs_on_one_root_reach_the_prover() {
        let chain = Arc::new(FakeChain::new());
        let secret = SecretKey::random();
        let a = owned(&chain, &secret, 3);
        let b = owned(&chain, &secret, 4);

        let prover = Arc::new(CountingProver::default());
        let engine = Engine::new(chain.clone(), prover.clone(), EngineConfig::default());
        let core = ShieldCore::with_registry(
            engine,
            chain.clone(),
            VerifyingKeyRegistry::new(),
            AssetKind::Fungible,
        );

        let err = core
            .spend(&context(), Operation::Transfer, &secret, &[a, b], Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ShieldError::Prover(ProverError::InvalidOutput(_))));
        assert_eq!(prover.calls.load(Ordering::SeqCst), 1);
    }
}
