//! In-memory shield contract
//!
//! Holds one tree and enforces what the chain would:
//! - the calling context names this contract
//! - proofs name a registered key for the right circuit
//! - public inputs are rebuilt from the call and must match the proof
//! - roots are in history, nullifiers unspent, commitments new
//!
//! Every accepted transaction is mined in its own block and logged as leaf
//! events for [`crate::LocalMirror`] to replay.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use mantle_core::contract::{BurnCall, LeafInsertion, MintCall, Receipt, TransferCall};
use mantle_core::crypto::{AssetKind, AssetValue, MerkleError, NodeHash, ShieldTree, TokenId};
use mantle_core::error::ContractError;
use mantle_core::proof::circuit::{burn_public, mint_public, public_inputs, spend_public, BATCH_OUTPUTS};
use mantle_core::proof::{VerificationKey, VkId};
use mantle_core::shield::fungible::{TRANSFER_INPUTS, TRANSFER_OUTPUTS};
use mantle_core::witness::Element;
use mantle_core::{CircuitId, ContractContext, Operation, Proof, ShieldContract};

use crate::prover::dev_proof_points;

/// A leaf appended in a mined block
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafEvent {
    pub block_number: u64,
    pub leaf_index: u64,
    pub commitment: NodeHash,
}

#[derive(Debug)]
struct ContractState {
    tree: ShieldTree,
    roots: HashSet<NodeHash>,
    nullifiers: HashSet<NodeHash>,
    commitments: HashSet<NodeHash>,
    events: Vec<LeafEvent>,
    block_number: u64,
    keys: HashMap<VkId, CircuitId>,
    balances: HashMap<String, u128>,
    /// Public owner of each token outside the shield
    tokens: HashMap<TokenId, String>,
    /// Tokens held by the shield
    escrow: HashSet<TokenId>,
}

impl ContractState {
    fn new() -> Self {
        let tree = ShieldTree::new();
        let mut roots = HashSet::new();
        roots.insert(tree.root());
        Self {
            tree,
            roots,
            nullifiers: HashSet::new(),
            commitments: HashSet::new(),
            events: Vec::new(),
            block_number: 0,
            keys: HashMap::new(),
            balances: HashMap::new(),
            tokens: HashMap::new(),
            escrow: HashSet::new(),
        }
    }

    fn check_key(&self, vk_id: &VkId, circuit: CircuitId) -> Result<(), ContractError> {
        match self.keys.get(vk_id) {
            None => Err(ContractError::UnknownVerificationKey(*vk_id)),
            Some(registered) if *registered != circuit => Err(ContractError::Reverted(format!(
                "key {} verifies {}, not {}",
                vk_id, registered, circuit
            ))),
            Some(_) => Ok(()),
        }
    }

    fn check_root(&self, root: &NodeHash) -> Result<(), ContractError> {
        if !self.roots.contains(root) {
            return Err(ContractError::UnknownRoot(*root));
        }
        Ok(())
    }

    fn check_nullifiers(&self, nullifiers: &[NodeHash]) -> Result<(), ContractError> {
        let mut seen = HashSet::new();
        for nullifier in nullifiers {
            if self.nullifiers.contains(nullifier) || !seen.insert(nullifier) {
                return Err(ContractError::NullifierSpent(*nullifier));
            }
        }
        Ok(())
    }

    fn check_commitments(&self, commitments: &[NodeHash]) -> Result<(), ContractError> {
        let mut seen = HashSet::new();
        for commitment in commitments {
            if self.commitments.contains(commitment) || !seen.insert(commitment) {
                return Err(ContractError::CommitmentExists(*commitment));
            }
        }
        let free = mantle_core::crypto::MAX_LEAVES - self.tree.len();
        if (commitments.len() as u64) > free {
            return Err(ContractError::TreeFull);
        }
        Ok(())
    }

    /// Mine a block: append leaves, record nullifiers, extend the root history
    fn mine(&mut self, commitments: &[NodeHash], nullifiers: &[NodeHash]) -> Result<Receipt, ContractError> {
        self.block_number += 1;
        let mut leaves = Vec::with_capacity(commitments.len());
        for commitment in commitments {
            let leaf_index = self.tree.insert(*commitment).map_err(|e| match e {
                MerkleError::TreeFull => ContractError::TreeFull,
                other => ContractError::Reverted(other.to_string()),
            })?;
            self.commitments.insert(*commitment);
            self.roots.insert(self.tree.root());
            self.events.push(LeafEvent {
                block_number: self.block_number,
                leaf_index,
                commitment: *commitment,
            });
            leaves.push(LeafInsertion {
                leaf_index,
                commitment: *commitment,
            });
        }
        self.nullifiers.extend(nullifiers.iter().copied());
        Ok(Receipt {
            block_number: self.block_number,
            root: self.tree.root(),
            leaves,
            nullifiers: nullifiers.to_vec(),
        })
    }
}

/// Check the proof against public inputs rebuilt from the call
fn verify_proof(circuit: CircuitId, proof: &Proof, public: &[Element]) -> Result<(), ContractError> {
    let expected = public_inputs(public).map_err(|e| ContractError::Reverted(e.to_string()))?;
    if proof.inputs != expected {
        return Err(ContractError::Reverted(format!("public inputs do not match {} call", circuit)));
    }
    if proof.points != dev_proof_points(circuit, &expected) {
        return Err(ContractError::Reverted(format!("invalid {} proof", circuit)));
    }
    Ok(())
}

/// One shield contract for one asset kind
#[derive(Debug)]
pub struct LocalShieldContract {
    address: String,
    tree_name: String,
    asset: AssetKind,
    state: Mutex<ContractState>,
}

impl LocalShieldContract {
    pub fn new(address: impl Into<String>, tree_name: impl Into<String>, asset: AssetKind) -> Self {
        Self {
            address: address.into(),
            tree_name: tree_name.into(),
            asset,
            state: Mutex::new(ContractState::new()),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn tree_name(&self) -> &str {
        &self.tree_name
    }

    pub fn asset(&self) -> AssetKind {
        self.asset
    }

    /// Latest mined block
    pub fn block_number(&self) -> u64 {
        self.state.lock().block_number
    }

    pub fn root(&self) -> NodeHash {
        self.state.lock().tree.root()
    }

    pub fn leaf_count(&self) -> u64 {
        self.state.lock().tree.len()
    }

    /// Leaf events from position `from` in the log onwards
    pub fn events_since(&self, from: usize) -> Vec<LeafEvent> {
        self.log_since(from).1
    }

    /// Latest block and the events logged after `from`, read together
    pub fn log_since(&self, from: usize) -> (u64, Vec<LeafEvent>) {
        let state = self.state.lock();
        let events = state.events.get(from..).map(<[LeafEvent]>::to_vec).unwrap_or_default();
        (state.block_number, events)
    }

    pub fn is_spent(&self, nullifier: &NodeHash) -> bool {
        self.state.lock().nullifiers.contains(nullifier)
    }

    /// Add to an account's public balance
    pub fn credit(&self, account: &str, amount: u128) {
        let mut state = self.state.lock();
        let balance = state.balances.entry(account.to_string()).or_default();
        *balance = balance.saturating_add(amount);
    }

    pub fn balance_of(&self, account: &str) -> u128 {
        self.state.lock().balances.get(account).copied().unwrap_or_default()
    }

    /// Issue a public token to `account`
    pub fn issue_token(&self, account: &str, token_id: TokenId) {
        self.state.lock().tokens.insert(token_id, account.to_string());
    }

    /// Public owner of a token, `None` while it is shielded
    pub fn token_owner(&self, token_id: &TokenId) -> Option<String> {
        self.state.lock().tokens.get(token_id).cloned()
    }

    fn check_context(&self, ctx: &ContractContext) -> Result<(), ContractError> {
        if ctx.contract_address != self.address {
            return Err(ContractError::UnknownContract(ctx.contract_address.clone()));
        }
        Ok(())
    }

    fn check_asset(&self, value: &AssetValue) -> Result<(), ContractError> {
        if value.kind() != self.asset {
            return Err(ContractError::Reverted(format!(
                "{:?} value sent to a {:?} shield",
                value.kind(),
                self.asset
            )));
        }
        Ok(())
    }

    fn circuit(&self, operation: Operation) -> CircuitId {
        CircuitId::new(self.asset, operation)
    }

    /// Number of (inputs, outputs) a spend circuit takes
    fn spend_shape(&self, operation: Operation) -> (usize, usize) {
        match (self.asset, operation) {
            (AssetKind::Fungible, Operation::BatchTransfer) => (1, BATCH_OUTPUTS),
            (AssetKind::Fungible, _) => (TRANSFER_INPUTS, TRANSFER_OUTPUTS),
            (AssetKind::NonFungible, _) => (1, 1),
        }
    }

    fn spend(&self, ctx: &ContractContext, operation: Operation, call: TransferCall) -> Result<Receipt, ContractError> {
        self.check_context(ctx)?;
        let circuit = self.circuit(operation);
        if !circuit.is_supported() {
            return Err(ContractError::Reverted(format!("{} is not supported", circuit)));
        }
        let (inputs, outputs) = self.spend_shape(operation);
        if call.nullifiers.len() != inputs || call.commitments.len() != outputs {
            return Err(ContractError::Reverted(format!(
                "{} takes {} inputs and {} outputs, got {} and {}",
                circuit,
                inputs,
                outputs,
                call.nullifiers.len(),
                call.commitments.len()
            )));
        }

        let mut state = self.state.lock();
        state.check_key(&call.vk_id, circuit)?;
        verify_proof(circuit, &call.proof, &spend_public(&call.root, &call.nullifiers, &call.commitments))?;
        state.check_root(&call.root)?;
        state.check_nullifiers(&call.nullifiers)?;
        state.check_commitments(&call.commitments)?;

        let receipt = state.mine(&call.commitments, &call.nullifiers)?;
        info!(
            contract = %self.address,
            %circuit,
            block = receipt.block_number,
            leaves = receipt.leaves.len(),
            "Spend mined"
        );
        Ok(receipt)
    }
}

#[async_trait]
impl ShieldContract for LocalShieldContract {
    async fn mint(&self, ctx: &ContractContext, call: MintCall) -> Result<Receipt, ContractError> {
        self.check_context(ctx)?;
        self.check_asset(&call.value)?;
        let circuit = self.circuit(Operation::Mint);

        let mut state = self.state.lock();
        state.check_key(&call.vk_id, circuit)?;
        verify_proof(circuit, &call.proof, &mint_public(&call.value, &call.commitment))?;
        state.check_commitments(std::slice::from_ref(&call.commitment))?;

        match call.value {
            AssetValue::Fungible(amount) => {
                let balance = state.balances.get(&ctx.account).copied().unwrap_or_default();
                let rest = balance.checked_sub(amount).ok_or_else(|| {
                    ContractError::Reverted(format!("{} holds {} and cannot shield {}", ctx.account, balance, amount))
                })?;
                state.balances.insert(ctx.account.clone(), rest);
            }
            AssetValue::NonFungible(token_id) => {
                if state.tokens.get(&token_id) != Some(&ctx.account) {
                    return Err(ContractError::Reverted(format!("{} does not own token {}", ctx.account, token_id)));
                }
                state.tokens.remove(&token_id);
                state.escrow.insert(token_id);
            }
        }

        let receipt = state.mine(std::slice::from_ref(&call.commitment), &[])?;
        info!(contract = %self.address, block = receipt.block_number, commitment = %call.commitment, "Mint mined");
        Ok(receipt)
    }

    async fn transfer(&self, ctx: &ContractContext, call: TransferCall) -> Result<Receipt, ContractError> {
        self.spend(ctx, Operation::Transfer, call)
    }

    async fn simple_batch_transfer(&self, ctx: &ContractContext, call: TransferCall) -> Result<Receipt, ContractError> {
        self.spend(ctx, Operation::BatchTransfer, call)
    }

    async fn burn(&self, ctx: &ContractContext, call: BurnCall) -> Result<Receipt, ContractError> {
        self.check_context(ctx)?;
        self.check_asset(&call.value)?;
        let circuit = self.circuit(Operation::Burn);

        let mut state = self.state.lock();
        state.check_key(&call.vk_id, circuit)?;
        verify_proof(
            circuit,
            &call.proof,
            &burn_public(&call.root, &call.nullifier, &call.value, &call.payee),
        )?;
        state.check_root(&call.root)?;
        state.check_nullifiers(std::slice::from_ref(&call.nullifier))?;

        match call.value {
            AssetValue::Fungible(amount) => {
                let balance = state.balances.entry(call.payee.clone()).or_default();
                *balance = balance.saturating_add(amount);
            }
            AssetValue::NonFungible(token_id) => {
                if !state.escrow.remove(&token_id) {
                    warn!(contract = %self.address, %token_id, "Burning a token the shield never held");
                }
                state.tokens.insert(token_id, call.payee.clone());
            }
        }

        let receipt = state.mine(&[], std::slice::from_ref(&call.nullifier))?;
        info!(contract = %self.address, block = receipt.block_number, payee = %call.payee, "Burn mined");
        Ok(receipt)
    }

    async fn is_known_root(&self, ctx: &ContractContext, root: &NodeHash) -> Result<bool, ContractError> {
        self.check_context(ctx)?;
        Ok(self.state.lock().roots.contains(root))
    }

    async fn merkle_tree_node(&self, ctx: &ContractContext, node_index: u64) -> Result<NodeHash, ContractError> {
        self.check_context(ctx)?;
        Ok(self.state.lock().tree.node(node_index))
    }

    async fn register_verification_key(
        &self,
        ctx: &ContractContext,
        circuit: CircuitId,
        key: &VerificationKey,
    ) -> Result<VkId, ContractError> {
        self.check_context(ctx)?;
        if circuit.asset != self.asset {
            return Err(ContractError::Reverted(format!("{} does not belong on a {:?} shield", circuit, self.asset)));
        }
        let id = VkId(key.digest());
        self.state.lock().keys.insert(id, circuit);
        Ok(id)
    }
}
