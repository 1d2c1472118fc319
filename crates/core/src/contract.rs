//! Shield contract interface
//!
//! The shield contract owns leaf-index allocation, the root history and the
//! nullifier set. Everything the engine learns about where a commitment
//! landed comes back in a [`Receipt`]; nothing is computed locally.
//!
//! Every call names its target explicitly through a [`ContractContext`].
//! [`ShieldDirectory`] resolves which contract an account talks to.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::TreeNames;
use crate::crypto::{AssetKind, AssetValue, NodeHash};
use crate::error::ContractError;
use crate::proof::{CircuitId, Proof, VerificationKey, VkId};

/// Who is calling which contract, on which tree
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractContext {
    /// Calling account on the public ledger
    pub account: String,
    /// Address of the shield contract
    pub contract_address: String,
    /// Tree name the mirror indexes this contract under
    pub tree: String,
}

/// Arguments of a shielding mint
#[derive(Clone, Debug)]
pub struct MintCall {
    pub proof: Proof,
    pub vk_id: VkId,
    /// Public value taken from the caller's account
    pub value: AssetValue,
    pub commitment: NodeHash,
}

/// Arguments of a transfer or batch transfer
#[derive(Clone, Debug)]
pub struct TransferCall {
    pub proof: Proof,
    pub vk_id: VkId,
    pub root: NodeHash,
    pub nullifiers: Vec<NodeHash>,
    pub commitments: Vec<NodeHash>,
}

/// Arguments of a burn
#[derive(Clone, Debug)]
pub struct BurnCall {
    pub proof: Proof,
    pub vk_id: VkId,
    pub root: NodeHash,
    pub nullifier: NodeHash,
    /// Public value released to `payee`
    pub value: AssetValue,
    pub payee: String,
}

/// A leaf appended by a transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafInsertion {
    pub leaf_index: u64,
    pub commitment: NodeHash,
}

/// Outcome of an accepted transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Block the transaction was mined in
    pub block_number: u64,
    /// Root after the transaction
    pub root: NodeHash,
    /// Leaves appended, in insertion order
    pub leaves: Vec<LeafInsertion>,
    /// Nullifiers recorded
    pub nullifiers: Vec<NodeHash>,
}

impl Receipt {
    /// Leaf index the contract assigned to `commitment`
    pub fn leaf_index_of(&self, commitment: &NodeHash) -> Option<u64> {
        self.leaves
            .iter()
            .find(|leaf| leaf.commitment == *commitment)
            .map(|leaf| leaf.leaf_index)
    }
}

/// The on-chain shield (registry) contract
#[async_trait]
pub trait ShieldContract: Send + Sync {
    /// Convert public value into a new commitment
    async fn mint(&self, ctx: &ContractContext, call: MintCall) -> Result<Receipt, ContractError>;

    /// Consume inputs and append outputs
    async fn transfer(&self, ctx: &ContractContext, call: TransferCall) -> Result<Receipt, ContractError>;

    /// One input fanned out to a fixed number of outputs
    async fn simple_batch_transfer(
        &self,
        ctx: &ContractContext,
        call: TransferCall,
    ) -> Result<Receipt, ContractError>;

    /// Consume an input and release its value publicly
    async fn burn(&self, ctx: &ContractContext, call: BurnCall) -> Result<Receipt, ContractError>;

    /// Whether `root` is in the contract's root history
    async fn is_known_root(&self, ctx: &ContractContext, root: &NodeHash) -> Result<bool, ContractError>;

    /// Ground-truth tree node at a heap index
    async fn merkle_tree_node(&self, ctx: &ContractContext, node_index: u64) -> Result<NodeHash, ContractError>;

    /// Register a circuit's verifying key, returning its id
    async fn register_verification_key(
        &self,
        ctx: &ContractContext,
        circuit: CircuitId,
        key: &VerificationKey,
    ) -> Result<VkId, ContractError>;
}

/// Which shield contract each account talks to
///
/// Defaults apply to everyone; an account may override them. Lookups are
/// pure, so concurrent flows for different accounts never interfere.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ShieldDirectory {
    defaults: HashMap<AssetKind, String>,
    overrides: HashMap<String, HashMap<AssetKind, String>>,
    trees: TreeNames,
}

impl ShieldDirectory {
    pub fn new(fungible: impl Into<String>, non_fungible: impl Into<String>, trees: TreeNames) -> Self {
        let mut defaults = HashMap::new();
        defaults.insert(AssetKind::Fungible, fungible.into());
        defaults.insert(AssetKind::NonFungible, non_fungible.into());
        Self {
            defaults,
            overrides: HashMap::new(),
            trees,
        }
    }

    /// Point `account` at a different contract for `asset`
    pub fn with_override(mut self, account: impl Into<String>, asset: AssetKind, address: impl Into<String>) -> Self {
        self.overrides
            .entry(account.into())
            .or_default()
            .insert(asset, address.into());
        self
    }

    /// Contract address `account` uses for `asset`
    pub fn address_for(&self, account: &str, asset: AssetKind) -> Option<&str> {
        self.overrides
            .get(account)
            .and_then(|per_asset| per_asset.get(&asset))
            .or_else(|| self.defaults.get(&asset))
            .map(String::as_str)
    }

    /// Full call context for `account` on `asset`
    pub fn context(&self, account: &str, asset: AssetKind) -> Result<ContractContext, ContractError> {
        let address = self
            .address_for(account, asset)
            .ok_or_else(|| ContractError::UnknownContract(format!("{:?} for {}", asset, account)))?;
        Ok(ContractContext {
            account: account.to_string(),
            contract_address: address.to_string(),
            tree: self.trees.for_asset(asset).to_string(),
        })
    }
}
