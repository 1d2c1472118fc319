//! In-crate fakes for unit tests

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::contract::{BurnCall, ContractContext, MintCall, Receipt, ShieldContract, TransferCall};
use crate::crypto::{path_layout, NodeHash, ShieldTree};
use crate::error::{ContractError, MirrorError};
use crate::mirror::{LatestLeaf, MerkleMirror, MirrorLeaf, MirrorNode};
use crate::proof::{CircuitId, VerificationKey, VkId};

/// A tree shared by a fake mirror and a fake contract
pub struct FakeChain {
    pub tree: Mutex<ShieldTree>,
    pub roots: Mutex<HashSet<NodeHash>>,
    pub block: Mutex<u64>,
    /// Leaves the mirror reports instead of the real ones
    pub forged: Mutex<Vec<(u64, NodeHash)>>,
}

impl FakeChain {
    pub fn new() -> Self {
        let tree = ShieldTree::new();
        let mut roots = HashSet::new();
        roots.insert(tree.root());
        Self {
            tree: Mutex::new(tree),
            roots: Mutex::new(roots),
            block: Mutex::new(0),
            forged: Mutex::new(Vec::new()),
        }
    }

    /// Append a leaf in a new block, returning (leaf index, block)
    pub fn append(&self, leaf: NodeHash) -> (u64, u64) {
        let mut tree = self.tree.lock().unwrap();
        let index = tree.insert(leaf).unwrap();
        self.roots.lock().unwrap().insert(tree.root());
        let mut block = self.block.lock().unwrap();
        *block += 1;
        (index, *block)
    }

    pub fn forge(&self, leaf_index: u64, value: NodeHash) {
        self.forged.lock().unwrap().push((leaf_index, value));
    }
}

#[async_trait]
impl MerkleMirror for FakeChain {
    async fn start_event_filter(&self, _tree: &str) -> Result<(), MirrorError> {
        Ok(())
    }

    async fn latest_leaf(&self, _tree: &str) -> Result<LatestLeaf, MirrorError> {
        let tree = self.tree.lock().unwrap();
        Ok(LatestLeaf {
            block_number: *self.block.lock().unwrap(),
            leaf_index: tree.len().checked_sub(1),
        })
    }

    async fn leaf_by_index(&self, tree_name: &str, leaf_index: u64) -> Result<MirrorLeaf, MirrorError> {
        if let Some((_, value)) = self.forged.lock().unwrap().iter().find(|(i, _)| *i == leaf_index) {
            return Ok(MirrorLeaf {
                leaf_index,
                value: *value,
            });
        }
        let tree = self.tree.lock().unwrap();
        tree.leaf(leaf_index)
            .map(|value| MirrorLeaf { leaf_index, value })
            .ok_or(MirrorError::NotFound {
                tree: tree_name.to_string(),
                index: leaf_index,
            })
    }

    async fn sibling_path(&self, _tree: &str, leaf_index: u64) -> Result<Vec<MirrorNode>, MirrorError> {
        let tree = self.tree.lock().unwrap();
        Ok(path_layout(leaf_index)
            .into_iter()
            .map(|(node_index, _)| MirrorNode {
                node_index,
                value: tree.node(node_index),
            })
            .collect())
    }
}

#[async_trait]
impl ShieldContract for FakeChain {
    async fn mint(&self, _ctx: &ContractContext, _call: MintCall) -> Result<Receipt, ContractError> {
        Err(ContractError::Reverted("not supported".into()))
    }

    async fn transfer(&self, _ctx: &ContractContext, _call: TransferCall) -> Result<Receipt, ContractError> {
        Err(ContractError::Reverted("not supported".into()))
    }

    async fn simple_batch_transfer(
        &self,
        _ctx: &ContractContext,
        _call: TransferCall,
    ) -> Result<Receipt, ContractError> {
        Err(ContractError::Reverted("not supported".into()))
    }

    async fn burn(&self, _ctx: &ContractContext, _call: BurnCall) -> Result<Receipt, ContractError> {
        Err(ContractError::Reverted("not supported".into()))
    }

    async fn is_known_root(&self, _ctx: &ContractContext, root: &NodeHash) -> Result<bool, ContractError> {
        Ok(self.roots.lock().unwrap().contains(root))
    }

    async fn merkle_tree_node(&self, _ctx: &ContractContext, node_index: u64) -> Result<NodeHash, ContractError> {
        Ok(self.tree.lock().unwrap().node(node_index))
    }

    async fn register_verification_key(
        &self,
        _ctx: &ContractContext,
        _circuit: CircuitId,
        key: &VerificationKey,
    ) -> Result<VkId, ContractError> {
        Ok(VkId(key.digest()))
    }
}

pub fn context() -> ContractContext {
    ContractContext {
        account: "alice".to_string(),
        contract_address: "0xshield".to_string(),
        tree: "FTokenShield".to_string(),
    }
}
