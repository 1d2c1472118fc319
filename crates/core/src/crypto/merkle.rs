//! Append-only shield tree and sibling paths
//!
//! Nodes are addressed as a heap: the root is node 0 and the children of node
//! `i` are `2i + 1` (left) and `2i + 2` (right). Leaf `n` therefore lives at
//! node `n + 2^TREE_HEIGHT - 1`. An odd node index is a left child, an even
//! one (other than the root) a right child.
//!
//! Tree Structure:
//! - Height: 32 levels (2^32 leaves)
//! - Node hash: truncated SHA-256 of `left || right`
//! - Empty subtrees hash to precomputed zero values, so only touched nodes
//!   are stored

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::hash::{hash_pair, NodeHash};

/// Merkle tree height
pub const TREE_HEIGHT: usize = 32;

/// Maximum number of leaves
pub const MAX_LEAVES: u64 = 1 << TREE_HEIGHT;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("Tree is full")]
    TreeFull,
    #[error("Invalid leaf index: {0}")]
    InvalidLeafIndex(u64),
    #[error("Invalid path length: expected {expected}, got {got}")]
    InvalidPathLength { expected: usize, got: usize },
}

/// Zero hashes per level: zeros[0] is the empty leaf,
/// zeros[i] = hash(zeros[i-1], zeros[i-1])
pub fn zero_hashes() -> &'static [NodeHash; TREE_HEIGHT + 1] {
    static ZEROS: OnceLock<[NodeHash; TREE_HEIGHT + 1]> = OnceLock::new();
    ZEROS.get_or_init(|| {
        let mut zeros = [NodeHash::ZERO; TREE_HEIGHT + 1];
        for i in 1..=TREE_HEIGHT {
            zeros[i] = hash_pair(&zeros[i - 1], &zeros[i - 1]);
        }
        zeros
    })
}

/// Heap index of a leaf
pub fn leaf_node_index(leaf_index: u64) -> u64 {
    leaf_index + (MAX_LEAVES - 1)
}

/// Level of a node counted from the leaves (leaves are level 0, root is TREE_HEIGHT)
pub fn node_level(node_index: u64) -> usize {
    let depth = 63 - (node_index + 1).leading_zeros() as usize;
    TREE_HEIGHT - depth
}

/// Side on which a node's sibling sits
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Sibling is the left child (bit 0)
    Left,
    /// Sibling is the right child (bit 1)
    Right,
}

impl Side {
    pub fn bit(&self) -> u8 {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }
}

/// One step up the tree: the sibling's node index, which side it sits on,
/// and the parent index. `None` at the root.
pub fn step_up(node_index: u64) -> Option<(u64, Side, u64)> {
    if node_index == 0 {
        return None;
    }
    if node_index % 2 == 0 {
        Some((node_index - 1, Side::Left, (node_index - 1) / 2))
    } else {
        Some((node_index + 1, Side::Right, node_index / 2))
    }
}

/// Sibling node indices and sides from a leaf up to (excluding) the root
pub fn path_layout(leaf_index: u64) -> Vec<(u64, Side)> {
    let mut layout = Vec::with_capacity(TREE_HEIGHT);
    let mut node = leaf_node_index(leaf_index);
    while let Some((sibling, side, parent)) = step_up(node) {
        layout.push((sibling, side));
        node = parent;
    }
    layout
}

/// Hash a node with its sibling on the recorded side
fn combine(current: &NodeHash, sibling: &NodeHash, side: Side) -> NodeHash {
    match side {
        Side::Left => hash_pair(sibling, current),
        Side::Right => hash_pair(current, sibling),
    }
}

/// Authenticated path from a leaf to the root
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiblingPath {
    /// The leaf index
    pub leaf_index: u64,
    /// Sibling hashes from leaf to root
    pub siblings: Vec<NodeHash>,
    /// Side of each sibling, leaf level first
    pub positions: Vec<Side>,
    /// Root the path resolves to
    pub root: NodeHash,
}

impl SiblingPath {
    /// Assemble a path, computing the root it resolves to from `leaf`
    pub fn from_siblings(leaf: &NodeHash, leaf_index: u64, siblings: Vec<NodeHash>) -> Result<Self, MerkleError> {
        if leaf_index >= MAX_LEAVES {
            return Err(MerkleError::InvalidLeafIndex(leaf_index));
        }
        if siblings.len() != TREE_HEIGHT {
            return Err(MerkleError::InvalidPathLength {
                expected: TREE_HEIGHT,
                got: siblings.len(),
            });
        }
        let positions: Vec<Side> = path_layout(leaf_index).into_iter().map(|(_, side)| side).collect();
        let root = fold_root(leaf, &siblings, &positions);
        Ok(Self {
            leaf_index,
            siblings,
            positions,
            root,
        })
    }

    /// Re-hash `leaf` along the path
    pub fn compute_root(&self, leaf: &NodeHash) -> NodeHash {
        fold_root(leaf, &self.siblings, &self.positions)
    }

    /// Verify the path leads from `leaf` to `expected_root`
    pub fn verify(&self, leaf: &NodeHash, expected_root: &NodeHash) -> bool {
        if self.siblings.len() != TREE_HEIGHT || self.positions.len() != TREE_HEIGHT {
            return false;
        }
        self.compute_root(leaf) == *expected_root
    }

    /// Packed bit-string, leaf level first ("0" = sibling left, "1" = sibling right)
    pub fn positions_bits(&self) -> String {
        self.positions
            .iter()
            .map(|side| if side.bit() == 1 { '1' } else { '0' })
            .collect()
    }

    /// Positions packed into an integer: bit r is the side at level r
    pub fn positions_packed(&self) -> u64 {
        self.positions
            .iter()
            .enumerate()
            .fold(0u64, |acc, (level, side)| acc | (u64::from(side.bit()) << level))
    }

    /// [`SiblingPath::positions_packed`] as fixed-width hex
    pub fn positions_hex(&self) -> String {
        format!("0x{:08x}", self.positions_packed())
    }
}

fn fold_root(leaf: &NodeHash, siblings: &[NodeHash], positions: &[Side]) -> NodeHash {
    siblings
        .iter()
        .zip(positions.iter())
        .fold(*leaf, |current, (sibling, side)| combine(&current, sibling, *side))
}

/// Verify a Merkle proof given only the leaf index
pub fn verify_merkle_proof(leaf: &NodeHash, leaf_index: u64, siblings: &[NodeHash], root: &NodeHash) -> bool {
    if siblings.len() != TREE_HEIGHT || leaf_index >= MAX_LEAVES {
        return false;
    }
    let positions: Vec<Side> = path_layout(leaf_index).into_iter().map(|(_, side)| side).collect();
    fold_root(leaf, siblings, &positions) == *root
}

/// Sparse append-only Merkle tree
///
/// Stores only nodes that differ from the zero subtree, giving O(height)
/// insertions and sibling paths on a 2^32-leaf tree.
#[derive(Clone, Debug)]
pub struct ShieldTree {
    /// Current number of leaves
    next_index: u64,
    /// Non-empty nodes by heap index
    nodes: HashMap<u64, NodeHash>,
    /// Current root
    root: NodeHash,
}

impl Default for ShieldTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ShieldTree {
    /// Create a new empty tree
    pub fn new() -> Self {
        Self {
            next_index: 0,
            nodes: HashMap::new(),
            root: zero_hashes()[TREE_HEIGHT],
        }
    }

    /// Append a leaf, returning its index
    pub fn insert(&mut self, leaf: NodeHash) -> Result<u64, MerkleError> {
        if self.next_index >= MAX_LEAVES {
            return Err(MerkleError::TreeFull);
        }

        let leaf_index = self.next_index;
        let mut node = leaf_node_index(leaf_index);
        let mut current = leaf;
        self.nodes.insert(node, current);

        while let Some((sibling, side, parent)) = step_up(node) {
            current = combine(&current, &self.node(sibling), side);
            self.nodes.insert(parent, current);
            node = parent;
        }

        self.root = current;
        self.next_index += 1;
        Ok(leaf_index)
    }

    /// Get the current root
    pub fn root(&self) -> NodeHash {
        self.root
    }

    /// Value at a heap index (zero subtree hash when untouched)
    pub fn node(&self, node_index: u64) -> NodeHash {
        self.nodes
            .get(&node_index)
            .copied()
            .unwrap_or_else(|| zero_hashes()[node_level(node_index)])
    }

    /// Get the leaf at a given index
    pub fn leaf(&self, leaf_index: u64) -> Option<NodeHash> {
        if leaf_index >= self.next_index {
            return None;
        }
        Some(self.node(leaf_node_index(leaf_index)))
    }

    /// Sibling path for an inserted leaf against the current root
    pub fn sibling_path(&self, leaf_index: u64) -> Result<SiblingPath, MerkleError> {
        let leaf = self.leaf(leaf_index).ok_or(MerkleError::InvalidLeafIndex(leaf_index))?;
        let siblings = path_layout(leaf_index)
            .into_iter()
            .map(|(sibling, _)| self.node(sibling))
            .collect();
        SiblingPath::from_siblings(&leaf, leaf_index, siblings)
    }

    /// Get the number of leaves in the tree
    pub fn len(&self) -> u64 {
        self.next_index
    }

    /// Check if tree is empty
    pub fn is_empty(&self) -> bool {
        self.next_index == 0
    }
}
