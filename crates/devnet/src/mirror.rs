//! In-process Merkle mirror
//!
//! Replays each tracked contract's leaf events into a tree of its own. A
//! live mirror replays before every read. Otherwise it only moves when told
//! to (`sync`, `sync_to`) or when a follower task is running, which is how
//! tests reproduce the lag between the chain and the mirror.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use mantle_core::crypto::{path_layout, NodeHash, ShieldTree};
use mantle_core::error::MirrorError;
use mantle_core::mirror::{LatestLeaf, MirrorLeaf, MirrorNode};
use mantle_core::MerkleMirror;

use crate::contract::LocalShieldContract;

#[derive(Debug)]
struct MirroredTree {
    source: Arc<LocalShieldContract>,
    tree: ShieldTree,
    /// Events replayed from the source's log
    replayed: usize,
    block_number: u64,
    started: bool,
    forged_leaves: HashMap<u64, NodeHash>,
    forged_nodes: HashMap<u64, NodeHash>,
}

impl MirroredTree {
    fn new(source: Arc<LocalShieldContract>) -> Self {
        Self {
            source,
            tree: ShieldTree::new(),
            replayed: 0,
            block_number: 0,
            started: false,
            forged_leaves: HashMap::new(),
            forged_nodes: HashMap::new(),
        }
    }

    /// Replay events mined up to `target_block`
    ///
    /// The reported block never runs ahead of the replayed leaves: the log is
    /// read in the same snapshot as the block it is complete up to.
    fn replay(&mut self, target_block: u64) -> u64 {
        let (mined, events) = self.source.log_since(self.replayed);
        let reached = target_block.min(mined);
        for event in events {
            if event.block_number > reached {
                break;
            }
            match self.tree.insert(event.commitment) {
                Ok(index) if index == event.leaf_index => {}
                Ok(index) => warn!(
                    tree = self.source.tree_name(),
                    expected = event.leaf_index,
                    got = index,
                    "Replayed leaf landed at a different index"
                ),
                Err(e) => warn!(tree = self.source.tree_name(), error = %e, "Replay failed"),
            }
            self.replayed += 1;
        }
        self.block_number = self.block_number.max(reached);
        self.block_number
    }

    fn check_indexed(&self, tree: &str, leaf_index: u64) -> Result<(), MirrorError> {
        if leaf_index >= self.tree.len() {
            return Err(MirrorError::NotFound {
                tree: tree.to_string(),
                index: leaf_index,
            });
        }
        Ok(())
    }
}

/// Mirror over one or more local shield contracts
#[derive(Debug, Default)]
pub struct LocalMirror {
    trees: Mutex<HashMap<String, MirroredTree>>,
    live: bool,
    failing_starts: AtomicU32,
}

impl LocalMirror {
    /// A mirror that lags until synced
    pub fn new() -> Self {
        Self::default()
    }

    /// A mirror that catches up before answering
    pub fn live() -> Self {
        Self {
            live: true,
            ..Self::default()
        }
    }

    /// Follow `source` under its tree name
    pub fn track(&self, source: Arc<LocalShieldContract>) {
        let name = source.tree_name().to_string();
        self.trees.lock().insert(name, MirroredTree::new(source));
    }

    /// Catch up with everything mined so far
    pub fn sync(&self, tree: &str) -> Result<u64, MirrorError> {
        self.sync_to(tree, u64::MAX)
    }

    /// Catch up to `block`, returning the block now reached
    pub fn sync_to(&self, tree: &str, block: u64) -> Result<u64, MirrorError> {
        let mut trees = self.trees.lock();
        let entry = trees
            .get_mut(tree)
            .ok_or_else(|| MirrorError::UnknownTree(tree.to_string()))?;
        let reached = entry.replay(block);
        debug!(tree, reached, leaves = entry.tree.len(), "Mirror synced");
        Ok(reached)
    }

    pub fn sync_all(&self) {
        for entry in self.trees.lock().values_mut() {
            entry.replay(u64::MAX);
        }
    }

    /// Sync every `interval` until the handle is aborted
    pub fn follow(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let mirror = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                mirror.sync_all();
            }
        })
    }

    /// Fail the next `count` event-filter starts as if the service were cold
    pub fn fail_next_starts(&self, count: u32) {
        self.failing_starts.store(count, Ordering::SeqCst);
    }

    /// Report `value` for a leaf instead of what was mined
    pub fn forge_leaf(&self, tree: &str, leaf_index: u64, value: NodeHash) {
        if let Some(entry) = self.trees.lock().get_mut(tree) {
            entry.forged_leaves.insert(leaf_index, value);
        }
    }

    /// Report `value` for a node in sibling paths
    pub fn forge_node(&self, tree: &str, node_index: u64, value: NodeHash) {
        if let Some(entry) = self.trees.lock().get_mut(tree) {
            entry.forged_nodes.insert(node_index, value);
        }
    }

    fn take_start_failure(&self) -> bool {
        self.failing_starts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn read<T>(&self, tree: &str, f: impl FnOnce(&MirroredTree) -> Result<T, MirrorError>) -> Result<T, MirrorError> {
        let mut trees = self.trees.lock();
        let entry = trees
            .get_mut(tree)
            .ok_or_else(|| MirrorError::UnknownTree(tree.to_string()))?;
        if !entry.started {
            return Err(MirrorError::NotStarted(tree.to_string()));
        }
        if self.live {
            entry.replay(u64::MAX);
        }
        f(entry)
    }
}

#[async_trait]
impl MerkleMirror for LocalMirror {
    async fn start_event_filter(&self, tree: &str) -> Result<(), MirrorError> {
        if self.take_start_failure() {
            return Err(MirrorError::Network("event filter still starting".to_string()));
        }
        let mut trees = self.trees.lock();
        let entry = trees
            .get_mut(tree)
            .ok_or_else(|| MirrorError::UnknownTree(tree.to_string()))?;
        entry.started = true;
        Ok(())
    }

    async fn latest_leaf(&self, tree: &str) -> Result<LatestLeaf, MirrorError> {
        self.read(tree, |entry| {
            Ok(LatestLeaf {
                block_number: entry.block_number,
                leaf_index: entry.tree.len().checked_sub(1),
            })
        })
    }

    async fn leaf_by_index(&self, tree: &str, leaf_index: u64) -> Result<MirrorLeaf, MirrorError> {
        self.read(tree, |entry| {
            entry.check_indexed(tree, leaf_index)?;
            let value = match entry.forged_leaves.get(&leaf_index) {
                Some(forged) => *forged,
                None => entry.tree.leaf(leaf_index).unwrap_or_default(),
            };
            Ok(MirrorLeaf { leaf_index, value })
        })
    }

    async fn sibling_path(&self, tree: &str, leaf_index: u64) -> Result<Vec<MirrorNode>, MirrorError> {
        self.read(tree, |entry| {
            entry.check_indexed(tree, leaf_index)?;
            Ok(path_layout(leaf_index)
                .into_iter()
                .map(|(node_index, _)| MirrorNode {
                    node_index,
                    value: entry
                        .forged_nodes
                        .get(&node_index)
                        .copied()
                        .unwrap_or_else(|| entry.tree.node(node_index)),
                })
                .collect())
        })
    }
}
