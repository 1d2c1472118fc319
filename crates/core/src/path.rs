//! Sibling-path reconstruction
//!
//! Builds the authenticated path for a commitment the caller is about to
//! spend. The mirror supplies the nodes; the path is only trusted once the
//! root it re-hashes to is found in the contract's own root history.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::contract::{ContractContext, ShieldContract};
use crate::crypto::{path_layout, NodeHash, SiblingPath, TREE_HEIGHT};
use crate::error::{MirrorError, ShieldError, ShieldResult};
use crate::mirror::MerkleMirror;

/// Authenticated path from `leaf_value` at `leaf_index` to a known root
///
/// Fails with `LeafMismatch` if the mirror holds a different leaf,
/// `MalformedPath` if it returns nodes off the leaf's path, and `UnknownRoot`
/// if the recomputed root was never a contract root.
pub async fn compute_authenticated_path(
    ctx: &ContractContext,
    contract: &dyn ShieldContract,
    mirror: &dyn MerkleMirror,
    leaf_value: &NodeHash,
    leaf_index: u64,
) -> ShieldResult<SiblingPath> {
    let leaf = mirror.leaf_by_index(&ctx.tree, leaf_index).await?;
    if leaf.value != *leaf_value {
        warn!(tree = %ctx.tree, leaf_index, "Mirror leaf differs from the commitment being spent");
        return Err(ShieldError::LeafMismatch {
            index: leaf_index,
            expected: *leaf_value,
            found: leaf.value,
        });
    }

    let nodes = mirror.sibling_path(&ctx.tree, leaf_index).await?;
    if nodes.len() != TREE_HEIGHT {
        return Err(MirrorError::MalformedPath(format!(
            "expected {} siblings for leaf {}, got {}",
            TREE_HEIGHT,
            leaf_index,
            nodes.len()
        ))
        .into());
    }
    let by_index: HashMap<u64, NodeHash> = nodes.iter().map(|n| (n.node_index, n.value)).collect();

    let siblings = path_layout(leaf_index)
        .into_iter()
        .map(|(node_index, _)| {
            by_index.get(&node_index).copied().ok_or_else(|| {
                MirrorError::MalformedPath(format!("sibling node {} missing for leaf {}", node_index, leaf_index))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let path = SiblingPath::from_siblings(leaf_value, leaf_index, siblings)
        .map_err(|e| MirrorError::MalformedPath(e.to_string()))?;

    if !contract.is_known_root(ctx, &path.root).await? {
        warn!(tree = %ctx.tree, leaf_index, root = %path.root, "Recomputed root not in contract history");
        return Err(ShieldError::UnknownRoot(path.root));
    }

    debug!(tree = %ctx.tree, leaf_index, root = %path.root, positions = %path.positions_hex(), "Path authenticated");
    Ok(path)
}
