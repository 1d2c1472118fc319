//! Correctness checks on received commitments
//!
//! A sender discloses the opening of a commitment and where it was mined.
//! The receiver recomputes the hash from the opening, waits for the mirror
//! to reach the mining block, then compares the indexed leaf. Both outcomes
//! are reported as flags; only infrastructure failures are errors.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::contract::{ContractContext, ShieldContract};
use crate::crypto::{leaf_node_index, Commitment, DisclosedCommitment, NodeHash};
use crate::error::{MirrorError, ShieldResult};
use crate::mirror::{wait_for_block_height, MerkleMirror, PollPolicy};
use crate::transaction::{TransactionKind, TransactionRecord};

/// What a counterparty claims about a commitment sent to us
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectnessClaim {
    pub disclosed: DisclosedCommitment,
    pub commitment: NodeHash,
    pub leaf_index: u64,
    pub mined_at_block: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectnessReport {
    /// The opening re-hashes to the claimed commitment
    pub hash_matches: bool,
    /// The mirror holds the claimed commitment at the claimed index
    pub on_chain_matches: bool,
    /// Contract's own tree node, consulted only when the mirror disagrees
    pub ground_truth_matches: Option<bool>,
}

impl CorrectnessReport {
    pub fn is_valid(&self) -> bool {
        self.hash_matches && self.on_chain_matches
    }

    /// The mirror disagrees but the contract confirms the claim
    pub fn mirror_diverged(&self) -> bool {
        !self.on_chain_matches && self.ground_truth_matches == Some(true)
    }

    /// Record of the accepted commitment, if the claim checked out
    pub fn into_record(self, claim: &CorrectnessClaim) -> Option<TransactionRecord> {
        if !self.is_valid() {
            return None;
        }
        let d = &claim.disclosed;
        let commitment = Commitment::with_salt(d.value, d.owner_public_key, d.salt)
            .indexed(claim.leaf_index, claim.mined_at_block);
        Some(TransactionRecord::new(
            d.value.kind(),
            claim.mined_at_block,
            TransactionKind::Received { commitment },
        ))
    }
}

/// Check a claimed commitment against its opening and the indexed tree
///
/// `MirrorTimeout` propagates; a leaf still absent after the wait is a
/// mismatch, not an error.
pub async fn check_correctness(
    ctx: &ContractContext,
    contract: &dyn ShieldContract,
    mirror: &dyn MerkleMirror,
    poll: &PollPolicy,
    claim: &CorrectnessClaim,
) -> ShieldResult<CorrectnessReport> {
    let hash_matches = claim.disclosed.commitment_hash() == claim.commitment;

    wait_for_block_height(mirror, &ctx.tree, claim.mined_at_block, poll).await?;

    let on_chain_matches = match mirror.leaf_by_index(&ctx.tree, claim.leaf_index).await {
        Ok(leaf) => leaf.value == claim.commitment,
        Err(MirrorError::NotFound { .. }) => false,
        Err(e) => return Err(e.into()),
    };

    let ground_truth_matches = if on_chain_matches {
        None
    } else {
        match contract
            .merkle_tree_node(ctx, leaf_node_index(claim.leaf_index))
            .await
        {
            Ok(node) => Some(node == claim.commitment),
            Err(e) => {
                warn!(tree = %ctx.tree, leaf_index = claim.leaf_index, error = %e, "Ground-truth read failed");
                None
            }
        }
    };

    let report = CorrectnessReport {
        hash_matches,
        on_chain_matches,
        ground_truth_matches,
    };
    info!(
        tree = %ctx.tree,
        leaf_index = claim.leaf_index,
        hash_matches,
        on_chain_matches,
        ?ground_truth_matches,
        "Correctness checked"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{AssetKind, AssetValue, SecretKey};
    use crate::error::ShieldError;
    use crate::testing::{context, FakeChain};
    use std::time::Duration;

    fn poll() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts: 3,
        }
    }

    fn minted(chain: &FakeChain, amount: u128) -> CorrectnessClaim {
        let pk = SecretKey::random().public_key();
        let c = Commitment::new_random(AssetValue::Fungible(amount), pk);
        let (leaf_index, block) = chain.append(c.hash);
        CorrectnessClaim {
            disclosed: c.disclose(),
            commitment: c.hash,
            leaf_index,
            mined_at_block: block,
        }
    }

    #[tokio::test]
    async fn test_valid_claim() {
        let chain = FakeChain::new();
        let claim = minted(&chain, 10_000);
        let report = check_correctness(&context(), &chain, &chain, &poll(), &claim).await.unwrap();
        assert!(report.hash_matches && report.on_chain_matches);
        assert_eq!(report.ground_truth_matches, None);

        let record = report.into_record(&claim).unwrap();
        assert_eq!(record.asset, AssetKind::Fungible);
        assert_eq!(record.kind.name(), "received");
    }

    #[tokio::test]
    async fn test_bad_opening() {
        let chain = FakeChain::new();
        let mut claim = minted(&chain, 5);
        claim.disclosed.value = AssetValue::Fungible(6);
        let report = check_correctness(&context(), &chain, &chain, &poll(), &claim).await.unwrap();
        assert!(!report.hash_matches);
        assert!(report.on_chain_matches);
        assert!(report.into_record(&claim).is_none());
    }

    #[tokio::test]
    async fn test_altered_owner_or_salt_fails_hash() {
        let chain = FakeChain::new();
        let claim = minted(&chain, 5);

        let mut other_owner = claim.clone();
        other_owner.disclosed.owner_public_key = SecretKey::random().public_key();
        let mut other_salt = claim.clone();
        other_salt.disclosed.salt = NodeHash::random();

        for altered in [other_owner, other_salt] {
            let report = check_correctness(&context(), &chain, &chain, &poll(), &altered).await.unwrap();
            assert!(!report.hash_matches);
            assert!(report.on_chain_matches);
            assert!(!report.is_valid());
        }
    }

    #[tokio::test]
    async fn test_wrong_index_is_false_not_error() {
        let chain = FakeChain::new();
        let mut claim = minted(&chain, 5);
        claim.leaf_index = 9;
        let report = check_correctness(&context(), &chain, &chain, &poll(), &claim).await.unwrap();
        assert!(report.hash_matches);
        assert!(!report.on_chain_matches);
        assert_eq!(report.ground_truth_matches, Some(false));
    }

    #[tokio::test]
    async fn test_forged_mirror_detected_by_ground_truth() {
        let chain = FakeChain::new();
        let claim = minted(&chain, 5);
        chain.forge(claim.leaf_index, NodeHash::truncate(&[0xee]));
        let report = check_correctness(&context(), &chain, &chain, &poll(), &claim).await.unwrap();
        assert!(!report.on_chain_matches);
        assert!(report.mirror_diverged());
    }

    #[tokio::test]
    async fn test_mirror_timeout_propagates() {
        let chain = FakeChain::new();
        let mut claim = minted(&chain, 5);
        claim.mined_at_block = 50;
        let err = check_correctness(&context(), &chain, &chain, &poll(), &claim).await.unwrap_err();
        assert!(matches!(err, ShieldError::MirrorTimeout { target_block: 50, .. }));
    }
}
