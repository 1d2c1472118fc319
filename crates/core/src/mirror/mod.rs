//! Merkle mirror client and consistency wait
//!
//! The mirror is a separate service that follows the shield contract's
//! events and keeps its own copy of each tree. It lags the chain: a leaf
//! mined at block `b` is only visible once the mirror's latest filtered
//! block reaches `b`. [`wait_for_block_height`] bridges that gap with a
//! bounded fixed-interval poll.

pub mod http;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crypto::NodeHash;
use crate::error::{MirrorError, ShieldError, ShieldResult};

pub use http::HttpMirrorClient;

/// Latest event the mirror has processed for a tree
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestLeaf {
    /// Highest block whose events have been filtered
    pub block_number: u64,
    /// Highest indexed leaf, if any
    pub leaf_index: Option<u64>,
}

/// A leaf as indexed by the mirror
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorLeaf {
    pub leaf_index: u64,
    pub value: NodeHash,
}

/// A tree node as returned in a sibling path
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorNode {
    /// Heap index of the node
    pub node_index: u64,
    pub value: NodeHash,
}

/// Queries against the mirror service
#[async_trait]
pub trait MerkleMirror: Send + Sync {
    /// Start following the tree's contract events. Idempotent.
    async fn start_event_filter(&self, tree: &str) -> Result<(), MirrorError>;

    async fn latest_leaf(&self, tree: &str) -> Result<LatestLeaf, MirrorError>;

    /// `NotFound` while the leaf is not yet indexed
    async fn leaf_by_index(&self, tree: &str, leaf_index: u64) -> Result<MirrorLeaf, MirrorError>;

    /// Sibling nodes of the leaf's path, leaf level first
    async fn sibling_path(&self, tree: &str, leaf_index: u64) -> Result<Vec<MirrorNode>, MirrorError>;
}

/// Bounded fixed-interval polling
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: 20,
        }
    }
}

/// Exponential backoff for transient failures
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    const MAX_BACKOFF: Duration = Duration::from_secs(30);

    /// Delay after the given (zero-based) failed attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(Self::MAX_BACKOFF)
            .min(Self::MAX_BACKOFF)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, MirrorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MirrorError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                let delay = policy.backoff(attempt);
                warn!(what, attempt = attempt + 1, ?delay, error = %e, "Mirror request failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Start the tree's event filter, retrying while the mirror is cold
pub async fn start_event_filter_with_retry(
    mirror: &dyn MerkleMirror,
    tree: &str,
    policy: &RetryPolicy,
) -> ShieldResult<()> {
    with_retry(policy, "start event filter", || mirror.start_event_filter(tree)).await?;
    debug!(tree, "Event filter running");
    Ok(())
}

/// Poll until the mirror has filtered `target_block`, returning the block it reached
///
/// Transient mirror errors count as "not yet". Anything else is returned as-is.
pub async fn wait_for_block_height(
    mirror: &dyn MerkleMirror,
    tree: &str,
    target_block: u64,
    policy: &PollPolicy,
) -> ShieldResult<u64> {
    let mut last_seen = 0;
    for attempt in 1..=policy.max_attempts {
        match mirror.latest_leaf(tree).await {
            Ok(latest) if latest.block_number >= target_block => {
                debug!(tree, target_block, reached = latest.block_number, attempt, "Mirror caught up");
                return Ok(latest.block_number);
            }
            Ok(latest) => {
                last_seen = latest.block_number;
                debug!(tree, target_block, last_seen, attempt, "Mirror behind, waiting");
            }
            Err(e) if e.is_retryable() => {
                warn!(tree, attempt, error = %e, "Mirror metadata unavailable");
            }
            Err(e) => return Err(e.into()),
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(ShieldError::MirrorTimeout {
        target_block,
        last_seen,
        attempts: policy.max_attempts,
    })
}
