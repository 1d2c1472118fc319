//! Transaction records handed back to the caller
//!
//! The engine does not persist history. Each completed operation returns a
//! [`TransactionRecord`] that the caller may store; which fields are present
//! is decided by the [`TransactionKind`] tag.

use serde::{Deserialize, Serialize};

use crate::crypto::{AssetKind, Commitment, NodeHash};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionKind {
    /// Public value converted into a new commitment
    Minted { commitment: Commitment },
    /// Inputs consumed, outputs created (transfer and batch transfer)
    Transferred {
        spent: Vec<Commitment>,
        outputs: Vec<Commitment>,
        nullifiers: Vec<NodeHash>,
    },
    /// Input consumed, value released to a public payee
    Burned {
        spent: Commitment,
        nullifier: NodeHash,
        payee: String,
    },
    /// A commitment a counterparty disclosed, checked and accepted
    Received { commitment: Commitment },
}

impl TransactionKind {
    pub fn name(&self) -> &'static str {
        match self {
            TransactionKind::Minted { .. } => "minted",
            TransactionKind::Transferred { .. } => "transferred",
            TransactionKind::Burned { .. } => "burned",
            TransactionKind::Received { .. } => "received",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub asset: AssetKind,
    /// Block the transaction was mined in
    pub block_number: u64,
    pub kind: TransactionKind,
}

impl TransactionRecord {
    pub fn new(asset: AssetKind, block_number: u64, kind: TransactionKind) -> Self {
        Self {
            asset,
            block_number,
            kind,
        }
    }

    /// Commitments this record brings into the caller's wallet
    pub fn created(&self) -> Vec<&Commitment> {
        match &self.kind {
            TransactionKind::Minted { commitment } | TransactionKind::Received { commitment } => vec![commitment],
            TransactionKind::Transferred { outputs, .. } => outputs.iter().collect(),
            TransactionKind::Burned { .. } => vec![],
        }
    }
}
