//! Verifying-key registry
//!
//! Every circuit's verifying key is registered once on the shield contract at
//! setup. The contract answers with a [`VkId`]; transactions name that id so
//! the contract knows which key to verify against.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::circuit::CircuitId;
use super::prover::ProverAdapter;
use crate::contract::{ContractContext, ShieldContract};
use crate::crypto::{concatenate_then_hash, NodeHash};
use crate::error::{ProverError, ShieldError, ShieldResult};

/// Identifier the contract assigns to a registered verifying key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VkId(pub NodeHash);

impl fmt::Display for VkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for VkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VkId({})", self.0)
    }
}

/// A verifying key flattened into the ordered word list the contract takes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationKey {
    pub words: Vec<String>,
}

impl VerificationKey {
    /// Flatten a JSON verifying key. Strings and numbers are taken in document
    /// order; objects are walked in key order.
    pub fn from_json(value: &Value) -> Self {
        let mut words = Vec::new();
        flatten(value, &mut words);
        Self { words }
    }

    pub async fn load(path: &Path) -> Result<Self, ProverError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|_| ProverError::MissingArtifact(path.to_path_buf()))?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| ProverError::InvalidOutput(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_json(&value))
    }

    /// Content digest of the key, each word prefixed with its length
    pub fn digest(&self) -> NodeHash {
        let lengths: Vec<[u8; 8]> = self.words.iter().map(|w| (w.len() as u64).to_be_bytes()).collect();
        let parts: Vec<&[u8]> = self
            .words
            .iter()
            .zip(&lengths)
            .flat_map(|(word, len)| [len.as_slice(), word.as_bytes()])
            .collect();
        concatenate_then_hash(&parts)
    }
}

fn flatten(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Bool(b) => out.push(b.to_string()),
        Value::Array(items) => items.iter().for_each(|item| flatten(item, out)),
        Value::Object(map) => map.values().for_each(|item| flatten(item, out)),
        Value::Null => {}
    }
}

/// Registered verifying keys per circuit
#[derive(Clone, Debug, Default)]
pub struct VerifyingKeyRegistry {
    keys: HashMap<CircuitId, VkId>,
}

impl VerifyingKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load each circuit's key from the prover and register it on the contract
    pub async fn setup(
        contract: &dyn ShieldContract,
        ctx: &ContractContext,
        prover: &dyn ProverAdapter,
        circuits: &[CircuitId],
    ) -> ShieldResult<Self> {
        let mut registry = Self::new();
        for circuit in circuits {
            let key = prover.verification_key(*circuit).await?;
            let id = contract.register_verification_key(ctx, *circuit, &key).await?;
            info!(%circuit, vk_id = %id, contract = %ctx.contract_address, "Registered verifying key");
            registry.insert(*circuit, id);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, circuit: CircuitId, id: VkId) {
        self.keys.insert(circuit, id);
    }

    /// The id to name when submitting a `circuit` proof
    pub fn get(&self, circuit: CircuitId) -> ShieldResult<VkId> {
        self.keys
            .get(&circuit)
            .copied()
            .ok_or_else(|| ShieldError::Configuration(format!("no verifying key registered for {}", circuit)))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AssetKind;
    use crate::proof::circuit::Operation;

    #[test]
    fn test_flatten_key() {
        let json = serde_json::json!({
            "alpha": ["0x1", "0x2"],
            "beta": [["0x3", "0x4"], ["0x5", "0x6"]],
            "gamma_abc": [["0x7", "0x8"]],
            "scheme": "g16"
        });
        let key = VerificationKey::from_json(&json);
        assert_eq!(
            key.words,
            vec!["0x1", "0x2", "0x3", "0x4", "0x5", "0x6", "0x7", "0x8", "g16"]
        );
    }

    #[test]
    fn test_digest_depends_on_words() {
        let a = VerificationKey { words: vec!["0x1".into()] };
        let b = VerificationKey { words: vec!["0x2".into()] };
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest(), a.clone().digest());
    }

    #[test]
    fn test_digest_keeps_word_boundaries() {
        let split = VerificationKey {
            words: vec!["0x1".into(), "0x2".into()],
        };
        let joined = VerificationKey {
            words: vec!["0x10x2".into()],
        };
        assert_ne!(split.digest(), joined.digest());
    }

    #[test]
    fn test_registry_lookup() {
        let circuit = CircuitId::new(AssetKind::Fungible, Operation::Transfer);
        let mut registry = VerifyingKeyRegistry::new();
        assert!(matches!(registry.get(circuit), Err(ShieldError::Configuration(_))));

        let id = VkId(NodeHash::truncate(&[9]));
        registry.insert(circuit, id);
        assert_eq!(registry.get(circuit).unwrap(), id);
        assert_eq!(registry.len(), 1);
    }
}
