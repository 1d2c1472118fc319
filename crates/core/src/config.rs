//! Engine configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::AssetKind;
use crate::error::{ShieldError, ShieldResult};
use crate::mirror::{PollPolicy, RetryPolicy};

/// Merkle mirror service settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Base URL of the mirror REST service.
    pub url: String,
    /// Interval between block-height polls.
    pub poll_interval_ms: u64,
    /// Polls before giving up with a timeout.
    pub max_poll_attempts: u32,
    /// Attempts per request on transport errors and 5xx.
    pub request_retries: u32,
    /// First backoff delay; doubles per retry.
    pub retry_backoff_ms: u64,
    /// Per-request timeout.
    pub request_timeout_ms: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9000".to_string(),
            poll_interval_ms: 3_000,
            max_poll_attempts: 20,
            request_retries: 5,
            retry_backoff_ms: 250,
            request_timeout_ms: 10_000,
        }
    }
}

impl MirrorConfig {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_poll_attempts,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.request_retries,
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// External prover settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProverConfig {
    /// Compiler/prover executable.
    pub binary: PathBuf,
    /// Directory holding one subdirectory of artifacts per circuit.
    pub artifacts_dir: PathBuf,
    /// Wall-clock bound per proof.
    pub timeout_secs: u64,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("zokrates"),
            artifacts_dir: PathBuf::from("./circuits"),
            timeout_secs: 600,
        }
    }
}

impl ProverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Tree names the mirror indexes each shield contract under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeNames {
    pub fungible: String,
    pub non_fungible: String,
}

impl Default for TreeNames {
    fn default() -> Self {
        Self {
            fungible: "FTokenShield".to_string(),
            non_fungible: "NFTokenShield".to_string(),
        }
    }
}

impl TreeNames {
    pub fn for_asset(&self, asset: AssetKind) -> &str {
        match asset {
            AssetKind::Fungible => &self.fungible,
            AssetKind::NonFungible => &self.non_fungible,
        }
    }
}

/// Engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mirror: MirrorConfig,
    pub prover: ProverConfig,
    pub trees: TreeNames,
    /// Re-fetches of input paths that disagree on the root.
    pub root_refetch_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mirror: MirrorConfig::default(),
            prover: ProverConfig::default(),
            trees: TreeNames::default(),
            root_refetch_attempts: 3,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables (and `.env`, if present).
    pub fn from_env() -> ShieldResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> ShieldResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("MANTLE_MIRROR_URL") {
            config.mirror.url = url;
        }
        if let Some(v) = parse(&lookup, "MANTLE_POLL_INTERVAL_MS")? {
            config.mirror.poll_interval_ms = v;
        }
        if let Some(v) = parse(&lookup, "MANTLE_MAX_POLL_ATTEMPTS")? {
            config.mirror.max_poll_attempts = v;
        }
        if let Some(v) = parse(&lookup, "MANTLE_MIRROR_RETRIES")? {
            config.mirror.request_retries = v;
        }
        if let Some(v) = parse(&lookup, "MANTLE_MIRROR_BACKOFF_MS")? {
            config.mirror.retry_backoff_ms = v;
        }
        if let Some(binary) = lookup("MANTLE_PROVER_BIN") {
            config.prover.binary = PathBuf::from(binary);
        }
        if let Some(dir) = lookup("MANTLE_CIRCUITS_DIR") {
            config.prover.artifacts_dir = PathBuf::from(dir);
        }
        if let Some(v) = parse(&lookup, "MANTLE_PROVER_TIMEOUT_SECS")? {
            config.prover.timeout_secs = v;
        }
        if let Some(tree) = lookup("MANTLE_FT_TREE") {
            config.trees.fungible = tree;
        }
        if let Some(tree) = lookup("MANTLE_NFT_TREE") {
            config.trees.non_fungible = tree;
        }
        if let Some(v) = parse(&lookup, "MANTLE_ROOT_REFETCH_ATTEMPTS")? {
            config.root_refetch_attempts = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ShieldResult<()> {
        if self.mirror.url.trim().is_empty() {
            return Err(ShieldError::Configuration("mirror url must be set".into()));
        }
        if self.mirror.poll_interval_ms == 0 || self.mirror.max_poll_attempts == 0 {
            return Err(ShieldError::Configuration(
                "mirror polling needs a non-zero interval and attempt count".into(),
            ));
        }
        if self.mirror.request_retries == 0 {
            return Err(ShieldError::Configuration("mirror retries must be at least 1".into()));
        }
        if self.prover.timeout_secs == 0 {
            return Err(ShieldError::Configuration("prover timeout must be non-zero".into()));
        }
        if self.trees.fungible.is_empty() || self.trees.non_fungible.is_empty() {
            return Err(ShieldError::Configuration("tree names must be set".into()));
        }
        if self.trees.fungible == self.trees.non_fungible {
            return Err(ShieldError::Configuration(
                "fungible and non-fungible trees must differ".into(),
            ));
        }
        Ok(())
    }
}

fn parse<F, T>(lookup: &F, key: &str) -> ShieldResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ShieldError::Configuration(format!("{} has an invalid value: {}", key, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.trees.fungible, "FTokenShield");
        assert_eq!(config.trees.non_fungible, "NFTokenShield");
        assert_eq!(config.root_refetch_attempts, 3);
        assert_eq!(config.mirror.poll_policy().interval, Duration::from_secs(3));
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("MANTLE_MIRROR_URL", "http://mirror:80"),
            ("MANTLE_MAX_POLL_ATTEMPTS", "7"),
            ("MANTLE_CIRCUITS_DIR", "/srv/circuits"),
        ]))
        .unwrap();
        assert_eq!(config.mirror.url, "http://mirror:80");
        assert_eq!(config.mirror.max_poll_attempts, 7);
        assert_eq!(config.prover.artifacts_dir, PathBuf::from("/srv/circuits"));
    }

    #[test]
    fn test_invalid_number_rejected() {
        let result = EngineConfig::from_lookup(lookup_from(&[("MANTLE_POLL_INTERVAL_MS", "soon")]));
        assert!(matches!(result, Err(ShieldError::Configuration(_))));
    }

    #[test]
    fn test_validation() {
        let result = EngineConfig::from_lookup(lookup_from(&[("MANTLE_MAX_POLL_ATTEMPTS", "0")]));
        assert!(matches!(result, Err(ShieldError::Configuration(_))));

        let result = EngineConfig::from_lookup(lookup_from(&[("MANTLE_NFT_TREE", "FTokenShield")]));
        assert!(matches!(result, Err(ShieldError::Configuration(_))));
    }

    #[test]
    fn test_json_partial() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"mirror": {"url": "http://m"}, "root_refetch_attempts": 2}"#).unwrap();
        assert_eq!(config.mirror.url, "http://m");
        assert_eq!(config.mirror.max_poll_attempts, 20);
        assert_eq!(config.root_refetch_attempts, 2);
    }
}
