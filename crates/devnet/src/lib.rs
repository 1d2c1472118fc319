//! Mantle Devnet
//!
//! In-process stand-ins for the collaborators of the shielded-commitment
//! engine: a shield contract per asset kind, a Merkle mirror that can lag
//! behind it (optionally served over HTTP), and a deterministic prover.
//!
//! # Modules
//! - `contract`: `LocalShieldContract`
//! - `mirror`: `LocalMirror`
//! - `server`: axum routes serving a `LocalMirror`
//! - `prover`: `DevProver`

pub mod contract;
pub mod mirror;
pub mod prover;
pub mod server;

use std::sync::Arc;

use mantle_core::config::{EngineConfig, MirrorConfig};
use mantle_core::{
    AssetKind, ContractContext, ContractError, Engine, FungibleShield, NonFungibleShield, ShieldDirectory,
    ShieldResult,
};

pub use contract::{LeafEvent, LocalShieldContract};
pub use mirror::LocalMirror;
pub use prover::DevProver;

/// Fungible shield contract address
pub const FT_SHIELD_ADDRESS: &str = "0xshield-ft";
/// Non-fungible shield contract address
pub const NFT_SHIELD_ADDRESS: &str = "0xshield-nft";

/// Engine settings scaled down for in-process use
pub fn dev_config() -> EngineConfig {
    EngineConfig {
        mirror: MirrorConfig {
            poll_interval_ms: 10,
            max_poll_attempts: 50,
            request_retries: 5,
            retry_backoff_ms: 1,
            ..MirrorConfig::default()
        },
        ..EngineConfig::default()
    }
}

/// Both shield contracts, one mirror and one prover
pub struct Devnet {
    pub fungible: Arc<LocalShieldContract>,
    pub non_fungible: Arc<LocalShieldContract>,
    pub mirror: Arc<LocalMirror>,
    pub prover: Arc<DevProver>,
    pub config: EngineConfig,
    directory: ShieldDirectory,
}

impl Devnet {
    /// Devnet whose mirror is always caught up
    pub fn new() -> Self {
        Self::with_mirror(LocalMirror::live(), dev_config())
    }

    /// Devnet around a caller-built mirror, e.g. a lagging one
    pub fn with_mirror(mirror: LocalMirror, config: EngineConfig) -> Self {
        let trees = config.trees.clone();
        let fungible = Arc::new(LocalShieldContract::new(
            FT_SHIELD_ADDRESS,
            trees.fungible.clone(),
            AssetKind::Fungible,
        ));
        let non_fungible = Arc::new(LocalShieldContract::new(
            NFT_SHIELD_ADDRESS,
            trees.non_fungible.clone(),
            AssetKind::NonFungible,
        ));
        mirror.track(Arc::clone(&fungible));
        mirror.track(Arc::clone(&non_fungible));

        Self {
            fungible,
            non_fungible,
            mirror: Arc::new(mirror),
            prover: Arc::new(DevProver::new()),
            directory: ShieldDirectory::new(FT_SHIELD_ADDRESS, NFT_SHIELD_ADDRESS, trees),
            config,
        }
    }

    /// Engine wired to the local mirror and prover
    pub fn engine(&self) -> Engine {
        Engine::new(self.mirror.clone(), self.prover.clone(), self.config.clone())
    }

    pub fn context(&self, account: &str, asset: AssetKind) -> Result<ContractContext, ContractError> {
        self.directory.context(account, asset)
    }

    pub fn contract(&self, asset: AssetKind) -> &Arc<LocalShieldContract> {
        match asset {
            AssetKind::Fungible => &self.fungible,
            AssetKind::NonFungible => &self.non_fungible,
        }
    }

    /// Set up a fungible shield for `account` on `engine`
    pub async fn fungible_shield(&self, engine: Engine, account: &str) -> ShieldResult<FungibleShield> {
        let ctx = self.context(account, AssetKind::Fungible)?;
        FungibleShield::setup(engine, self.fungible.clone(), &ctx).await
    }

    /// Set up a non-fungible shield for `account` on `engine`
    pub async fn non_fungible_shield(&self, engine: Engine, account: &str) -> ShieldResult<NonFungibleShield> {
        let ctx = self.context(account, AssetKind::NonFungible)?;
        NonFungibleShield::setup(engine, self.non_fungible.clone(), &ctx).await
    }
}

impl Default for Devnet {
    fn default() -> Self {
        Self::new()
    }
}
