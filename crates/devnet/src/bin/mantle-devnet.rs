use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mantle_core::{AssetKind, CorrectnessClaim, Engine, HttpMirrorClient, SecretKey};
use mantle_devnet::{dev_config, server, Devnet, LocalMirror};

#[derive(Debug, Parser)]
#[command(author, version, about = "Run shielded mint, transfer, check and burn against an in-process devnet", long_about = None)]
struct Cli {
    /// Amount shielded by each of the two mints
    #[arg(long, default_value_t = 10_000)]
    amount: u128,

    /// Amount sent to the receiver
    #[arg(long, default_value_t = 4_000)]
    send: u128,

    /// Let the mirror lag, syncing on this interval in milliseconds
    #[arg(long)]
    mirror_lag_ms: Option<u64>,

    /// Talk to the mirror over HTTP instead of in-process
    #[arg(long)]
    http: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let devnet = match cli.mirror_lag_ms {
        Some(_) => Devnet::with_mirror(LocalMirror::new(), dev_config()),
        None => Devnet::new(),
    };
    let _follower = cli
        .mirror_lag_ms
        .map(|ms| devnet.mirror.follow(Duration::from_millis(ms)));

    let engine = if cli.http {
        let listener = TcpListener::bind("127.0.0.1:0").await.context("failed to bind mirror listener")?;
        let addr = listener.local_addr()?;
        tokio::spawn(server::serve(listener, devnet.mirror.clone()));

        let mut config = devnet.config.clone();
        config.mirror.url = format!("http://{}", addr);
        let mirror = HttpMirrorClient::new(&config.mirror)?;
        Engine::new(Arc::new(mirror), devnet.prover.clone(), config)
    } else {
        devnet.engine()
    };

    let alice = SecretKey::random();
    let bob = SecretKey::random();
    devnet.fungible.credit("alice", cli.amount.saturating_mul(2));

    let shield = devnet
        .fungible_shield(engine, "alice")
        .await
        .context("fungible shield setup failed")?;
    let alice_ctx = devnet.context("alice", AssetKind::Fungible)?;
    let bob_ctx = devnet.context("bob", AssetKind::Fungible)?;

    let first = shield.mint(&alice_ctx, cli.amount, alice.public_key()).await?;
    let second = shield.mint(&alice_ctx, cli.amount, alice.public_key()).await?;
    info!(
        first = ?first.commitment.leaf_index(),
        second = ?second.commitment.leaf_index(),
        balance = devnet.fungible.balance_of("alice"),
        "Minted"
    );

    let sent = shield
        .send(&alice_ctx, &alice, [first.commitment, second.commitment], bob.public_key(), cli.send)
        .await
        .context("transfer failed")?;
    let received = sent
        .outputs
        .first()
        .cloned()
        .context("transfer produced no outputs")?;
    info!(block = sent.block_number, outputs = sent.outputs.len(), "Sent");

    let claim = CorrectnessClaim {
        disclosed: received.disclose(),
        commitment: received.hash,
        leaf_index: received.leaf_index().context("received commitment has no leaf index")?,
        mined_at_block: sent.block_number,
    };
    let report = shield.check_correctness(&bob_ctx, &claim).await?;
    info!(
        hash_matches = report.hash_matches,
        on_chain_matches = report.on_chain_matches,
        "Receiver checked commitment"
    );
    anyhow::ensure!(report.is_valid(), "received commitment failed its correctness check");

    let burned = shield.burn(&bob_ctx, &bob, &received, "bob").await?;
    info!(
        block = burned.block_number,
        bob = devnet.fungible.balance_of("bob"),
        alice = devnet.fungible.balance_of("alice"),
        root = %devnet.fungible.root(),
        "Burned to public balance"
    );

    println!("{}", serde_json::to_string_pretty(&burned.record)?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
