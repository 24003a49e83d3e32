//! Harvester - unattended vault harvest keeper
//!
//! Watches one yield-vault pool, decides every second or so whether
//! harvesting its pending reward beats the gas bill (execution *and*
//! settlement layer), and submits the harvest when it does.
//!
//! Run with: cargo run -- --chain base --protocol tarot --pool usdc-aero

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use console::style;
use std::str::FromStr;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cache;
mod client;
mod config;
mod fees;
mod keeper;
mod numeric;
mod price;
mod reward;
mod rollup;
mod snapshot;

use alloy_provider::ProviderBuilder;
use alloy_signer_local::PrivateKeySigner;
use client::ChainClient;
use config::{Chain, PoolConfig, PoolId, Protocol, Secrets};
use price::PriceFeed;

#[derive(Parser, Debug)]
#[command(name = "harvester", about = "Autonomous harvest keeper for on-chain yield vaults")]
struct Args {
    /// Blockchain to connect to
    #[arg(long, value_enum)]
    chain: Chain,

    /// Protocol the pool belongs to
    #[arg(long, value_enum)]
    protocol: Protocol,

    /// Pool to harvest
    #[arg(long, value_enum)]
    pool: PoolId,

    /// Optional TOML file overriding the pool preset
    #[arg(long)]
    config: Option<String>,
}

fn print_banner() {
    println!();
    println!(
        "{}",
        style("═══════════════════════════════════════════════").cyan()
    );
    println!(
        "{}",
        style(" 🌾 HARVESTER - Vault Harvest Keeper").cyan().bold()
    );
    println!(
        "{}",
        style("═══════════════════════════════════════════════").cyan()
    );
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("harvester=info".parse()?),
        )
        .init();

    print_banner();

    let args = Args::parse();
    let secrets = Secrets::from_env(args.chain)?;

    let signer = PrivateKeySigner::from_str(secrets.wallet_key.trim_start_matches("0x"))
        .map_err(|e| eyre!("wallet private key error: {e}"))?;

    let cfg = match &args.config {
        Some(path) => {
            let cfg = PoolConfig::from_file(path)?;
            if cfg.sender != signer.address() {
                return Err(eyre!(
                    "configured sender {} does not match the wallet key ({})",
                    cfg.sender,
                    signer.address()
                ));
            }
            cfg
        }
        None => PoolConfig::preset(args.chain, args.protocol, args.pool, signer.address())?,
    };
    cfg.validate()?;

    info!(
        chain = %cfg.chain,
        protocol = %args.protocol,
        pool = %args.pool,
        sender = %cfg.sender,
        lender = %cfg.lender,
        "starting keeper"
    );

    let read_provider = ProviderBuilder::new().connect_http(secrets.rpc_read_url.parse()?);
    let write_provider = ProviderBuilder::new().connect_http(secrets.rpc_write_url.parse()?);

    let reader = ChainClient::new(read_provider, &cfg);
    let writer = ChainClient::new(write_provider, &cfg);
    let price_feed = PriceFeed::new(cfg.chain, cfg.price_pair);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    keeper::run(shutdown_rx, cfg, reader, writer, price_feed, signer).await
}
