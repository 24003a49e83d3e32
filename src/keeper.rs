//! The keeper control loop
//!
//! One long-lived task per pool instance. Each pass fans out the snapshot
//! reads, runs the two-stage profitability estimate, and - when a cycle
//! finally clears both bars - broadcasts the pre-signed harvest transaction
//! and waits for its receipt. A second, fully independent task refreshes
//! the slow-moving gauge emission rate. Everything non-fatal is absorbed
//! here with a fixed backoff; only startup wiring errors escape to `main`.

use alloy_primitives::U256;
use alloy_provider::Provider;
use alloy_signer_local::PrivateKeySigner;
use chrono::{DateTime, Utc};
use eyre::Result;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::QuoteCache;
use crate::client::{ChainClient, SubmitOutcome};
use crate::config::PoolConfig;
use crate::fees;
use crate::price::PriceFeed;
use crate::reward;
use crate::rollup;
use crate::snapshot;

// ============================================
// CADENCE
// ============================================

/// Delay between ordinary (unprofitable) passes.
const MAIN_LOOP_DELAY: Duration = Duration::from_secs(1);
/// Delay after a confirmed harvest - the reward was just reset, nothing to
/// poll aggressively for.
const SUCCESS_DELAY: Duration = Duration::from_secs(2);
/// Delay after any transient failure.
const ERROR_DELAY: Duration = Duration::from_secs(5);
/// Delay after a confirmation timeout; the network is likely congested.
const CONGESTION_DELAY: Duration = Duration::from_secs(60);

/// Budget for one pass: aggregation through the final verdict.
const ITERATION_TIMEOUT: Duration = Duration::from_secs(10);
/// Budget for broadcast plus receipt confirmation.
const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(20);

/// The gauge emission rate moves on governance timescales.
const RATE_REFRESH_INTERVAL: Duration = Duration::from_secs(300);
const FRESH_BLOCK_POLL: Duration = Duration::from_millis(100);

/// Node error signalling that a previous transaction of ours is still
/// pending with a better fee.
const UNDERPRICED_SIGNAL: &str = "replacement transaction underpriced";

enum Evaluation {
    Submit {
        raw_transaction: Vec<u8>,
        record: HarvestRecord,
    },
    NotWorth {
        stage: &'static str,
        margin_pct: f64,
    },
}

// ============================================
// ENTRY POINT
// ============================================

/// Run the keeper until the shutdown signal fires. Never returns under
/// normal operation.
pub async fn run<P>(
    mut shutdown: watch::Receiver<bool>,
    cfg: PoolConfig,
    reader: ChainClient<P>,
    writer: ChainClient<P>,
    price_feed: PriceFeed,
    signer: PrivateKeySigner,
) -> Result<()>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    let cache = QuoteCache::default();
    let rate_rx = spawn_rate_refresher(shutdown.clone(), reader.clone());

    if wait_for_fresh_block(&mut shutdown, &reader).await? {
        return Ok(());
    }

    info!(chain = %cfg.chain, lender = %cfg.lender, "keeper loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        // latest-or-nothing: never block on the refresher
        let reward_rate = *rate_rx.borrow();

        let evaluation = tokio::select! {
            result = tokio::time::timeout(
                ITERATION_TIMEOUT,
                evaluate_iteration(&cfg, &reader, &price_feed, &cache, &signer, reward_rate),
            ) => result,
            _ = shutdown.changed() => break,
        };

        let delay = match evaluation {
            Err(_) => {
                warn!("iteration deadline elapsed, discarding in-flight reads");
                ERROR_DELAY
            }
            Ok(Err(err)) => {
                warn!("iteration abandoned: {err:#}");
                ERROR_DELAY
            }
            Ok(Ok(Evaluation::NotWorth { stage, margin_pct })) => {
                debug!(stage, margin_pct, "not worth harvesting");
                MAIN_LOOP_DELAY
            }
            Ok(Ok(Evaluation::Submit {
                raw_transaction,
                record,
            })) => submit_and_confirm(&cfg, &writer, &raw_transaction, record).await,
        };

        if pause(&mut shutdown, delay).await {
            break;
        }
    }

    info!("keeper loop stopped");
    Ok(())
}

// ============================================
// ONE PASS
// ============================================

async fn evaluate_iteration<P: Provider>(
    cfg: &PoolConfig,
    reader: &ChainClient<P>,
    price_feed: &PriceFeed,
    cache: &QuoteCache,
    signer: &PrivateKeySigner,
    reward_rate: U256,
) -> Result<Evaluation> {
    let snapshot = snapshot::collect(reader, price_feed, cache, cfg).await?;

    let predicted = reward::predict_pending_reward(
        snapshot.pending_reward,
        reward_rate,
        reward::EXPECTED_INCLUSION_SECS,
        snapshot.gauge_balance,
        snapshot.gauge_total_supply,
    );
    let bounty = reward::bounty_share(predicted, cfg.bounty_fraction);

    let jitter_pct = fees::draw_jitter_pct(cfg.tip_jitter_pct);
    let execution = fees::evaluate_execution_fee(cfg, &snapshot, bounty, jitter_pct)?;
    if !execution.worth_it {
        return Ok(Evaluation::NotWorth {
            stage: "execution-layer",
            margin_pct: execution.margin_pct,
        });
    }

    let data_layer =
        rollup::evaluate_data_fee(reader, cfg, signer, &execution.quote, execution.bounty_in_settlement)
            .await?;

    info!(
        bounty = %execution.bounty_in_settlement,
        execution_fee = %execution.quote.transaction_fee,
        data_fee = %data_layer.data_fee,
        margin_pct = data_layer.margin_pct,
        "final profitability estimate"
    );

    if !data_layer.worth_it {
        return Ok(Evaluation::NotWorth {
            stage: "data-layer",
            margin_pct: data_layer.margin_pct,
        });
    }

    let record = HarvestRecord {
        timestamp: Utc::now(),
        chain: cfg.chain.to_string(),
        lender: cfg.lender.to_string(),
        tx_hash: None,
        predicted_bounty: bounty.to_string(),
        bounty_in_settlement: execution.bounty_in_settlement.to_string(),
        execution_fee: execution.quote.transaction_fee.to_string(),
        data_fee: data_layer.data_fee.to_string(),
        total_cost: data_layer.total_cost.to_string(),
        margin_pct: data_layer.margin_pct,
    };

    Ok(Evaluation::Submit {
        raw_transaction: data_layer.raw_transaction,
        record,
    })
}

/// Broadcast, confirm, and pick the follow-up delay.
async fn submit_and_confirm<P: Provider>(
    cfg: &PoolConfig,
    writer: &ChainClient<P>,
    raw_transaction: &[u8],
    mut record: HarvestRecord,
) -> Duration {
    match writer.submit_harvest(raw_transaction, CONFIRMATION_TIMEOUT).await {
        Err(err) => {
            if err.to_string().contains(UNDERPRICED_SIGNAL) {
                // an earlier attempt of ours is still in the pool; dropping
                // this cycle instead of bidding against ourselves
                warn!("broadcast rejected as underpriced replacement: {err}");
            } else {
                warn!("failed to broadcast harvest transaction: {err}");
            }
            ERROR_DELAY
        }
        Ok(SubmitOutcome::Confirmed { hash, success: true }) => {
            info!(%hash, "harvest confirmed");
            record.tx_hash = Some(format!("{hash:?}"));
            if cfg.harvest_log {
                if let Err(err) = record.append_to_file(&cfg.harvest_log_path) {
                    warn!("failed to append harvest log: {err}");
                }
            }
            SUCCESS_DELAY
        }
        Ok(SubmitOutcome::Confirmed { hash, success: false }) => {
            warn!(%hash, "harvest transaction reverted");
            ERROR_DELAY
        }
        Ok(SubmitOutcome::TimedOut { hash }) => {
            warn!(%hash, "confirmation timed out, assuming congestion");
            CONGESTION_DELAY
        }
    }
}

// ============================================
// BACKGROUND TASKS & HELPERS
// ============================================

/// Spawn the reward-rate refresher. It reads once immediately, then on a
/// fixed interval, publishing through a single-slot channel; the producer
/// never blocks on the loop and the loop never waits on the producer.
fn spawn_rate_refresher<P>(
    mut shutdown: watch::Receiver<bool>,
    client: ChainClient<P>,
) -> watch::Receiver<U256>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    let (tx, rx) = watch::channel(U256::ZERO);

    tokio::spawn(async move {
        loop {
            match client.reward_rate().await {
                Ok(rate) => {
                    debug!(%rate, "reward rate refreshed");
                    tx.send_replace(rate);
                }
                Err(err) => warn!("failed to refresh reward rate: {err}"),
            }

            tokio::select! {
                _ = tokio::time::sleep(RATE_REFRESH_INTERVAL) => {}
                _ = shutdown.changed() => break,
            }
        }
    });

    rx
}

/// Wait until the chain head advances past the startup block, so the first
/// snapshot never works from the state the process booted against.
/// Returns `true` if shutdown fired while waiting.
async fn wait_for_fresh_block<P: Provider>(
    shutdown: &mut watch::Receiver<bool>,
    client: &ChainClient<P>,
) -> Result<bool> {
    let start_block = client.block_number().await?;
    debug!(start_block, "waiting for the chain head to advance");

    loop {
        if *shutdown.borrow() {
            return Ok(true);
        }
        match client.block_number().await {
            Ok(current) if current > start_block => {
                debug!(current, "chain head advanced");
                return Ok(false);
            }
            Ok(_) => {}
            Err(err) => warn!("failed to read block number: {err}"),
        }
        if pause(shutdown, FRESH_BLOCK_POLL).await {
            return Ok(true);
        }
    }
}

/// Sleep for `delay`, returning early (`true`) if shutdown fires first.
async fn pause(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown.changed() => true,
    }
}

// ============================================
// HARVEST LOG
// ============================================

/// One confirmed harvest, appended as a JSON line for offline accounting.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestRecord {
    pub timestamp: DateTime<Utc>,
    pub chain: String,
    pub lender: String,
    pub tx_hash: Option<String>,
    pub predicted_bounty: String,
    pub bounty_in_settlement: String,
    pub execution_fee: String,
    pub data_fee: String,
    pub total_cost: String,
    pub margin_pct: f64,
}

impl HarvestRecord {
    pub fn append_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        let json = serde_json::to_string(self)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pause_completes_when_undisturbed() {
        let (_tx, mut rx) = watch::channel(false);
        let cancelled = pause(&mut rx, Duration::from_millis(5)).await;
        assert!(!cancelled);
    }

    #[tokio::test]
    async fn test_cancellation_mid_sleep_returns_promptly() {
        let (tx, mut rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(true);
        });

        // a one-hour sleep must be cut short well within the test budget
        let cancelled = tokio::time::timeout(
            Duration::from_secs(2),
            pause(&mut rx, Duration::from_secs(3600)),
        )
        .await
        .expect("pause did not react to shutdown");

        assert!(cancelled);
    }

    #[tokio::test]
    async fn test_rate_slot_is_latest_or_nothing() {
        let (tx, rx) = watch::channel(U256::ZERO);

        // consumer sees the initial value before any publish
        assert_eq!(*rx.borrow(), U256::ZERO);

        // two publishes without a read in between: only the latest survives
        tx.send_replace(U256::from(7u64));
        tx.send_replace(U256::from(9u64));
        assert_eq!(*rx.borrow(), U256::from(9u64));

        // borrow never consumes the slot
        assert_eq!(*rx.borrow(), U256::from(9u64));
    }

    #[test]
    fn test_harvest_record_appends_json_lines() {
        let path = std::env::temp_dir().join(format!(
            "harvester-test-{}-{:?}.log",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = fs::remove_file(&path);

        let record = HarvestRecord {
            timestamp: Utc::now(),
            chain: "BASE".to_string(),
            lender: "0x042c37762d1d126bc61eac2f5ceb7a96318f5db9".to_string(),
            tx_hash: Some("0xabc".to_string()),
            predicted_bounty: "15918935974713877".to_string(),
            bounty_in_settlement: "508132436312".to_string(),
            execution_fee: "62660776635184".to_string(),
            data_fee: "14641641223".to_string(),
            total_cost: "62675418276407".to_string(),
            margin_pct: -99.2,
        };

        record.append_to_file(&path).unwrap();
        record.append_to_file(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(parsed["chain"], "BASE");
            assert_eq!(parsed["margin_pct"], -99.2);
        }

        let _ = fs::remove_file(&path);
    }
}
