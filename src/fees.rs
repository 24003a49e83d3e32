//! Execution-layer fee calculator
//!
//! Builds the EIP-1559 fee quote for the harvest transaction and renders
//! the first profitability verdict. This stage is deliberately loose: its
//! only job is to throw away clearly-unprofitable cycles before the more
//! expensive data-layer estimate runs.

use alloy_primitives::U256;
use eyre::{eyre, Result};
use rand::Rng;
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::numeric::{apply_percentage, convert_to_settlement, percent_difference};
use crate::snapshot::Snapshot;

/// Estimates under this are treated as suspect, not fatal; the configured
/// fallback is substituted.
pub const GAS_SANITY_FLOOR: u64 = 100_000;

/// Headroom added to the raw estimate for execution, to keep a reward that
/// grew since estimation from running the call out of gas.
pub const GAS_LIMIT_PAD_PCT: u64 = 30;

/// First-stage threshold. Looser than the pool's configured threshold
/// because the data-layer fee is still unknown here.
pub const PASS_THROUGH_THRESHOLD_PCT: f64 = -10.0;

// ============================================
// FEE QUOTE
// ============================================

/// EIP-1559 fee parameters for one candidate transaction. Produced fresh
/// every iteration; fee markets move every block, so these are never
/// cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeQuote {
    /// Gas limit to execute with (already padded).
    pub gas_limit: u64,
    /// Max fee per gas: base fee + chosen priority fee.
    pub fee_cap: u128,
    /// Chosen priority fee per gas.
    pub tip_cap: u128,
    /// Total fee priced at the raw estimate: `raw_gas_limit * fee_cap`.
    pub transaction_fee: U256,
}

/// Construct the quote for a base fee, priority fee and raw gas estimate.
pub fn build_fee_quote(base_fee: u128, priority_fee: u128, gas_limit: u64) -> FeeQuote {
    let fee_cap = base_fee + priority_fee;
    FeeQuote {
        gas_limit,
        fee_cap,
        tip_cap: priority_fee,
        transaction_fee: U256::from(gas_limit) * U256::from(fee_cap),
    }
}

// ============================================
// VERDICT
// ============================================

#[derive(Debug, Clone)]
pub struct ExecutionVerdict {
    pub worth_it: bool,
    pub quote: FeeQuote,
    /// Predicted bounty converted into the settlement asset.
    pub bounty_in_settlement: U256,
    /// Signed margin over the execution-layer fee, in percent.
    pub margin_pct: f64,
}

/// Draw this iteration's tip bump from the configured jitter range.
///
/// Sampled by the caller, not inside [`evaluate_execution_fee`], so the
/// calculator itself stays deterministic for a given input.
pub fn draw_jitter_pct(range: (u32, u32)) -> u32 {
    rand::thread_rng().gen_range(range.0..=range.1)
}

/// First profitability verdict for one snapshot.
///
/// Abandons the iteration (error) when no competing priority fee was
/// observed - pricing against an assumed zero tip would look profitable
/// exactly when it is least likely to be.
pub fn evaluate_execution_fee(
    cfg: &PoolConfig,
    snapshot: &Snapshot,
    bounty: U256,
    jitter_pct: u32,
) -> Result<ExecutionVerdict> {
    let raw_gas_limit = if snapshot.gas_limit_estimate < GAS_SANITY_FLOOR {
        warn!(
            estimate = snapshot.gas_limit_estimate,
            fallback = cfg.fallback_gas_limit,
            "gas estimate below sanity floor, substituting fallback"
        );
        cfg.fallback_gas_limit
    } else {
        snapshot.gas_limit_estimate
    };

    let observed = snapshot
        .competing_tip
        .ok_or_else(|| eyre!("no competing priority fee observed, skipping this cycle"))?;

    let priority_fee = apply_percentage(observed.max(cfg.priority_fee_floor), jitter_pct);

    let mut quote = build_fee_quote(snapshot.base_fee_per_gas, priority_fee, raw_gas_limit);
    // priced on the raw estimate, executed with headroom
    quote.gas_limit = raw_gas_limit + raw_gas_limit * GAS_LIMIT_PAD_PCT / 100;

    let bounty_in_settlement = convert_to_settlement(bounty, snapshot.reward_price_ratio);
    let margin_pct = percent_difference(bounty_in_settlement, quote.transaction_fee);

    debug!(
        bounty = %bounty_in_settlement,
        transaction_fee = %quote.transaction_fee,
        priority_fee,
        margin_pct,
        "execution-layer estimate"
    );

    Ok(ExecutionVerdict {
        worth_it: margin_pct > PASS_THROUGH_THRESHOLD_PCT,
        quote,
        bounty_in_settlement,
        margin_pct,
    })
}
