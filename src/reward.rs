//! Reward estimator
//!
//! The gauge's `earned` read is already stale when it returns: the harvest
//! lands a few blocks later and the gauge keeps emitting in between. The
//! estimator extrapolates the observed reward forward over the expected
//! inclusion window, apportioned to the vault's share of the gauge, and
//! then extracts the caller bounty. All integer arithmetic; monetary
//! values never touch floating point here.

use alloy_primitives::U256;

use crate::numeric::ONE_E18;

/// Expected seconds between observing the pending reward and the harvest
/// transaction landing (about one rollup block).
pub const EXPECTED_INCLUSION_SECS: u64 = 2;

/// Forward-looking pending reward:
/// `observed + rate * seconds * gauge_balance / gauge_total_supply`.
///
/// The balance/total-supply ratio apportions the gauge's total emission to
/// the vault's ownership share. A zero total supply (gauge drained)
/// degrades to the observed value.
pub fn predict_pending_reward(
    observed: U256,
    reward_rate: U256,
    seconds: u64,
    gauge_balance: U256,
    gauge_total_supply: U256,
) -> U256 {
    if gauge_total_supply.is_zero() {
        return observed;
    }
    observed + reward_rate * U256::from(seconds) * gauge_balance / gauge_total_supply
}

/// The slice of the harvested reward the keeper actually nets:
/// `predicted * bounty_fraction / 1e18`.
pub fn bounty_share(predicted_reward: U256, bounty_fraction: U256) -> U256 {
    predicted_reward * bounty_fraction / ONE_E18
}
