//! Fixed-point helpers for monetary arithmetic
//!
//! Every token amount and fee in this crate is an integer number of wei
//! (or a 1e18-scaled ratio). Floating point only ever appears at the very
//! end, when a profit margin is expressed as a percentage for the verdict.

use alloy_primitives::U256;
use eyre::{eyre, Result};

/// 1e18, the scale of wei amounts and of the price ratio.
pub const ONE_E18: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Parse a decimal string (e.g. `"0.00003182"` from the price API) into a
/// 1e18-scaled integer.
///
/// The parse is digit-based: the string is never routed through a float,
/// so `"0.00003182"` becomes exactly `31820000000000`. Fractional digits
/// beyond the 18th are truncated.
pub fn parse_wei_string(raw: &str) -> Result<U256> {
    let trimmed = raw.trim();
    let mut parts = trimmed.splitn(2, '.');
    let int_part = parts.next().unwrap_or("");
    let frac_part = parts.next().unwrap_or("");

    if trimmed.is_empty() || (int_part.is_empty() && frac_part.is_empty()) {
        return Err(eyre!("empty decimal string"));
    }
    if trimmed.starts_with('-') {
        return Err(eyre!("negative value not allowed: {trimmed}"));
    }
    if !trimmed.is_ascii() {
        return Err(eyre!("{trimmed} is not a number"));
    }

    let frac = &frac_part[..frac_part.len().min(18)];
    let scale = 18 - frac.len();

    let digits = format!("{int_part}{frac}");
    let digits = if digits.is_empty() { "0".to_string() } else { digits };
    let value = U256::from_str_radix(&digits, 10)
        .map_err(|e| eyre!("{trimmed} is not a number: {e}"))?;

    Ok(value * U256::from(10u64).pow(U256::from(scale)))
}

/// Convert a reward-token amount into the settlement asset using a
/// 1e18-scaled price ratio: `amount * ratio / 1e18`.
pub fn convert_to_settlement(amount: U256, ratio: U256) -> U256 {
    amount * ratio / ONE_E18
}

/// `(value - cost) / cost * 100`, signed.
///
/// This is the only place monetary values meet floating point; both inputs
/// are totals far below 2^128 so the conversion is exact enough for a
/// go/no-go percentage.
pub fn percent_difference(value: U256, cost: U256) -> f64 {
    let v = to_f64(value);
    let c = to_f64(cost);
    if c == 0.0 {
        return if v == 0.0 { 0.0 } else { f64::INFINITY };
    }
    (v - c) / c * 100.0
}

/// Increase `value` by `pct` percent, in integer space.
pub fn apply_percentage(value: u128, pct: u32) -> u128 {
    value + value * pct as u128 / 100
}

fn to_f64(v: U256) -> f64 {
    v.into_limbs()
        .iter()
        .rev()
        .fold(0.0, |acc, &limb| acc * 2f64.powi(64) + limb as f64)
}
