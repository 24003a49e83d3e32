//! Pair-price oracle (DexScreener)
//!
//! Fetches the reward-token/settlement-asset price ratio for the
//! configured pair and parses it into a 1e18-scaled integer. The keeper
//! only ever needs this one number; anything fancier (candles, liquidity)
//! stays out.

use alloy_primitives::{Address, U256};
use eyre::{eyre, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::config::Chain;
use crate::numeric::parse_wei_string;

const DEXSCREENER_API_URL: &str = "https://api.dexscreener.com/latest/dex/pairs";

/// Timeout for API calls
const API_TIMEOUT_SECS: u64 = 5;

// ============================================
// API RESPONSE TYPES
// ============================================

#[derive(Debug, Deserialize)]
struct PairPriceResponse {
    pairs: Option<Vec<Pair>>,
}

#[derive(Debug, Deserialize)]
struct Pair {
    #[serde(rename = "priceNative")]
    price_native: String,
}

// ============================================
// PRICE FEED
// ============================================

pub struct PriceFeed {
    http_client: Client,
    endpoint: String,
    chain_slug: &'static str,
    pair: Address,
}

impl PriceFeed {
    pub fn new(chain: Chain, pair: Address) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            endpoint: DEXSCREENER_API_URL.to_string(),
            chain_slug: chain.slug(),
            pair,
        }
    }

    /// Latest pair price as a 1e18-scaled ratio.
    pub async fn pair_price(&self) -> Result<U256> {
        let url = format!("{}/{}/{}", self.endpoint, self.chain_slug, self.pair);

        let response: PairPriceResponse = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| eyre!("price api request failed: {e}"))?
            .error_for_status()
            .map_err(|e| eyre!("price api returned an error status: {e}"))?
            .json()
            .await
            .map_err(|e| eyre!("price api sent malformed json: {e}"))?;

        let pair = response
            .pairs
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| eyre!("no pairs in price api response"))?;

        parse_wei_string(&pair.price_native)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair_response() {
        let body = r#"{"schemaVersion":"1.0.0","pairs":[{"priceNative":"0.00003192","priceUsd":"0.08"}]}"#;
        let response: PairPriceResponse = serde_json::from_str(body).unwrap();
        let pair = response.pairs.unwrap().into_iter().next().unwrap();
        let price = parse_wei_string(&pair.price_native).unwrap();
        assert_eq!(price, U256::from(31_920_000_000_000u64));
    }

    #[test]
    fn test_empty_pairs_is_an_error_shape() {
        let body = r#"{"pairs":null}"#;
        let response: PairPriceResponse = serde_json::from_str(body).unwrap();
        assert!(response.pairs.unwrap_or_default().is_empty());
    }
}
