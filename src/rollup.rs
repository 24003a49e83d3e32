//! Data-layer fee estimator - rollup settlement-fee model
//!
//! On an OP-stack chain the execution-layer quote misses the fee charged
//! for posting the transaction's data to the settlement layer, which can
//! dominate total cost for a small harvest call. The oracle predeploy
//! quotes that fee, but it wants the fully-serialized *signed* transaction
//! as input - so the candidate transaction is built and signed here, and
//! the same bytes are reused for broadcast if the verdict passes.

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{TxKind, U256};
use alloy_provider::Provider;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use eyre::{eyre, Result};
use tracing::{debug, trace};

use crate::client::{harvest_calldata, ChainClient};
use crate::config::PoolConfig;
use crate::fees::FeeQuote;
use crate::numeric::percent_difference;

/// The oracle pads its quote to absorb settlement base-fee swings between
/// quoting and posting; a flat haircut brings it back toward realized cost.
pub const L1_FEE_DISCOUNT_PCT: u64 = 10;

#[derive(Debug, Clone)]
pub struct DataLayerVerdict {
    pub worth_it: bool,
    /// Signed raw transaction, reused for broadcast without re-signing.
    pub raw_transaction: Vec<u8>,
    /// Discounted settlement fee (zero when the pool has no oracle).
    pub data_fee: U256,
    /// Execution fee + discounted settlement fee.
    pub total_cost: U256,
    /// Signed margin over the total cost, in percent.
    pub margin_pct: f64,
}

/// Apply the safety haircut to an oracle quote.
pub fn discount_data_fee(quoted: U256) -> U256 {
    quoted - quoted * U256::from(L1_FEE_DISCOUNT_PCT) / U256::from(100u64)
}

/// Build and locally sign the EIP-1559 harvest transaction.
pub async fn sign_harvest_tx(
    cfg: &PoolConfig,
    signer: &PrivateKeySigner,
    nonce: u64,
    quote: &FeeQuote,
) -> Result<Vec<u8>> {
    let tx = TxEip1559 {
        chain_id: cfg.chain.id(),
        nonce,
        gas_limit: quote.gas_limit,
        max_fee_per_gas: quote.fee_cap,
        max_priority_fee_per_gas: quote.tip_cap,
        to: TxKind::Call(cfg.lender),
        value: U256::ZERO,
        input: harvest_calldata().into(),
        access_list: Default::default(),
    };

    let sig_hash = tx.signature_hash();
    let signature = signer
        .sign_hash(&sig_hash)
        .await
        .map_err(|e| eyre!("failed to sign harvest transaction: {e}"))?;

    let envelope = TxEnvelope::Eip1559(tx.into_signed(signature));
    let mut raw = Vec::new();
    envelope.encode_2718(&mut raw);

    trace!(bytes = raw.len(), raw = %hex::encode(&raw), "signed candidate harvest transaction");
    Ok(raw)
}

/// Final profitability verdict, now including the settlement-layer fee.
pub async fn evaluate_data_fee<P: Provider>(
    client: &ChainClient<P>,
    cfg: &PoolConfig,
    signer: &PrivateKeySigner,
    quote: &FeeQuote,
    bounty_in_settlement: U256,
) -> Result<DataLayerVerdict> {
    let nonce = client.pending_nonce().await?;
    let raw_transaction = sign_harvest_tx(cfg, signer, nonce, quote).await?;

    let data_fee = match cfg.data_fee_oracle {
        Some(oracle) => {
            let quoted = client.quote_data_fee(oracle, &raw_transaction).await?;
            let discounted = discount_data_fee(quoted);
            debug!(%quoted, %discounted, "settlement-layer fee quote");
            discounted
        }
        None => U256::ZERO,
    };

    let total_cost = quote.transaction_fee + data_fee;
    let margin_pct = percent_difference(bounty_in_settlement, total_cost);

    Ok(DataLayerVerdict {
        worth_it: margin_pct > cfg.profit_threshold_pct,
        raw_transaction,
        data_fee,
        total_cost,
        margin_pct,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Chain, PoolId, Protocol};
    use crate::fees::build_fee_quote;
    use alloy_eips::eip2718::Decodable2718;
    use std::str::FromStr;

    // well-known development key, never holds funds
    const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_discount_data_fee() {
        assert_eq!(discount_data_fee(U256::from(100u64)), U256::from(90u64));
        assert_eq!(
            discount_data_fee(U256::from(16_268_490_247u64)),
            U256::from(14_641_641_223u64)
        );
        assert_eq!(discount_data_fee(U256::ZERO), U256::ZERO);
    }

    #[tokio::test]
    async fn test_sign_harvest_tx_roundtrips() {
        let signer = PrivateKeySigner::from_str(TEST_KEY).unwrap();
        let cfg = PoolConfig::preset(
            Chain::Base,
            Protocol::Tarot,
            PoolId::UsdcAero,
            signer.address(),
        )
        .unwrap();
        let quote = build_fee_quote(3_116_168 - 556_962, 556_962, 413_043);

        let raw = sign_harvest_tx(&cfg, &signer, 7, &quote).await.unwrap();

        // EIP-2718: type byte 0x02 followed by the RLP payload
        assert_eq!(raw[0], 0x02);

        let envelope = TxEnvelope::decode_2718(&mut raw.as_slice()).unwrap();
        let TxEnvelope::Eip1559(signed) = envelope else {
            panic!("expected an EIP-1559 envelope");
        };
        let tx = signed.tx();
        assert_eq!(tx.chain_id, cfg.chain.id());
        assert_eq!(tx.nonce, 7);
        assert_eq!(tx.gas_limit, quote.gas_limit);
        assert_eq!(tx.max_fee_per_gas, quote.fee_cap);
        assert_eq!(tx.max_priority_fee_per_gas, quote.tip_cap);
        assert_eq!(tx.to, TxKind::Call(cfg.lender));
        assert_eq!(tx.input.as_ref(), harvest_calldata().as_slice());
    }

    #[tokio::test]
    async fn test_signing_is_deterministic_for_identical_inputs() {
        let signer = PrivateKeySigner::from_str(TEST_KEY).unwrap();
        let cfg = PoolConfig::preset(
            Chain::Optimism,
            Protocol::Tarot,
            PoolId::WethTarot,
            signer.address(),
        )
        .unwrap();
        let quote = build_fee_quote(57_143_102, 461_678, 1_090_381);

        let first = sign_harvest_tx(&cfg, &signer, 3, &quote).await.unwrap();
        let second = sign_harvest_tx(&cfg, &signer, 3, &quote).await.unwrap();
        assert_eq!(first, second);
    }
}
