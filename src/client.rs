//! Chain client - narrow read/write primitives over an alloy provider
//!
//! Everything the keeper knows about the chain goes through this file: view
//! calls on the gauge and settlement-fee oracle, header/base-fee reads, gas
//! estimation, the competing-tip scan, and raw transaction broadcast with
//! receipt confirmation. The pipeline above it never touches the provider
//! directly.

use alloy_consensus::Transaction as _;
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_provider::Provider;
use alloy_rpc_types::{BlockNumberOrTag, Filter, TransactionRequest};
use alloy_sol_types::{sol, SolCall, SolValue};
use eyre::{eyre, Result};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::PoolConfig;

// ============================================
// CONTRACT INTERFACES
// ============================================

sol! {
    /// Vault/lender entry point; harvesting compounds the pending reward
    /// and pays the caller a bounty.
    interface IVaultLender {
        function reinvest() external;
    }

    /// Reward gauge tracking the vault's liquidity position.
    interface IRewardGauge {
        function earned(address account) external view returns (uint256);
        function rewardRate() external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
        function totalSupply() external view returns (uint256);
    }

    /// OP-stack predeploy quoting the settlement-layer posting fee for a
    /// serialized signed transaction.
    interface IGasPriceOracle {
        function getL1Fee(bytes data) external view returns (uint256);
    }
}

/// ABI-encoded calldata of the harvest call.
pub fn harvest_calldata() -> Vec<u8> {
    IVaultLender::reinvestCall {}.abi_encode()
}

// ============================================
// CHAIN CLIENT
// ============================================

/// Outcome of a broadcast-and-confirm attempt. Broadcast failures are
/// reported as errors; anything after a successful broadcast is a variant
/// here so the control loop can back off appropriately.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Confirmed { hash: B256, success: bool },
    TimedOut { hash: B256 },
}

#[derive(Clone)]
pub struct ChainClient<P> {
    provider: P,
    sender: Address,
    lender: Address,
    gauge: Address,
}

impl<P: Provider> ChainClient<P> {
    pub fn new(provider: P, cfg: &PoolConfig) -> Self {
        Self {
            provider,
            sender: cfg.sender,
            lender: cfg.lender,
            gauge: cfg.gauge,
        }
    }

    /// Call a view function returning a single uint256.
    async fn call_u256(&self, to: Address, calldata: Vec<u8>, label: &str) -> Result<U256> {
        let tx = TransactionRequest::default().to(to).input(calldata.into());
        let raw = self
            .provider
            .call(tx)
            .await
            .map_err(|e| eyre!("failed to call {label}: {e}"))?;
        U256::abi_decode(&raw).map_err(|e| eyre!("unexpected {label} return data: {e}"))
    }

    /// Reward already earned by the vault, as of the last confirmed block.
    pub async fn pending_reward(&self) -> Result<U256> {
        let call = IRewardGauge::earnedCall { account: self.lender };
        self.call_u256(self.gauge, call.abi_encode(), "earned").await
    }

    /// Gauge emission rate in reward tokens per second.
    pub async fn reward_rate(&self) -> Result<U256> {
        self.call_u256(self.gauge, IRewardGauge::rewardRateCall {}.abi_encode(), "rewardRate")
            .await
    }

    /// The vault's LP balance staked in the gauge.
    pub async fn gauge_balance(&self) -> Result<U256> {
        let call = IRewardGauge::balanceOfCall { account: self.lender };
        self.call_u256(self.gauge, call.abi_encode(), "balanceOf").await
    }

    pub async fn gauge_total_supply(&self) -> Result<U256> {
        self.call_u256(self.gauge, IRewardGauge::totalSupplyCall {}.abi_encode(), "totalSupply")
            .await
    }

    /// Ask the settlement-fee oracle what posting `raw_tx` will cost.
    pub async fn quote_data_fee(&self, oracle: Address, raw_tx: &[u8]) -> Result<U256> {
        let call = IGasPriceOracle::getL1FeeCall {
            data: Bytes::copy_from_slice(raw_tx),
        };
        self.call_u256(oracle, call.abi_encode(), "getL1Fee").await
    }

    pub async fn block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| eyre!("failed to get block number: {e}"))
    }

    /// Base fee per gas of the latest block header.
    pub async fn header_base_fee(&self) -> Result<u128> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(|e| eyre!("failed to get latest block header: {e}"))?
            .ok_or_else(|| eyre!("latest block header unavailable"))?;

        block
            .header
            .base_fee_per_gas
            .map(u128::from)
            .ok_or_else(|| eyre!("chain reports no base fee"))
    }

    /// Estimated gas for the harvest call from the keeper wallet.
    pub async fn estimate_harvest_gas(&self) -> Result<u64> {
        let tx = TransactionRequest::default()
            .from(self.sender)
            .to(self.lender)
            .input(harvest_calldata().into());
        self.provider
            .estimate_gas(tx)
            .await
            .map_err(|e| eyre!("failed to estimate harvest gas: {e}"))
    }

    pub async fn pending_nonce(&self) -> Result<u64> {
        self.provider
            .get_transaction_count(self.sender)
            .pending()
            .await
            .map_err(|e| eyre!("failed to get pending nonce: {e}"))
    }

    /// Highest priority fee another keeper paid to touch the lender
    /// recently, or `None` if no competing transaction was seen.
    ///
    /// Scans the last `block_range` blocks of lender logs, de-duplicates
    /// consecutive logs from the same transaction, and ignores our own
    /// wallet. Note the scanned transactions may land across several
    /// blocks; this is an accepted approximation of "the going rate".
    pub async fn observed_competing_tip(&self, block_range: u64) -> Result<Option<u128>> {
        let head = self.block_number().await?;
        let from = head.saturating_sub(block_range);
        let filter = Filter::new()
            .address(self.lender)
            .from_block(from)
            .to_block(head);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| eyre!("failed to filter lender logs: {e}"))?;

        let mut best: Option<u128> = None;
        let mut previous: Option<B256> = None;

        for log in logs {
            let Some(hash) = log.transaction_hash else {
                continue;
            };
            // consecutive logs usually belong to the same transaction
            if previous == Some(hash) {
                continue;
            }
            previous = Some(hash);

            let tx = match self.provider.get_transaction_by_hash(hash).await {
                Ok(Some(tx)) => tx,
                Ok(None) => continue,
                Err(e) => {
                    warn!(%hash, "failed to fetch transaction: {e}");
                    continue;
                }
            };

            if tx.inner.signer() == self.sender {
                continue;
            }
            if let Some(tip) = tx.max_priority_fee_per_gas() {
                if best.map_or(true, |b| tip > b) {
                    best = Some(tip);
                }
            }
        }

        Ok(best)
    }

    /// Broadcast a signed raw transaction and wait for its receipt.
    pub async fn submit_harvest(&self, raw: &[u8], timeout: Duration) -> Result<SubmitOutcome> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| eyre!("failed to broadcast harvest transaction: {e}"))?;

        let hash = *pending.tx_hash();
        debug!(%hash, "broadcast harvest transaction");

        match pending.with_timeout(Some(timeout)).get_receipt().await {
            Ok(receipt) => Ok(SubmitOutcome::Confirmed {
                hash,
                success: receipt.status(),
            }),
            Err(e) => {
                debug!(%hash, "receipt wait gave up: {e}");
                Ok(SubmitOutcome::TimedOut { hash })
            }
        }
    }
}
