//! Pool configuration
//!
//! One running keeper instance is parameterized by exactly one pool.
//! Everything the loop needs is assembled into a single `PoolConfig` at
//! startup and passed by reference from there on - no process-wide state.

use alloy_primitives::{address, Address, U256};
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

use crate::numeric::ONE_E18;

/// OP-stack gas price oracle predeploy, same address on every OP chain.
pub const GAS_PRICE_ORACLE: Address = address!("420000000000000000000000000000000000000f");

/// Tarot pays 2% of the reinvested reward to the caller.
const TAROT_REINVEST_BOUNTY: U256 = U256::from_limbs([20_000_000_000_000_000, 0, 0, 0]);

/// Impermax pays 1%.
const IMPERMAX_REINVEST_BOUNTY: U256 = U256::from_limbs([10_000_000_000_000_000, 0, 0, 0]);

const DEFAULT_HARVEST_LOG_PATH: &str = "./logs/harvests.log";

// ============================================
// CHAIN / PROTOCOL / POOL IDENTIFIERS
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Chain {
    Optimism,
    Base,
}

impl Chain {
    pub fn id(&self) -> u64 {
        match self {
            Chain::Optimism => 10,
            Chain::Base => 8453,
        }
    }

    /// Chain slug used by the price API.
    pub fn slug(&self) -> &'static str {
        match self {
            Chain::Optimism => "optimism",
            Chain::Base => "base",
        }
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Chain::Optimism => write!(f, "OPTIMISM"),
            Chain::Base => write!(f, "BASE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Protocol {
    Tarot,
    Impermax,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tarot => write!(f, "TAROT"),
            Protocol::Impermax => write!(f, "IMPERMAX"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum PoolId {
    UsdcAero,
    WethTarot,
    FbombCbbtc,
}

impl std::fmt::Display for PoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolId::UsdcAero => write!(f, "USDC_AERO"),
            PoolId::WethTarot => write!(f, "WETH_TAROT"),
            PoolId::FbombCbbtc => write!(f, "FBOMB_CBBTC"),
        }
    }
}

// ============================================
// POOL CONFIGURATION
// ============================================

/// Everything one keeper instance needs to know about its pool.
///
/// Immutable after startup. The bounty fraction and profitability threshold
/// are protocol constants, not secrets, and are validated before the loop
/// starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub chain: Chain,

    /// Keeper wallet address (derived from the wallet key).
    pub sender: Address,

    /// Vault/lender contract exposing the harvest entry point.
    pub lender: Address,

    /// Reward gauge tracking the vault's accrued reward.
    pub gauge: Address,

    /// Settlement-fee oracle; `None` on chains without a data layer.
    pub data_fee_oracle: Option<Address>,

    /// Pair the price API is asked for the reward/settlement ratio.
    pub price_pair: Address,

    /// Minimum priority fee to bid, in wei per gas.
    pub priority_fee_floor: u128,

    /// Caller share of the harvested reward, 1e18 scale.
    pub bounty_fraction: U256,

    /// Gas limit substituted when the estimate is implausibly low.
    pub fallback_gas_limit: u64,

    /// Uniform (min%, max%) bump applied to the chosen priority fee so
    /// competing keepers cannot predict our bid.
    pub tip_jitter_pct: (u32, u32),

    /// Final profitability threshold, a signed percentage of total cost.
    pub profit_threshold_pct: f64,

    /// How many blocks back to scan for competing harvest transactions.
    pub block_range_filter: u64,

    pub harvest_log: bool,
    pub harvest_log_path: String,
}

impl PoolConfig {
    /// Assemble the configuration for a known (chain, protocol, pool)
    /// combination.
    pub fn preset(chain: Chain, protocol: Protocol, pool: PoolId, sender: Address) -> Result<Self> {
        let cfg = match (chain, protocol, pool) {
            (Chain::Base, Protocol::Tarot, PoolId::UsdcAero) => Self {
                chain,
                sender,
                lender: address!("042c37762d1d126bc61eac2f5ceb7a96318f5db9"),
                gauge: address!("4f09bab2f0e15e2a078a227fe1537665f55b8360"),
                data_fee_oracle: Some(GAS_PRICE_ORACLE),
                price_pair: address!("7f670f78b17dec44d5ef68a48740b6f8849cc2e6"),
                priority_fee_floor: 5_678,
                bounty_fraction: TAROT_REINVEST_BOUNTY,
                fallback_gas_limit: 500_000,
                tip_jitter_pct: (20, 25),
                profit_threshold_pct: 0.0,
                block_range_filter: 20,
                harvest_log: true,
                harvest_log_path: DEFAULT_HARVEST_LOG_PATH.to_string(),
            },
            (Chain::Optimism, Protocol::Tarot, PoolId::WethTarot) => Self {
                chain,
                sender,
                lender: address!("80942a0066f72efff5900cf80c235dd32549b75d"),
                gauge: address!("73d5c2f4eb0e4eb15b3234f8b880a10c553da1ea"),
                data_fee_oracle: Some(GAS_PRICE_ORACLE),
                price_pair: address!("39ed27d101aa4b7ce1cb4293b877954b8b5e14e5"),
                priority_fee_floor: 5_678,
                bounty_fraction: TAROT_REINVEST_BOUNTY,
                fallback_gas_limit: 500_000,
                tip_jitter_pct: (20, 25),
                profit_threshold_pct: 0.0,
                block_range_filter: 20,
                harvest_log: true,
                harvest_log_path: DEFAULT_HARVEST_LOG_PATH.to_string(),
            },
            (Chain::Base, Protocol::Impermax, PoolId::FbombCbbtc) => Self {
                chain,
                sender,
                lender: address!("aa9f575a3fbf36d54fa3270fe25d4bb7bb3ba3ae"),
                gauge: address!("a95ebefbcb77ae1daf0d2123784594f8cce90274"),
                data_fee_oracle: Some(GAS_PRICE_ORACLE),
                price_pair: address!("9a0b05f3cf748a114f202fbb4f4f1fd9979e936e"),
                priority_fee_floor: 56_780,
                bounty_fraction: IMPERMAX_REINVEST_BOUNTY,
                fallback_gas_limit: 500_000,
                tip_jitter_pct: (8, 20),
                profit_threshold_pct: -6.0,
                block_range_filter: 20,
                harvest_log: true,
                harvest_log_path: DEFAULT_HARVEST_LOG_PATH.to_string(),
            },
            _ => {
                return Err(eyre!(
                    "no pool configured for chain={chain} protocol={protocol} pool={pool}"
                ))
            }
        };

        Ok(cfg)
    }

    /// Load a pool configuration from a TOML file instead of a preset.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Reject wiring mistakes before the loop ever runs; these are the
    /// only errors that may terminate the process.
    pub fn validate(&self) -> Result<()> {
        if self.sender == Address::ZERO {
            return Err(eyre!("sender address is not set"));
        }
        if self.lender == Address::ZERO || self.gauge == Address::ZERO {
            return Err(eyre!("contract wiring is incomplete (lender/gauge)"));
        }
        if self.bounty_fraction.is_zero() || self.bounty_fraction > ONE_E18 {
            return Err(eyre!("bounty fraction must be within (0, 1e18]"));
        }
        if self.tip_jitter_pct.0 > self.tip_jitter_pct.1 {
            return Err(eyre!(
                "tip jitter range is inverted: {} > {}",
                self.tip_jitter_pct.0,
                self.tip_jitter_pct.1
            ));
        }
        if !self.profit_threshold_pct.is_finite() {
            return Err(eyre!("profit threshold must be a finite percentage"));
        }
        if self.fallback_gas_limit == 0 {
            return Err(eyre!("fallback gas limit must be non-zero"));
        }
        if self.block_range_filter == 0 {
            return Err(eyre!("block range filter must be non-zero"));
        }
        Ok(())
    }
}

// ============================================
// SECRETS
// ============================================

/// Endpoint and key material resolved from the environment (`.env`
/// supported). Missing variables are fatal at startup, never mid-loop.
pub struct Secrets {
    pub rpc_read_url: String,
    pub rpc_write_url: String,
    pub wallet_key: String,
}

impl Secrets {
    pub fn from_env(chain: Chain) -> Result<Self> {
        dotenvy::dotenv().ok();

        let prefix = match chain {
            Chain::Optimism => "OPTIMISM",
            Chain::Base => "BASE",
        };

        Ok(Self {
            rpc_read_url: require_env(&format!("RPC_NODE_{prefix}_READ"))?,
            rpc_write_url: require_env(&format!("RPC_NODE_{prefix}_WRITE"))?,
            wallet_key: require_env("WALLET_PRIVATE_KEY")?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    env::var(key).map_err(|_| eyre!("environment variable {key} is required but not set"))
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_sender() -> Address {
        address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266")
    }

    #[test]
    fn test_preset_lookup() {
        let cfg =
            PoolConfig::preset(Chain::Base, Protocol::Tarot, PoolId::UsdcAero, test_sender())
                .unwrap();
        assert_eq!(cfg.chain.id(), 8453);
        assert_eq!(cfg.bounty_fraction, TAROT_REINVEST_BOUNTY);
        assert_eq!(cfg.tip_jitter_pct, (20, 25));
        cfg.validate().unwrap();
    }

    #[test]
    fn test_unknown_combination_is_rejected() {
        let err = PoolConfig::preset(
            Chain::Optimism,
            Protocol::Impermax,
            PoolId::UsdcAero,
            test_sender(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_wiring() {
        let mut cfg =
            PoolConfig::preset(Chain::Base, Protocol::Tarot, PoolId::UsdcAero, test_sender())
                .unwrap();
        cfg.sender = Address::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg =
            PoolConfig::preset(Chain::Base, Protocol::Tarot, PoolId::UsdcAero, test_sender())
                .unwrap();
        cfg.bounty_fraction = U256::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg =
            PoolConfig::preset(Chain::Base, Protocol::Tarot, PoolId::UsdcAero, test_sender())
                .unwrap();
        cfg.tip_jitter_pct = (25, 20);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_impermax_preset_constants() {
        let cfg = PoolConfig::preset(
            Chain::Base,
            Protocol::Impermax,
            PoolId::FbombCbbtc,
            test_sender(),
        )
        .unwrap();
        assert_eq!(cfg.priority_fee_floor, 56_780);
        assert_eq!(cfg.tip_jitter_pct, (8, 20));
        assert_eq!(cfg.profit_threshold_pct, -6.0);
        assert_eq!(cfg.bounty_fraction, IMPERMAX_REINVEST_BOUNTY);
    }
}
