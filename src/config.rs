//! Environment configuration
//!
//! The supported chain set is a static mapping keyed by chain id, built once at
//! startup. Every setting has an environment variable; chains known to the
//! platform carry built-in defaults for RPC URL, factory address and decimals.

use alloy::primitives::Address;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

pub const ARBITRUM_CHAIN_ID: u64 = 42161;
pub const MAINNET_CHAIN_ID: u64 = 1;

/// Transfers to this address burn product tokens on principal withdrawal
pub const DEFAULT_BURN_ADDRESS: &str = "0x000000000000000000000000000000000000dEaD";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_SUPPORTED_CHAINS: &str = "42161,1";
const DEFAULT_PENDLE_API_URL: &str = "https://api-v2.pendle.finance/core";

const DEFAULT_DISCOVERY_INTERVAL_SECS: u64 = 60;
const DEFAULT_LOG_POLL_INTERVAL_SECS: u64 = 4;
const DEFAULT_CATCH_UP_BLOCKS: u64 = 50;
const DEFAULT_MAX_LOG_RANGE: u64 = 2000;
const DEFAULT_SETTLEMENT_INTERVAL_SECS: u64 = 60;
const DEFAULT_RETENTION_SECS: u64 = 86400;
const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// Environment variable names
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_BIND_ADDR: &str = "BIND_ADDR";
pub const ENV_SUPPORTED_CHAINS: &str = "SUPPORTED_CHAINS";
pub const ENV_WEBHOOK_SECRET: &str = "WEBHOOK_SECRET";
pub const ENV_WEBHOOK_SIGNATURE_SCHEME: &str = "WEBHOOK_SIGNATURE_SCHEME";
pub const ENV_WEBHOOK_TIMEOUT: &str = "WEBHOOK_TIMEOUT_SECS";
pub const ENV_WEBHOOK_BURN_ADDRESS: &str = "WEBHOOK_BURN_ADDRESS";
pub const ENV_DISCOVERY_INTERVAL: &str = "DISCOVERY_INTERVAL_SECS";
pub const ENV_LOG_POLL_INTERVAL: &str = "LOG_POLL_INTERVAL_SECS";
pub const ENV_CATCH_UP_BLOCKS: &str = "CATCH_UP_BLOCKS";
pub const ENV_MAX_LOG_RANGE: &str = "MAX_LOG_RANGE";
pub const ENV_SETTLEMENT_INTERVAL: &str = "SETTLEMENT_INTERVAL_SECS";
pub const ENV_RETENTION: &str = "WITHDRAW_REQUEST_RETENTION_SECS";
pub const ENV_PENDLE_API_URL: &str = "PENDLE_API_URL";

/// Per-chain connection and convention settings
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub factory_address: Address,
    /// Decimal count of the chain's settlement currency
    pub decimals: u32,
    /// First block to backfill from when no cursor is stored
    pub start_block: Option<u64>,
}

/// Built-in defaults for the chains the platform deploys to
fn known_chain_defaults(chain_id: u64) -> Option<(&'static str, &'static str, u32)> {
    match chain_id {
        ARBITRUM_CHAIN_ID => Some((
            "https://arb1.arbitrum.io/rpc",
            "0x2Cc4BcfBFF295131ae0f3aA5c2C822a68d6489dd",
            6,
        )),
        MAINNET_CHAIN_ID => Some((
            "https://eth.llamarpc.com",
            "0x719E22dd509c7CA33a0C9740B79F52C3F6A1A481",
            18,
        )),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct IngestionSettings {
    pub discovery_interval: Duration,
    pub poll_interval: Duration,
    /// Width of the ProductCreated catch-up scan below the current head
    pub catch_up_blocks: u64,
    /// Largest block span requested in a single eth_getLogs call
    pub max_log_range: u64,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            discovery_interval: Duration::from_secs(DEFAULT_DISCOVERY_INTERVAL_SECS),
            poll_interval: Duration::from_secs(DEFAULT_LOG_POLL_INTERVAL_SECS),
            catch_up_blocks: DEFAULT_CATCH_UP_BLOCKS,
            max_log_range: DEFAULT_MAX_LOG_RANGE,
        }
    }
}

/// How the provider signs webhook bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// keccak256(body ‖ secret), hex with 0x prefix
    Keccak256,
    /// HMAC-SHA256(secret, body), hex
    HmacSha256,
}

impl FromStr for SignatureScheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keccak" | "keccak256" => Ok(SignatureScheme::Keccak256),
            "hmac" | "hmac-sha256" => Ok(SignatureScheme::HmacSha256),
            other => Err(ConfigError::Invalid(format!(
                "{}: unknown signature scheme '{}'",
                ENV_WEBHOOK_SIGNATURE_SCHEME, other
            ))),
        }
    }
}

/// Position conventions of the provider's ERC-20 transfer list.
///
/// These mirror what the log-aggregation provider currently emits and must be
/// re-validated whenever the provider changes its payload shape.
#[derive(Debug, Clone)]
pub struct TransferLayout {
    pub burn_address: Address,
    /// Transfer carrying user → product funds on deposit
    pub deposit_index: usize,
    /// Transfer expected to go to the burn address on principal withdrawal
    pub withdraw_burn_index: usize,
    /// Transfer carrying product → user funds on principal withdrawal
    pub withdraw_payout_index: usize,
    /// Transfer carrying product → user funds on option payout
    pub option_payout_index: usize,
}

impl Default for TransferLayout {
    fn default() -> Self {
        Self {
            burn_address: Address::from_str(DEFAULT_BURN_ADDRESS).unwrap_or(Address::ZERO),
            deposit_index: 0,
            withdraw_burn_index: 0,
            withdraw_payout_index: 1,
            option_payout_index: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub secret: String,
    pub scheme: SignatureScheme,
    pub timeout: Duration,
    pub layout: TransferLayout,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            scheme: SignatureScheme::Keccak256,
            timeout: Duration::from_secs(DEFAULT_WEBHOOK_TIMEOUT_SECS),
            layout: TransferLayout::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SettlementSettings {
    pub interval: Duration,
    /// Pending, untransferred requests older than this are purged
    pub retention: Duration,
}

impl Default for SettlementSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SETTLEMENT_INTERVAL_SECS),
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub chains: Vec<ChainConfig>,
    pub ingestion: IngestionSettings,
    pub webhook: WebhookSettings,
    pub settlement: SettlementSettings,
    pub pendle_api_url: String,
}

impl AppConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup(ENV_DATABASE_URL)
            .ok_or_else(|| ConfigError::Missing(ENV_DATABASE_URL.to_string()))?;

        let bind_addr = lookup(ENV_BIND_ADDR).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let chain_ids = lookup(ENV_SUPPORTED_CHAINS)
            .unwrap_or_else(|| DEFAULT_SUPPORTED_CHAINS.to_string());

        let mut chains = Vec::new();
        for raw in chain_ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let chain_id: u64 = raw.parse().map_err(|_| {
                ConfigError::Invalid(format!("{}: '{}' is not a chain id", ENV_SUPPORTED_CHAINS, raw))
            })?;
            chains.push(chain_config(chain_id, &lookup)?);
        }

        let ingestion = IngestionSettings {
            discovery_interval: secs(&lookup, ENV_DISCOVERY_INTERVAL, DEFAULT_DISCOVERY_INTERVAL_SECS)?,
            poll_interval: secs(&lookup, ENV_LOG_POLL_INTERVAL, DEFAULT_LOG_POLL_INTERVAL_SECS)?,
            catch_up_blocks: number(&lookup, ENV_CATCH_UP_BLOCKS, DEFAULT_CATCH_UP_BLOCKS),
            max_log_range: number(&lookup, ENV_MAX_LOG_RANGE, DEFAULT_MAX_LOG_RANGE).max(1),
        };

        let scheme = match lookup(ENV_WEBHOOK_SIGNATURE_SCHEME) {
            Some(s) => s.parse()?,
            None => SignatureScheme::Keccak256,
        };

        let mut layout = TransferLayout::default();
        if let Some(burn) = lookup(ENV_WEBHOOK_BURN_ADDRESS) {
            layout.burn_address = parse_address(ENV_WEBHOOK_BURN_ADDRESS, &burn)?;
        }

        let webhook = WebhookSettings {
            secret: lookup(ENV_WEBHOOK_SECRET).unwrap_or_default(),
            scheme,
            timeout: secs(&lookup, ENV_WEBHOOK_TIMEOUT, DEFAULT_WEBHOOK_TIMEOUT_SECS)?,
            layout,
        };

        let settlement = SettlementSettings {
            interval: secs(&lookup, ENV_SETTLEMENT_INTERVAL, DEFAULT_SETTLEMENT_INTERVAL_SECS)?,
            retention: secs(&lookup, ENV_RETENTION, DEFAULT_RETENTION_SECS)?,
        };

        Ok(Self {
            database_url,
            bind_addr,
            chains,
            ingestion,
            webhook,
            settlement,
            pendle_api_url: lookup(ENV_PENDLE_API_URL)
                .unwrap_or_else(|| DEFAULT_PENDLE_API_URL.to_string()),
        })
    }
}

fn chain_config<F>(chain_id: u64, lookup: &F) -> Result<ChainConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = known_chain_defaults(chain_id);

    let rpc_key = format!("RPC_URL_{}", chain_id);
    let rpc_url = lookup(&rpc_key)
        .or_else(|| defaults.map(|d| d.0.to_string()))
        .ok_or(ConfigError::Missing(rpc_key))?;

    let factory_key = format!("FACTORY_ADDRESS_{}", chain_id);
    let factory_raw = lookup(&factory_key)
        .or_else(|| defaults.map(|d| d.1.to_string()))
        .ok_or_else(|| ConfigError::Missing(factory_key.clone()))?;
    let factory_address = parse_address(&factory_key, &factory_raw)?;

    let decimals_key = format!("DECIMALS_{}", chain_id);
    let decimals = match lookup(&decimals_key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{}: '{}' is not a number", decimals_key, raw)))?,
        None => defaults
            .map(|d| d.2)
            .ok_or(ConfigError::Missing(decimals_key))?,
    };

    let start_block = lookup(&format!("START_BLOCK_{}", chain_id)).and_then(|s| s.parse().ok());

    Ok(ChainConfig {
        chain_id,
        rpc_url,
        factory_address,
        decimals,
        start_block,
    })
}

fn parse_address(key: &str, raw: &str) -> Result<Address, ConfigError> {
    Address::from_str(raw.trim())
        .map_err(|e| ConfigError::Invalid(format!("{}: invalid address '{}': {}", key, raw, e)))
}

fn number<F>(lookup: &F, key: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// Interval in whole seconds. Zero is rejected: tokio intervals need a
/// non-zero period.
fn secs<F>(lookup: &F, key: &str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match number(lookup, key, default) {
        0 => Err(ConfigError::Invalid(format!("{}: must be at least 1 second", key))),
        n => Ok(Duration::from_secs(n)),
    }
}
