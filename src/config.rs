//! Environment-based Configuration
//!
//! # Environment Variables
//!
//! ## Network
//! - `BTC_BRIDGE_NETWORK` - "mainnet", "testnet" or "regtest" (default: "testnet")
//! - `BTC_BRIDGE_ESPLORA_URL` - Esplora API endpoint (default: per network)
//!
//! ## Logging
//! - `BTC_BRIDGE_LOG_LEVEL` - trace, debug, info, warn or error (default: "info")
//! - `BTC_BRIDGE_LOG_JSON` - Set to "1" for JSON output
//!
//! ## Difficulty maintainer
//! - `BTC_BRIDGE_DIFFICULTY_IDLE_BACKOFF_SECS` (default: 60)
//! - `BTC_BRIDGE_DIFFICULTY_RESTART_BACKOFF_SECS` (default: 120)
//! - `BTC_BRIDGE_DIFFICULTY_DISABLE_PROXY` - "1" or "true" to submit without the refunding proxy
//!
//! ## SPV maintainer
//! - `BTC_BRIDGE_SPV_HISTORY_DEPTH` - Host-chain blocks to look back (default: 43200)
//! - `BTC_BRIDGE_SPV_TRANSACTION_LIMIT` - Transactions per wallet to check (default: 20)
//! - `BTC_BRIDGE_SPV_IDLE_BACKOFF_SECS` (default: 600)
//! - `BTC_BRIDGE_SPV_RESTART_BACKOFF_SECS` (default: 600)

use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::maintainer::difficulty::{DifficultyConfig, DEFAULT_IDLE_BACKOFF, DEFAULT_RESTART_BACKOFF};
use crate::maintainer::spv::{self, SpvConfig};

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Bitcoin network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" | "bitcoin" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            _ => Err(ConfigError::InvalidValue(
                "BTC_BRIDGE_NETWORK".to_string(),
                format!("unknown network: {}", s),
            )),
        }
    }
}

impl Network {
    /// Default Esplora API for this network
    pub fn default_esplora_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://blockstream.info/api",
            Network::Testnet => "https://blockstream.info/testnet/api",
            Network::Regtest => "http://127.0.0.1:3002",
        }
    }
}

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub network: Network,

    /// Esplora API endpoint
    pub esplora_url: String,

    pub log_level: String,
    pub log_json: bool,

    pub difficulty_idle_backoff: Duration,
    pub difficulty_restart_backoff: Duration,
    pub difficulty_disable_proxy: bool,

    /// Host-chain blocks searched for unproven transactions
    pub spv_history_depth: u64,
    /// Recent transactions per wallet checked for proofs
    pub spv_transaction_limit: usize,
    pub spv_idle_backoff: Duration,
    pub spv_restart_backoff: Duration,
}

impl BridgeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let network: Network = lookup("BTC_BRIDGE_NETWORK")
            .unwrap_or_else(|| "testnet".to_string())
            .parse()?;

        let esplora_url = lookup("BTC_BRIDGE_ESPLORA_URL")
            .unwrap_or_else(|| network.default_esplora_url().to_string());

        let log_level = lookup("BTC_BRIDGE_LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let log_json = lookup("BTC_BRIDGE_LOG_JSON").map(|v| v == "1").unwrap_or(false);

        let difficulty_idle_backoff = parse_or(
            &lookup,
            "BTC_BRIDGE_DIFFICULTY_IDLE_BACKOFF_SECS",
            DEFAULT_IDLE_BACKOFF.as_secs(),
        )
        .map(Duration::from_secs)?;
        let difficulty_restart_backoff = parse_or(
            &lookup,
            "BTC_BRIDGE_DIFFICULTY_RESTART_BACKOFF_SECS",
            DEFAULT_RESTART_BACKOFF.as_secs(),
        )
        .map(Duration::from_secs)?;
        let difficulty_disable_proxy = lookup("BTC_BRIDGE_DIFFICULTY_DISABLE_PROXY")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let spv_history_depth = parse_or(
            &lookup,
            "BTC_BRIDGE_SPV_HISTORY_DEPTH",
            spv::DEFAULT_HISTORY_DEPTH,
        )?;
        let spv_transaction_limit = parse_or(
            &lookup,
            "BTC_BRIDGE_SPV_TRANSACTION_LIMIT",
            spv::DEFAULT_TRANSACTION_LIMIT,
        )?;
        let spv_idle_backoff = parse_or(
            &lookup,
            "BTC_BRIDGE_SPV_IDLE_BACKOFF_SECS",
            spv::DEFAULT_IDLE_BACKOFF.as_secs(),
        )
        .map(Duration::from_secs)?;
        let spv_restart_backoff = parse_or(
            &lookup,
            "BTC_BRIDGE_SPV_RESTART_BACKOFF_SECS",
            spv::DEFAULT_RESTART_BACKOFF.as_secs(),
        )
        .map(Duration::from_secs)?;

        Ok(Self {
            network,
            esplora_url,
            log_level,
            log_json,
            difficulty_idle_backoff,
            difficulty_restart_backoff,
            difficulty_disable_proxy,
            spv_history_depth,
            spv_transaction_limit,
            spv_idle_backoff,
            spv_restart_backoff,
        })
    }

    /// Difficulty maintainer settings
    pub fn difficulty(&self) -> DifficultyConfig {
        DifficultyConfig {
            disable_proxy: self.difficulty_disable_proxy,
            idle_backoff: self.difficulty_idle_backoff,
            restart_backoff: self.difficulty_restart_backoff,
            ..DifficultyConfig::default()
        }
    }

    /// SPV maintainer settings
    pub fn spv(&self) -> SpvConfig {
        SpvConfig {
            history_depth: self.spv_history_depth,
            transaction_limit: self.spv_transaction_limit,
            idle_backoff: self.spv_idle_backoff,
            restart_backoff: self.spv_restart_backoff,
        }
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("=== Bitcoin Bridge Configuration ===");
        println!("Network: {:?}", self.network);
        println!("Esplora: {}", self.esplora_url);
        println!("Log Level: {}", self.log_level);
        println!(
            "Difficulty: idle {}s, restart {}s, proxy {}",
            self.difficulty_idle_backoff.as_secs(),
            self.difficulty_restart_backoff.as_secs(),
            if self.difficulty_disable_proxy { "disabled" } else { "enabled" }
        );
        println!(
            "SPV: history depth {}, transaction limit {}, idle {}s, restart {}s",
            self.spv_history_depth,
            self.spv_transaction_limit,
            self.spv_idle_backoff.as_secs(),
            self.spv_restart_backoff.as_secs()
        );
        println!("====================================");
    }
}

fn parse_or<F, T>(lookup: &F, var_name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var_name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(var_name.to_string(), e.to_string())),
        None => Ok(default),
    }
}
