//! Common Error Types
//!
//! Root error aggregating the error of every module, for callers driving
//! several of them (the operator binary in particular).

use thiserror::Error;

use crate::bitcoin::{CompactSizeError, DecodeError, HashError, ScriptError};
use crate::builder::BuilderError;
use crate::chain::ChainError;
use crate::config::ConfigError;
use crate::esplora::EsploraError;
use crate::logging::LoggingError;
use crate::maintainer::{MaintainerError, SpvMaintainerError};
use crate::spv::{DepositSweepError, SpvError, WalletTransactionError};

/// Root error type for the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("hash error: {0}")]
    Hash(#[from] HashError),

    #[error("compact size error: {0}")]
    CompactSize(#[from] CompactSizeError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("script error: {0}")]
    Script(#[from] ScriptError),

    #[error("builder error: {0}")]
    Builder(#[from] BuilderError),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("esplora error: {0}")]
    Esplora(#[from] EsploraError),

    #[error("spv error: {0}")]
    Spv(#[from] SpvError),

    #[error("deposit sweep error: {0}")]
    DepositSweep(#[from] DepositSweepError),

    #[error("wallet transaction error: {0}")]
    WalletTransaction(#[from] WalletTransactionError),

    #[error("maintainer error: {0}")]
    Maintainer(#[from] MaintainerError),

    #[error("spv maintainer error: {0}")]
    SpvMaintainer(#[from] SpvMaintainerError),

    /// Invalid operator input
    #[error("validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Chain(e) => e.is_retryable(),
            BridgeError::Esplora(EsploraError::HttpError(_)) => true,
            BridgeError::Spv(SpvError::Chain(e)) => e.is_retryable(),
            BridgeError::Spv(SpvError::MissingHeader { source, .. }) => source.is_retryable(),
            BridgeError::Maintainer(MaintainerError::Chain { source, .. }) => source.is_retryable(),
            BridgeError::WalletTransaction(WalletTransactionError::Chain(e)) => e.is_retryable(),
            BridgeError::Io(_) => true,
            _ => false,
        }
    }

    /// Stable error code for machine-readable output
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::Config(_) => "CONFIG_ERROR",
            BridgeError::Logging(_) => "LOGGING_ERROR",
            BridgeError::Hash(_) => "HASH_ERROR",
            BridgeError::CompactSize(_) => "COMPACT_SIZE_ERROR",
            BridgeError::Decode(_) => "DECODE_ERROR",
            BridgeError::Script(_) => "SCRIPT_ERROR",
            BridgeError::Builder(_) => "BUILDER_ERROR",
            BridgeError::Chain(_) => "CHAIN_ERROR",
            BridgeError::Esplora(_) => "ESPLORA_ERROR",
            BridgeError::Spv(_) => "SPV_ERROR",
            BridgeError::DepositSweep(_) => "DEPOSIT_SWEEP_ERROR",
            BridgeError::WalletTransaction(_) => "WALLET_TRANSACTION_ERROR",
            BridgeError::Maintainer(_) => "MAINTAINER_ERROR",
            BridgeError::SpvMaintainer(_) => "SPV_MAINTAINER_ERROR",
            BridgeError::Validation(_) => "VALIDATION_ERROR",
            BridgeError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
