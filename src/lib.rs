//! Bitcoin Bridge Engine
//!
//! Bitcoin protocol side of a BTC to host-chain bridge:
//!
//! 1. **Codec** - Bit-exact transactions, block headers and scripts
//! 2. **Transaction Builder** - Legacy and BIP-143 signature hashes, signature application
//! 3. **SPV Proofs** - Merkle inclusion proofs and header chains for the bridge contract
//! 4. **Difficulty Maintainer** - Keeps the on-chain difficulty relay in sync with retargets
//! 5. **SPV Maintainer** - Proves wallet deposit sweeps the bridge has not seen yet
//!
//! Chain access goes through the traits in [`chain`]; [`esplora::EsploraClient`]
//! reads Bitcoin over HTTP and [`local_chain::LocalChain`] keeps everything in memory.

pub mod bitcoin;
pub mod builder;
pub mod chain;
pub mod config;
pub mod error;
pub mod esplora;
pub mod local_chain;
pub mod logging;
pub mod maintainer;
pub mod spv;

// Re-exports: Bitcoin primitives
pub use crate::bitcoin::{
    BlockHeader, ByteOrder, Hash, SerializationFormat, Transaction, TransactionInput,
    TransactionOutpoint, TransactionOutput, UnspentTransactionOutput,
};

// Re-exports: Transaction builder
pub use builder::{BuilderError, SignatureContainer, TransactionBuilder};

// Re-exports: Chain boundaries
pub use chain::{
    BitcoinChain, ChainError, DepositRequest, DepositSweepProposalSubmittedEvent, DifficultyChain,
    SpvChain, TransactionMerkleProof, Wallet, WalletState,
};

// Re-exports: SPV
pub use spv::{
    assemble_spv_proof, get_proof_info, submit_deposit_sweep_proof, submit_moving_funds_proof,
    submit_redemption_proof, ProofInfo, SpvError, SpvProof, WalletTransactionError,
};

// Re-exports: Maintainer
pub use maintainer::{
    shutdown_channel, DifficultyConfig, DifficultyMaintainer, MaintainerError, ShutdownSignal,
    ShutdownTrigger, SpvConfig, SpvMaintainer, SpvMaintainerError,
};

// Re-exports: Infrastructure
pub use config::{BridgeConfig, Network};
pub use error::{BridgeError, Result};
pub use esplora::{EsploraClient, EsploraError};
pub use local_chain::LocalChain;
pub use logging::{init_logging, LogLevel};
