//! Chain Boundaries
//!
//! Async interfaces to the collaborators the bridge engine consumes: a
//! Bitcoin data source, the on-chain difficulty relay and the on-chain SPV
//! bridge contract.
//!
//! Implementations:
//! - `EsploraClient` - Bitcoin data source over the Esplora HTTP API
//! - `LocalChain` - In-memory chain for testing and development

use async_trait::async_trait;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bitcoin::{BlockHeader, Hash, Transaction, UnspentTransactionOutput};
use crate::spv::SpvProof;

/// Chain collaborator errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("submission rejected: {0}")]
    Rejected(String),
}

impl ChainError {
    /// Whether the failure is worth retrying later
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::Transport(_))
    }
}

/// Result type for chain operations
pub type ChainResult<T> = Result<T, ChainError>;

/// Merkle branch of a transaction as reported by a Bitcoin data source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMerkleProof {
    /// Height of the block containing the transaction
    pub block_height: u64,
    /// Sibling hashes in reversed byte order, deepest pairing first
    pub merkle_nodes: Vec<String>,
    /// Index of the transaction within the block
    pub position: u64,
}

/// Deposit request as stored by the bridge contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRequest {
    pub depositor: String,
    pub amount: u64,
    pub revealed_at: u64,
    /// Vault the deposit is routed to, if any
    pub vault: Option<String>,
    pub treasury_fee: u64,
    /// Unix timestamp of the sweep, zero while unswept
    pub swept_at: u64,
}

impl DepositRequest {
    pub fn is_swept(&self) -> bool {
        self.swept_at != 0
    }
}

/// Lifecycle state of a bridge wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WalletState {
    #[default]
    Unknown,
    Live,
    MovingFunds,
    Closing,
    Closed,
    Terminated,
}

impl WalletState {
    /// Whether the bridge accepts deposit sweep proofs from the wallet
    pub fn accepts_deposit_sweeps(&self) -> bool {
        matches!(self, WalletState::Live | WalletState::MovingFunds)
    }
}

/// Wallet data as stored by the bridge contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Wallet {
    /// Bridge-specific commitment to the wallet's main UTXO, zero if none
    pub main_utxo_hash: [u8; 32],
    pub state: WalletState,
}

/// Deposit sweep proposal emitted by the bridge for a wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositSweepProposalSubmittedEvent {
    pub wallet_public_key_hash: [u8; 20],
    /// Host-chain block the event was emitted in
    pub block_number: u64,
}

/// Bitcoin data source
///
/// Absent data is reported as `ChainError::NotFound`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BitcoinChain: Send + Sync {
    /// Get a transaction by its hash
    async fn get_transaction(&self, transaction_hash: &Hash) -> ChainResult<Transaction>;

    /// Number of confirmations of a mined transaction
    async fn get_transaction_confirmations(&self, transaction_hash: &Hash) -> ChainResult<u64>;

    /// Height of the chain tip
    async fn get_latest_block_height(&self) -> ChainResult<u64>;

    /// Header of the block at the given height
    async fn get_block_header(&self, block_height: u64) -> ChainResult<BlockHeader>;

    /// Merkle branch of a transaction mined at the given height
    async fn get_transaction_merkle_proof(
        &self,
        transaction_hash: &Hash,
        block_height: u64,
    ) -> ChainResult<TransactionMerkleProof>;

    /// Broadcast a signed transaction
    async fn broadcast_transaction(&self, transaction: &Transaction) -> ChainResult<()>;

    /// Confirmed transactions paying the key hash with a P2PKH or P2WPKH
    /// output, oldest first, limited to the `limit` most recent ones
    async fn get_transactions_for_public_key_hash(
        &self,
        public_key_hash: &[u8; 20],
        limit: usize,
    ) -> ChainResult<Vec<Transaction>>;
}

/// On-chain Bitcoin difficulty relay
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DifficultyChain: Send + Sync {
    /// Whether genesis has been performed
    async fn ready(&self) -> ChainResult<bool>;

    /// Whether submitting headers requires authorization
    async fn authorization_required(&self) -> ChainResult<bool>;

    /// Whether the address may call `retarget` directly
    async fn is_authorized(&self, address: &str) -> ChainResult<bool>;

    /// Whether the address may call `retarget` through the refunding proxy
    async fn is_authorized_for_refund(&self, address: &str) -> ChainResult<bool>;

    /// Address submissions are signed with
    fn operator_address(&self) -> String;

    /// Prove a difficulty retarget with a header chain spanning it
    async fn retarget(&self, headers: &[BlockHeader]) -> ChainResult<()>;

    /// Same as `retarget`, going through the proxy that refunds the gas
    async fn retarget_with_refund(&self, headers: &[BlockHeader]) -> ChainResult<()>;

    /// Number of the latest proven epoch
    async fn current_epoch(&self) -> ChainResult<u64>;

    /// Number of headers required on each side of a retarget
    async fn proof_length(&self) -> ChainResult<u64>;

    /// Difficulties of the current and the previous epochs, in that order
    async fn get_current_and_prev_epoch_difficulty(&self) -> ChainResult<(U256, U256)>;
}

/// On-chain bridge contract accepting SPV proofs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpvChain: Send + Sync {
    /// Number of headers, at current difficulty, a transaction proof must carry
    async fn tx_proof_difficulty_factor(&self) -> ChainResult<u64>;

    /// Deposit revealed with the given funding outpoint, if any
    async fn get_deposit_request(
        &self,
        funding_transaction_hash: &Hash,
        funding_output_index: u32,
    ) -> ChainResult<Option<DepositRequest>>;

    /// Submit a deposit sweep proof through the reimbursing proxy
    async fn submit_deposit_sweep_proof_with_reimbursement(
        &self,
        transaction: &Transaction,
        proof: &SpvProof,
        main_utxo: &UnspentTransactionOutput,
        vault: Option<String>,
    ) -> ChainResult<()>;

    /// Submit a redemption proof through the reimbursing proxy
    async fn submit_redemption_proof_with_reimbursement(
        &self,
        transaction: &Transaction,
        proof: &SpvProof,
        main_utxo: &UnspentTransactionOutput,
        wallet_public_key_hash: [u8; 20],
    ) -> ChainResult<()>;

    /// Submit a moving funds proof through the reimbursing proxy
    async fn submit_moving_funds_proof_with_reimbursement(
        &self,
        transaction: &Transaction,
        proof: &SpvProof,
        main_utxo: &UnspentTransactionOutput,
        wallet_public_key_hash: [u8; 20],
    ) -> ChainResult<()>;

    /// Current host-chain block number
    async fn current_block(&self) -> ChainResult<u64>;

    /// Deposit sweep proposals emitted at or after `start_block`
    async fn past_deposit_sweep_proposal_submitted_events(
        &self,
        start_block: u64,
    ) -> ChainResult<Vec<DepositSweepProposalSubmittedEvent>>;

    /// Wallet registered under the public key hash
    async fn get_wallet(&self, wallet_public_key_hash: &[u8; 20]) -> ChainResult<Wallet>;

    /// Main UTXO commitment the bridge stores in `Wallet::main_utxo_hash`
    fn compute_main_utxo_hash(&self, main_utxo: &UnspentTransactionOutput) -> [u8; 32];
}
