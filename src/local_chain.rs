//! In-Memory Chain
//!
//! Implements all chain boundaries over in-memory state, for testing and
//! development. Submissions are recorded instead of being sent anywhere.

use async_trait::async_trait;
use primitive_types::U256;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::bitcoin::{sha256, BlockHeader, Hash, Transaction, UnspentTransactionOutput};
use crate::chain::{
    BitcoinChain, ChainError, ChainResult, DepositRequest, DepositSweepProposalSubmittedEvent,
    DifficultyChain, SpvChain, TransactionMerkleProof, Wallet,
};
use crate::spv::SpvProof;

/// Address the local chain reports as its operator
pub const LOCAL_OPERATOR_ADDRESS: &str = "0x7d9c3e5fb1a4d2e8c6b0f3a9e1d5c7b2a4f6e8d0";

/// Retarget recorded by the local difficulty relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetargetEvent {
    pub old_difficulty: u32,
    pub new_difficulty: u32,
    pub with_refund: bool,
}

/// Deposit sweep proof recorded by the local bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositSweepSubmission {
    pub transaction: Transaction,
    pub proof: SpvProof,
    pub main_utxo: UnspentTransactionOutput,
    pub vault: Option<String>,
}

/// Redemption or moving funds proof recorded by the local bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletProofSubmission {
    pub transaction: Transaction,
    pub proof: SpvProof,
    pub main_utxo: UnspentTransactionOutput,
    pub wallet_public_key_hash: [u8; 20],
}

#[derive(Default)]
struct State {
    transactions: HashMap<Hash, Transaction>,
    confirmations: HashMap<Hash, u64>,
    block_headers: BTreeMap<u64, BlockHeader>,
    merkle_proofs: HashMap<Hash, TransactionMerkleProof>,
    latest_block_height: Option<u64>,
    broadcasts: Vec<Transaction>,
    public_key_hash_transactions: HashMap<[u8; 20], Vec<Transaction>>,

    ready: bool,
    authorization_required: bool,
    authorized: HashMap<String, bool>,
    authorized_for_refund: HashMap<String, bool>,
    current_epoch: u64,
    proof_length: u64,
    epoch_difficulties: (U256, U256),
    retarget_events: Vec<RetargetEvent>,

    tx_proof_difficulty_factor: u64,
    deposit_requests: HashMap<(Hash, u32), DepositRequest>,
    deposit_sweep_submissions: Vec<DepositSweepSubmission>,
    redemption_submissions: Vec<WalletProofSubmission>,
    moving_funds_submissions: Vec<WalletProofSubmission>,
    current_block: u64,
    deposit_sweep_proposals: Vec<DepositSweepProposalSubmittedEvent>,
    wallets: HashMap<[u8; 20], Wallet>,
}

/// In-memory Bitcoin chain, difficulty relay and bridge contract
///
/// Cloning shares the underlying state.
#[derive(Clone)]
pub struct LocalChain {
    state: Arc<RwLock<State>>,
}

impl LocalChain {
    /// Create an empty chain; the relay starts ready
    pub fn new() -> Self {
        let state = State {
            ready: true,
            ..State::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Store a transaction under its txid and return the txid
    pub async fn add_transaction(&self, transaction: Transaction) -> Hash {
        let hash = transaction.hash();
        self.set_transaction(hash, transaction).await;
        hash
    }

    pub async fn set_transaction(&self, hash: Hash, transaction: Transaction) {
        self.state.write().await.transactions.insert(hash, transaction);
    }

    pub async fn set_transaction_confirmations(&self, hash: Hash, confirmations: u64) {
        self.state.write().await.confirmations.insert(hash, confirmations);
    }

    pub async fn set_block_headers(&self, headers: Vec<(u64, BlockHeader)>) {
        let mut state = self.state.write().await;
        state.block_headers.extend(headers);
    }

    pub async fn set_transaction_merkle_proof(&self, hash: Hash, proof: TransactionMerkleProof) {
        self.state.write().await.merkle_proofs.insert(hash, proof);
    }

    /// Pin the chain tip. Without it the highest stored header is the tip.
    pub async fn set_latest_block_height(&self, height: u64) {
        self.state.write().await.latest_block_height = Some(height);
    }

    /// History served for a public key hash, oldest first
    pub async fn set_transactions_for_public_key_hash(
        &self,
        public_key_hash: [u8; 20],
        transactions: Vec<Transaction>,
    ) {
        self.state
            .write()
            .await
            .public_key_hash_transactions
            .insert(public_key_hash, transactions);
    }

    /// Transactions passed to `broadcast_transaction`, in order
    pub async fn broadcasts(&self) -> Vec<Transaction> {
        self.state.read().await.broadcasts.clone()
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    pub async fn set_authorization_required(&self, required: bool) {
        self.state.write().await.authorization_required = required;
    }

    pub async fn set_authorized(&self, address: &str, authorized: bool) {
        self.state
            .write()
            .await
            .authorized
            .insert(address.to_string(), authorized);
    }

    pub async fn set_authorized_for_refund(&self, address: &str, authorized: bool) {
        self.state
            .write()
            .await
            .authorized_for_refund
            .insert(address.to_string(), authorized);
    }

    pub async fn set_current_epoch(&self, epoch: u64) {
        self.state.write().await.current_epoch = epoch;
    }

    pub async fn set_proof_length(&self, proof_length: u64) {
        self.state.write().await.proof_length = proof_length;
    }

    pub async fn set_epoch_difficulties(&self, current: U256, previous: U256) {
        self.state.write().await.epoch_difficulties = (current, previous);
    }

    /// Retargets accepted by the relay, in order
    pub async fn retarget_events(&self) -> Vec<RetargetEvent> {
        self.state.read().await.retarget_events.clone()
    }

    pub async fn set_tx_proof_difficulty_factor(&self, factor: u64) {
        self.state.write().await.tx_proof_difficulty_factor = factor;
    }

    pub async fn set_deposit_request(
        &self,
        funding_transaction_hash: Hash,
        funding_output_index: u32,
        deposit: DepositRequest,
    ) {
        self.state
            .write()
            .await
            .deposit_requests
            .insert((funding_transaction_hash, funding_output_index), deposit);
    }

    /// Deposit sweep proofs accepted by the bridge, in order
    pub async fn deposit_sweep_submissions(&self) -> Vec<DepositSweepSubmission> {
        self.state.read().await.deposit_sweep_submissions.clone()
    }

    pub async fn redemption_submissions(&self) -> Vec<WalletProofSubmission> {
        self.state.read().await.redemption_submissions.clone()
    }

    pub async fn moving_funds_submissions(&self) -> Vec<WalletProofSubmission> {
        self.state.read().await.moving_funds_submissions.clone()
    }

    pub async fn set_current_block(&self, block: u64) {
        self.state.write().await.current_block = block;
    }

    pub async fn add_deposit_sweep_proposal(&self, event: DepositSweepProposalSubmittedEvent) {
        self.state.write().await.deposit_sweep_proposals.push(event);
    }

    pub async fn set_wallet(&self, wallet_public_key_hash: [u8; 20], wallet: Wallet) {
        self.state
            .write()
            .await
            .wallets
            .insert(wallet_public_key_hash, wallet);
    }

    async fn record_retarget(&self, headers: &[BlockHeader], with_refund: bool) -> ChainResult<()> {
        let mut state = self.state.write().await;

        let expected = 2 * state.proof_length as usize;
        if headers.len() != expected || headers.is_empty() {
            return Err(ChainError::Rejected(format!(
                "expected {} headers, got {}",
                expected,
                headers.len()
            )));
        }

        let middle = headers.len() / 2;
        state.retarget_events.push(RetargetEvent {
            old_difficulty: headers[middle - 1].bits,
            new_difficulty: headers[middle].bits,
            with_refund,
        });
        state.current_epoch += 1;

        Ok(())
    }
}

impl Default for LocalChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BitcoinChain for LocalChain {
    async fn get_transaction(&self, transaction_hash: &Hash) -> ChainResult<Transaction> {
        self.state
            .read()
            .await
            .transactions
            .get(transaction_hash)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("transaction {}", transaction_hash)))
    }

    async fn get_transaction_confirmations(&self, transaction_hash: &Hash) -> ChainResult<u64> {
        self.state
            .read()
            .await
            .confirmations
            .get(transaction_hash)
            .copied()
            .ok_or_else(|| {
                ChainError::NotFound(format!("confirmations of {}", transaction_hash))
            })
    }

    async fn get_latest_block_height(&self) -> ChainResult<u64> {
        let state = self.state.read().await;
        state
            .latest_block_height
            .or_else(|| state.block_headers.keys().next_back().copied())
            .ok_or_else(|| ChainError::NotFound("no blocks".to_string()))
    }

    async fn get_block_header(&self, block_height: u64) -> ChainResult<BlockHeader> {
        self.state
            .read()
            .await
            .block_headers
            .get(&block_height)
            .copied()
            .ok_or_else(|| ChainError::NotFound(format!("block header at {}", block_height)))
    }

    async fn get_transaction_merkle_proof(
        &self,
        transaction_hash: &Hash,
        block_height: u64,
    ) -> ChainResult<TransactionMerkleProof> {
        let state = self.state.read().await;
        match state.merkle_proofs.get(transaction_hash) {
            Some(proof) if proof.block_height == block_height => Ok(proof.clone()),
            _ => Err(ChainError::NotFound(format!(
                "merkle proof of {} at {}",
                transaction_hash, block_height
            ))),
        }
    }

    async fn broadcast_transaction(&self, transaction: &Transaction) -> ChainResult<()> {
        let mut state = self.state.write().await;
        state.broadcasts.push(transaction.clone());
        state
            .transactions
            .insert(transaction.hash(), transaction.clone());
        Ok(())
    }

    async fn get_transactions_for_public_key_hash(
        &self,
        public_key_hash: &[u8; 20],
        limit: usize,
    ) -> ChainResult<Vec<Transaction>> {
        let state = self.state.read().await;
        let history = state
            .public_key_hash_transactions
            .get(public_key_hash)
            .map(Vec::as_slice)
            .unwrap_or_default();
        Ok(history[history.len().saturating_sub(limit)..].to_vec())
    }
}

#[async_trait]
impl DifficultyChain for LocalChain {
    async fn ready(&self) -> ChainResult<bool> {
        Ok(self.state.read().await.ready)
    }

    async fn authorization_required(&self) -> ChainResult<bool> {
        Ok(self.state.read().await.authorization_required)
    }

    async fn is_authorized(&self, address: &str) -> ChainResult<bool> {
        let state = self.state.read().await;
        Ok(state.authorized.get(address).copied().unwrap_or(false))
    }

    async fn is_authorized_for_refund(&self, address: &str) -> ChainResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .authorized_for_refund
            .get(address)
            .copied()
            .unwrap_or(false))
    }

    fn operator_address(&self) -> String {
        LOCAL_OPERATOR_ADDRESS.to_string()
    }

    async fn retarget(&self, headers: &[BlockHeader]) -> ChainResult<()> {
        self.record_retarget(headers, false).await
    }

    async fn retarget_with_refund(&self, headers: &[BlockHeader]) -> ChainResult<()> {
        self.record_retarget(headers, true).await
    }

    async fn current_epoch(&self) -> ChainResult<u64> {
        Ok(self.state.read().await.current_epoch)
    }

    async fn proof_length(&self) -> ChainResult<u64> {
        Ok(self.state.read().await.proof_length)
    }

    async fn get_current_and_prev_epoch_difficulty(&self) -> ChainResult<(U256, U256)> {
        Ok(self.state.read().await.epoch_difficulties)
    }
}

#[async_trait]
impl SpvChain for LocalChain {
    async fn tx_proof_difficulty_factor(&self) -> ChainResult<u64> {
        Ok(self.state.read().await.tx_proof_difficulty_factor)
    }

    async fn get_deposit_request(
        &self,
        funding_transaction_hash: &Hash,
        funding_output_index: u32,
    ) -> ChainResult<Option<DepositRequest>> {
        let state = self.state.read().await;
        Ok(state
            .deposit_requests
            .get(&(*funding_transaction_hash, funding_output_index))
            .cloned())
    }

    async fn submit_deposit_sweep_proof_with_reimbursement(
        &self,
        transaction: &Transaction,
        proof: &SpvProof,
        main_utxo: &UnspentTransactionOutput,
        vault: Option<String>,
    ) -> ChainResult<()> {
        let mut state = self.state.write().await;

        let swept_at = chrono::Utc::now().timestamp().max(1) as u64;
        for input in &transaction.inputs {
            let key = (input.outpoint.transaction_hash, input.outpoint.output_index);
            if let Some(deposit) = state.deposit_requests.get_mut(&key) {
                deposit.swept_at = swept_at;
            }
        }

        state.deposit_sweep_submissions.push(DepositSweepSubmission {
            transaction: transaction.clone(),
            proof: proof.clone(),
            main_utxo: *main_utxo,
            vault,
        });
        Ok(())
    }

    async fn submit_redemption_proof_with_reimbursement(
        &self,
        transaction: &Transaction,
        proof: &SpvProof,
        main_utxo: &UnspentTransactionOutput,
        wallet_public_key_hash: [u8; 20],
    ) -> ChainResult<()> {
        let mut state = self.state.write().await;
        state.redemption_submissions.push(WalletProofSubmission {
            transaction: transaction.clone(),
            proof: proof.clone(),
            main_utxo: *main_utxo,
            wallet_public_key_hash,
        });
        Ok(())
    }

    async fn submit_moving_funds_proof_with_reimbursement(
        &self,
        transaction: &Transaction,
        proof: &SpvProof,
        main_utxo: &UnspentTransactionOutput,
        wallet_public_key_hash: [u8; 20],
    ) -> ChainResult<()> {
        let mut state = self.state.write().await;
        state.moving_funds_submissions.push(WalletProofSubmission {
            transaction: transaction.clone(),
            proof: proof.clone(),
            main_utxo: *main_utxo,
            wallet_public_key_hash,
        });
        Ok(())
    }

    async fn current_block(&self) -> ChainResult<u64> {
        Ok(self.state.read().await.current_block)
    }

    async fn past_deposit_sweep_proposal_submitted_events(
        &self,
        start_block: u64,
    ) -> ChainResult<Vec<DepositSweepProposalSubmittedEvent>> {
        let state = self.state.read().await;
        Ok(state
            .deposit_sweep_proposals
            .iter()
            .filter(|event| event.block_number >= start_block)
            .copied()
            .collect())
    }

    async fn get_wallet(&self, wallet_public_key_hash: &[u8; 20]) -> ChainResult<Wallet> {
        self.state
            .read()
            .await
            .wallets
            .get(wallet_public_key_hash)
            .copied()
            .ok_or_else(|| {
                ChainError::NotFound(format!("wallet {}", hex::encode(wallet_public_key_hash)))
            })
    }

    /// SHA-256 over the txid (internal order), the big-endian output index
    /// and the big-endian value
    fn compute_main_utxo_hash(&self, main_utxo: &UnspentTransactionOutput) -> [u8; 32] {
        let mut preimage = Vec::with_capacity(44);
        preimage.extend_from_slice(main_utxo.outpoint.transaction_hash.as_bytes());
        preimage.extend_from_slice(&main_utxo.outpoint.output_index.to_be_bytes());
        preimage.extend_from_slice(&(main_utxo.value as u64).to_be_bytes());
        sha256(&preimage)
    }
}
