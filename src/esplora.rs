//! Esplora API Client
//!
//! Bitcoin data source over the Esplora HTTP API, used to assemble SPV
//! proofs and feed the difficulty maintainer.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::bitcoin::script::{pay_to_public_key_hash, pay_to_witness_public_key_hash};
use crate::bitcoin::{sha256, BlockHeader, ByteOrder, Hash, SerializationFormat, Transaction};
use crate::chain::{BitcoinChain, ChainError, ChainResult, TransactionMerkleProof};
use crate::config::Network;

/// Esplora API endpoints
pub const MAINNET_URL: &str = "https://blockstream.info/api";
pub const TESTNET_URL: &str = "https://blockstream.info/testnet/api";

/// Esplora HTTP client
#[derive(Debug, Clone)]
pub struct EsploraClient {
    client: Client,
    base_url: String,
}

impl EsploraClient {
    /// Create a new client with custom URL
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn new_mainnet() -> Self {
        Self::new(MAINNET_URL)
    }

    pub fn new_testnet() -> Self {
        Self::new(TESTNET_URL)
    }

    /// Client for the network's default endpoint
    pub fn for_network(network: Network) -> Self {
        Self::new(network.default_esplora_url())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_text(&self, path: &str) -> Result<String, EsploraError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::trace!(target: "btc_bridge::esplora", %url, "GET");

        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(EsploraError::NotFound(path.to_string()));
        }

        Ok(resp.text().await?.trim().to_string())
    }

    /// Raw transaction hex
    pub async fn get_tx_hex(&self, txid: &str) -> Result<String, EsploraError> {
        self.get_text(&format!("/tx/{}/hex", txid)).await
    }

    /// Get transaction status
    pub async fn get_tx_status(&self, txid: &str) -> Result<EsploraTxStatus, EsploraError> {
        let body = self.get_text(&format!("/tx/{}/status", txid)).await?;
        serde_json::from_str(&body).map_err(|e| EsploraError::ParseError(e.to_string()))
    }

    /// Get current block height
    pub async fn get_block_height(&self) -> Result<u64, EsploraError> {
        self.get_text("/blocks/tip/height")
            .await?
            .parse()
            .map_err(|_| EsploraError::ParseError("failed to parse block height".to_string()))
    }

    /// Hash of the block at the given height, reversed hex
    pub async fn get_block_hash(&self, height: u64) -> Result<String, EsploraError> {
        self.get_text(&format!("/block-height/{}", height)).await
    }

    /// Raw 80-byte header hex of a block
    pub async fn get_block_header_hex(&self, block_hash: &str) -> Result<String, EsploraError> {
        self.get_text(&format!("/block/{}/header", block_hash)).await
    }

    /// Merkle inclusion proof of a confirmed transaction
    pub async fn get_merkle_proof(&self, txid: &str) -> Result<EsploraMerkleProof, EsploraError> {
        let body = self.get_text(&format!("/tx/{}/merkle-proof", txid)).await?;
        serde_json::from_str(&body).map_err(|e| EsploraError::ParseError(e.to_string()))
    }

    /// Confirmed history of a locking script, as `(txid, block height)`.
    ///
    /// Esplora serves the 25 most recent confirmed transactions per page;
    /// only the first page is read.
    pub async fn get_script_history(&self, script: &[u8]) -> Result<Vec<(String, u64)>, EsploraError> {
        let body = self
            .get_text(&format!("/scripthash/{}/txs/chain", script_hash_hex(script)))
            .await?;
        let transactions: Vec<EsploraTx> =
            serde_json::from_str(&body).map_err(|e| EsploraError::ParseError(e.to_string()))?;

        Ok(transactions
            .into_iter()
            .filter_map(|tx| match (tx.status.confirmed, tx.status.block_height) {
                (true, Some(height)) => Some((tx.txid, height)),
                _ => None,
            })
            .collect())
    }

    /// Broadcast a raw transaction, returning its txid
    pub async fn broadcast_tx(&self, tx_hex: &str) -> Result<String, EsploraError> {
        let url = format!("{}/tx", self.base_url);
        let resp = self.client.post(&url).body(tx_hex.to_string()).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(EsploraError::BroadcastFailed(error_text));
        }

        Ok(resp.text().await?)
    }
}

#[async_trait]
impl BitcoinChain for EsploraClient {
    async fn get_transaction(&self, transaction_hash: &Hash) -> ChainResult<Transaction> {
        let raw = self.get_tx_hex(&transaction_hash.to_string()).await?;
        Transaction::from_hex(&raw).map_err(|e| ChainError::InvalidResponse(e.to_string()))
    }

    async fn get_transaction_confirmations(&self, transaction_hash: &Hash) -> ChainResult<u64> {
        let status = self.get_tx_status(&transaction_hash.to_string()).await?;
        let tip = self.get_block_height().await?;
        Ok(status.confirmations(tip))
    }

    async fn get_latest_block_height(&self) -> ChainResult<u64> {
        Ok(self.get_block_height().await?)
    }

    async fn get_block_header(&self, block_height: u64) -> ChainResult<BlockHeader> {
        let block_hash = parse_block_hash(&self.get_block_hash(block_height).await?)?;
        let raw = self.get_block_header_hex(&block_hash.to_string()).await?;
        let header =
            BlockHeader::from_hex(&raw).map_err(|e| ChainError::InvalidResponse(e.to_string()))?;

        if header.hash() != block_hash {
            return Err(ChainError::InvalidResponse(format!(
                "header served for block {} hashes to {}",
                block_hash,
                header.hash()
            )));
        }

        Ok(header)
    }

    async fn get_transaction_merkle_proof(
        &self,
        transaction_hash: &Hash,
        block_height: u64,
    ) -> ChainResult<TransactionMerkleProof> {
        let proof = self.get_merkle_proof(&transaction_hash.to_string()).await?;
        if proof.block_height != block_height {
            return Err(ChainError::NotFound(format!(
                "transaction {} is mined at {}, not {}",
                transaction_hash, proof.block_height, block_height
            )));
        }
        Ok(proof.into())
    }

    async fn broadcast_transaction(&self, transaction: &Transaction) -> ChainResult<()> {
        let raw = hex::encode(transaction.serialize(SerializationFormat::Witness));
        let txid = self.broadcast_tx(&raw).await?;

        tracing::info!(
            target: "btc_bridge::esplora",
            txid = %txid.trim(),
            "transaction broadcast"
        );

        Ok(())
    }

    async fn get_transactions_for_public_key_hash(
        &self,
        public_key_hash: &[u8; 20],
        limit: usize,
    ) -> ChainResult<Vec<Transaction>> {
        let mut history = self
            .get_script_history(&pay_to_public_key_hash(public_key_hash))
            .await?;
        history.extend(
            self.get_script_history(&pay_to_witness_public_key_hash(public_key_hash))
                .await?,
        );

        let selected = select_recent(history, limit);

        let mut transactions = Vec::with_capacity(selected.len());
        for txid in selected {
            let hash = Hash::from_hex(&txid, ByteOrder::Reversed)
                .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;
            transactions.push(self.get_transaction(&hash).await?);
        }
        Ok(transactions)
    }
}

/// Txids of the `limit` most recent entries, oldest first
fn select_recent(mut history: Vec<(String, u64)>, limit: usize) -> Vec<String> {
    history.sort_by_key(|(_, height)| *height);
    let skip = history.len().saturating_sub(limit);
    history.into_iter().skip(skip).map(|(txid, _)| txid).collect()
}

/// Electrum-style script hash: SHA-256 of the script, reversed hex
fn script_hash_hex(script: &[u8]) -> String {
    let mut hash = sha256(script);
    hash.reverse();
    hex::encode(hash)
}

/// Transaction entry of a script history listing
#[derive(Debug, Clone, Deserialize)]
struct EsploraTx {
    txid: String,
    status: EsploraTxStatus,
}

/// Transaction status
#[derive(Debug, Clone, Deserialize)]
pub struct EsploraTxStatus {
    pub confirmed: bool,
    pub block_height: Option<u64>,
    pub block_hash: Option<String>,
    pub block_time: Option<u64>,
}

impl EsploraTxStatus {
    /// Confirmations given the current chain tip; zero while unconfirmed
    pub fn confirmations(&self, tip_height: u64) -> u64 {
        match (self.confirmed, self.block_height) {
            (true, Some(height)) if height <= tip_height => tip_height - height + 1,
            _ => 0,
        }
    }
}

/// Merkle proof as returned by `/tx/{txid}/merkle-proof`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EsploraMerkleProof {
    pub block_height: u64,
    /// Sibling hashes, reversed hex
    pub merkle: Vec<String>,
    pub pos: u64,
}

impl From<EsploraMerkleProof> for TransactionMerkleProof {
    fn from(proof: EsploraMerkleProof) -> Self {
        Self {
            block_height: proof.block_height,
            merkle_nodes: proof.merkle,
            position: proof.pos,
        }
    }
}

/// Esplora error types
#[derive(Debug, thiserror::Error)]
pub enum EsploraError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("broadcast failed: {0}")]
    BroadcastFailed(String),
}

impl From<EsploraError> for ChainError {
    fn from(err: EsploraError) -> Self {
        match err {
            EsploraError::HttpError(e) => ChainError::Transport(e.to_string()),
            EsploraError::NotFound(path) => ChainError::NotFound(path),
            EsploraError::ParseError(reason) => ChainError::InvalidResponse(reason),
            EsploraError::BroadcastFailed(reason) => ChainError::Rejected(reason),
        }
    }
}

/// Parse a block hash as served by Esplora
pub fn parse_block_hash(s: &str) -> Result<Hash, EsploraError> {
    Hash::from_hex(s.trim(), ByteOrder::Reversed).map_err(|e| EsploraError::ParseError(e.to_string()))
}
