//! SPV Proof Assembly
//!
//! Builds the Merkle inclusion proof and the header chain a bridge contract
//! needs to accept a Bitcoin transaction, and works out how many headers the
//! difficulty relay will require for it.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bitcoin::transaction::hex_bytes;
use crate::bitcoin::{ByteOrder, Hash, Transaction};
use crate::chain::{BitcoinChain, ChainError, DifficultyChain, SpvChain};

/// Number of blocks in a Bitcoin difficulty epoch
pub const DIFFICULTY_EPOCH_LENGTH: u64 = 2016;

/// SPV errors
#[derive(Debug, Error)]
pub enum SpvError {
    #[error("required confirmations count must be greater than 0")]
    ZeroRequiredConfirmations,

    #[error("insufficient confirmations: required {required}, got {actual}")]
    InsufficientConfirmations { required: u64, actual: u64 },

    #[error("transaction has {confirmations} confirmations but the chain tip is at {latest_height}")]
    InconsistentConfirmations { confirmations: u64, latest_height: u64 },

    #[error("failed to get block header at height {height}: {source}")]
    MissingHeader {
        height: u64,
        #[source]
        source: ChainError,
    },

    #[error("invalid merkle node {node}: {reason}")]
    InvalidMerkleNode { node: String, reason: String },

    #[error("relay reports zero difficulty for the current epoch")]
    ZeroEpochDifficulty,

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
}

/// Proof of inclusion of a transaction in the Bitcoin chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpvProof {
    /// Sibling hashes in internal byte order, concatenated deepest first
    #[serde(with = "hex_bytes")]
    pub merkle_proof: Vec<u8>,
    /// Position of the transaction in its block
    pub tx_index_in_block: u64,
    /// Raw 80-byte headers, oldest first, starting at the transaction's block
    #[serde(with = "hex_bytes")]
    pub bitcoin_headers: Vec<u8>,
}

/// Assemble the SPV proof of a transaction with `required_confirmations`
/// headers.
///
/// Nothing is returned unless every header and the Merkle branch could be
/// fetched.
pub async fn assemble_spv_proof<C>(
    transaction_hash: &Hash,
    required_confirmations: u64,
    chain: &C,
) -> Result<(Transaction, SpvProof), SpvError>
where
    C: BitcoinChain + ?Sized,
{
    if required_confirmations == 0 {
        return Err(SpvError::ZeroRequiredConfirmations);
    }

    let confirmations = chain.get_transaction_confirmations(transaction_hash).await?;
    if confirmations < required_confirmations {
        return Err(SpvError::InsufficientConfirmations {
            required: required_confirmations,
            actual: confirmations,
        });
    }

    let transaction = chain.get_transaction(transaction_hash).await?;

    let latest_height = chain.get_latest_block_height().await?;
    let block_height = first_confirmed_height(latest_height, confirmations)?;

    let mut bitcoin_headers = Vec::new();
    for height in block_height..block_height + required_confirmations {
        let header = chain
            .get_block_header(height)
            .await
            .map_err(|source| SpvError::MissingHeader { height, source })?;
        bitcoin_headers.extend_from_slice(&header.serialize());
    }

    let merkle = chain
        .get_transaction_merkle_proof(transaction_hash, block_height)
        .await?;

    let mut merkle_proof = Vec::with_capacity(32 * merkle.merkle_nodes.len());
    for node in &merkle.merkle_nodes {
        let hash = Hash::from_hex(node, ByteOrder::Reversed).map_err(|e| {
            SpvError::InvalidMerkleNode {
                node: node.clone(),
                reason: e.to_string(),
            }
        })?;
        merkle_proof.extend_from_slice(hash.as_bytes());
    }

    let proof = SpvProof {
        merkle_proof,
        tx_index_in_block: merkle.position,
        bitcoin_headers,
    };

    Ok((transaction, proof))
}

/// Height of the block holding a transaction with `confirmations`
fn first_confirmed_height(latest_height: u64, confirmations: u64) -> Result<u64, SpvError> {
    latest_height
        .checked_add(1)
        .and_then(|next| next.checked_sub(confirmations))
        .ok_or(SpvError::InconsistentConfirmations {
            confirmations,
            latest_height,
        })
}

/// Where a transaction proof falls relative to the relay's known epochs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofInfo {
    /// Whether the proof lies within the relay's previous and current epochs
    pub is_within_relay_range: bool,
    /// Confirmations the transaction has accumulated so far
    pub accumulated_confirmations: u64,
    /// Headers the proof must carry, zero when out of range
    pub required_confirmations: u64,
}

/// Compute how many confirmations a proof of the transaction needs.
///
/// A proof entirely within the relay's current or previous epoch needs
/// `tx_proof_difficulty_factor` headers. A proof starting in the previous
/// epoch and ending in the current one must still accumulate the previous
/// epoch's difficulty times the factor, so the count is adjusted to the
/// current epoch's difficulty. Any other proof range is out of the relay's
/// reach.
pub async fn get_proof_info<B, S, D>(
    transaction_hash: &Hash,
    btc_chain: &B,
    spv_chain: &S,
    difficulty_chain: &D,
) -> Result<ProofInfo, SpvError>
where
    B: BitcoinChain + ?Sized,
    S: SpvChain + ?Sized,
    D: DifficultyChain + ?Sized,
{
    let latest_height = btc_chain.get_latest_block_height().await?;
    let accumulated_confirmations = btc_chain
        .get_transaction_confirmations(transaction_hash)
        .await?;
    let factor = spv_chain.tx_proof_difficulty_factor().await?;

    let out_of_range = ProofInfo {
        is_within_relay_range: false,
        accumulated_confirmations,
        required_confirmations: 0,
    };
    let within_range = |required_confirmations| ProofInfo {
        is_within_relay_range: true,
        accumulated_confirmations,
        required_confirmations,
    };

    let proof_start = first_confirmed_height(latest_height, accumulated_confirmations)?;
    let proof_end = proof_start.saturating_add(factor).saturating_sub(1);

    let start_epoch = proof_start / DIFFICULTY_EPOCH_LENGTH;
    let end_epoch = proof_end / DIFFICULTY_EPOCH_LENGTH;

    let current_epoch = difficulty_chain.current_epoch().await?;
    let previous_epoch = current_epoch.checked_sub(1);

    if start_epoch == current_epoch && end_epoch == current_epoch {
        return Ok(within_range(factor));
    }

    if Some(start_epoch) == previous_epoch && Some(end_epoch) == previous_epoch {
        return Ok(within_range(factor));
    }

    if Some(start_epoch) == previous_epoch && end_epoch == current_epoch {
        let (current_difficulty, previous_difficulty) =
            difficulty_chain.get_current_and_prev_epoch_difficulty().await?;
        if current_difficulty.is_zero() {
            return Err(SpvError::ZeroEpochDifficulty);
        }

        let blocks_previous_epoch = DIFFICULTY_EPOCH_LENGTH - proof_start % DIFFICULTY_EPOCH_LENGTH;

        let total_required = previous_difficulty.saturating_mul(U256::from(factor));
        let from_previous_epoch =
            previous_difficulty.saturating_mul(U256::from(blocks_previous_epoch));
        let from_current_epoch = total_required.saturating_sub(from_previous_epoch);

        let (mut blocks_current_epoch, remainder) = from_current_epoch.div_mod(current_difficulty);
        if !remainder.is_zero() {
            blocks_current_epoch += U256::one();
        }

        return Ok(within_range(
            blocks_previous_epoch + blocks_current_epoch.low_u64(),
        ));
    }

    Ok(out_of_range)
}
