//! Wallet Inputs
//!
//! Helpers for transactions spending a wallet's main UTXO: redemptions and
//! moving funds both spend it as their single input.

use thiserror::Error;

use crate::bitcoin::script::extract_public_key_hash;
use crate::bitcoin::{Hash, Transaction, TransactionOutpoint, TransactionOutput, UnspentTransactionOutput};
use crate::chain::{BitcoinChain, ChainError, ChainResult, SpvChain};

use super::proof::SpvError;

/// Errors of proofs for transactions spending a wallet's main UTXO
#[derive(Debug, Error)]
pub enum WalletTransactionError {
    #[error("required confirmations count must be greater than 0")]
    ZeroRequiredConfirmations,

    #[error("failed to assemble transaction spv proof: {0}")]
    Spv(#[from] SpvError),

    #[error("{kind} transaction must have exactly one input, got {count}")]
    InputCount { kind: &'static str, count: usize },

    #[error("previous output {transaction_hash}:{output_index} does not exist")]
    MissingPreviousOutput {
        transaction_hash: Hash,
        output_index: u32,
    },

    #[error("cannot extract wallet public key hash from output {transaction_hash}:{output_index}")]
    NotPublicKeyHash {
        transaction_hash: Hash,
        output_index: u32,
    },

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
}

/// Output spent by the outpoint, loaded from the chain
pub async fn get_previous_output<B>(
    btc_chain: &B,
    outpoint: &TransactionOutpoint,
) -> ChainResult<TransactionOutput>
where
    B: BitcoinChain + ?Sized,
{
    let transaction = btc_chain.get_transaction(&outpoint.transaction_hash).await?;
    transaction
        .outputs
        .get(outpoint.output_index as usize)
        .cloned()
        .ok_or_else(|| {
            ChainError::NotFound(format!(
                "output {}:{}",
                outpoint.transaction_hash, outpoint.output_index
            ))
        })
}

/// Main UTXO and wallet public key hash of a transaction whose single input
/// spends the wallet's main UTXO.
pub async fn parse_wallet_input<B>(
    kind: &'static str,
    btc_chain: &B,
    transaction: &Transaction,
) -> Result<(UnspentTransactionOutput, [u8; 20]), WalletTransactionError>
where
    B: BitcoinChain + ?Sized,
{
    let [input] = transaction.inputs.as_slice() else {
        return Err(WalletTransactionError::InputCount {
            kind,
            count: transaction.inputs.len(),
        });
    };

    let TransactionOutpoint {
        transaction_hash,
        output_index,
    } = input.outpoint;

    let previous_transaction = btc_chain.get_transaction(&transaction_hash).await?;
    let spent_output = previous_transaction
        .outputs
        .get(output_index as usize)
        .ok_or(WalletTransactionError::MissingPreviousOutput {
            transaction_hash,
            output_index,
        })?;

    let wallet_public_key_hash = extract_public_key_hash(&spent_output.public_key_script).ok_or(
        WalletTransactionError::NotPublicKeyHash {
            transaction_hash,
            output_index,
        },
    )?;

    let main_utxo = UnspentTransactionOutput {
        outpoint: input.outpoint,
        value: spent_output.value,
    };

    Ok((main_utxo, wallet_public_key_hash))
}

/// Whether the outpoint is the main UTXO the bridge currently holds for the
/// wallet.
pub async fn is_input_current_wallets_main_utxo<B, S>(
    outpoint: &TransactionOutpoint,
    wallet_public_key_hash: &[u8; 20],
    btc_chain: &B,
    spv_chain: &S,
) -> ChainResult<bool>
where
    B: BitcoinChain + ?Sized,
    S: SpvChain + ?Sized,
{
    let previous_output = get_previous_output(btc_chain, outpoint).await?;

    let main_utxo_hash = spv_chain.compute_main_utxo_hash(&UnspentTransactionOutput {
        outpoint: *outpoint,
        value: previous_output.value,
    });

    let wallet = spv_chain.get_wallet(wallet_public_key_hash).await?;

    Ok(main_utxo_hash == wallet.main_utxo_hash)
}
