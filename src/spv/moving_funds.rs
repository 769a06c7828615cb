//! Moving Funds Proofs
//!
//! Proves the transaction moving a closing wallet's main UTXO to its target
//! wallets.

use crate::bitcoin::{Hash, Transaction, UnspentTransactionOutput};
use crate::chain::{BitcoinChain, SpvChain};
use crate::logging::log_proof_submission_event;

use super::proof::assemble_spv_proof;
use super::wallet::{parse_wallet_input, WalletTransactionError};

/// Assemble the SPV proof of a moving funds transaction and submit it to the
/// bridge.
pub async fn submit_moving_funds_proof<B, S>(
    transaction_hash: &Hash,
    required_confirmations: u64,
    btc_chain: &B,
    spv_chain: &S,
) -> Result<(), WalletTransactionError>
where
    B: BitcoinChain + ?Sized,
    S: SpvChain + ?Sized,
{
    if required_confirmations == 0 {
        return Err(WalletTransactionError::ZeroRequiredConfirmations);
    }

    let (transaction, proof) =
        assemble_spv_proof(transaction_hash, required_confirmations, btc_chain).await?;

    let (main_utxo, wallet_public_key_hash) =
        parse_moving_funds_input(btc_chain, &transaction).await?;

    tracing::debug!(
        target: "btc_bridge::spv",
        transaction = %transaction_hash,
        wallet = %hex::encode(wallet_public_key_hash),
        "submitting moving funds proof"
    );

    let result = spv_chain
        .submit_moving_funds_proof_with_reimbursement(
            &transaction,
            &proof,
            &main_utxo,
            wallet_public_key_hash,
        )
        .await;

    log_proof_submission_event(
        "moving_funds",
        &transaction_hash.to_string(),
        required_confirmations,
        result.as_ref().err().map(|e| e.to_string()).as_deref(),
    );

    result.map_err(WalletTransactionError::Chain)
}

/// Main UTXO and source wallet of a moving funds transaction, which spends
/// the wallet's main UTXO as its only input.
pub async fn parse_moving_funds_input<B>(
    btc_chain: &B,
    transaction: &Transaction,
) -> Result<(UnspentTransactionOutput, [u8; 20]), WalletTransactionError>
where
    B: BitcoinChain + ?Sized,
{
    parse_wallet_input("moving funds", btc_chain, transaction).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcoin::{BlockHeader, TransactionOutpoint};
    use crate::chain::TransactionMerkleProof;
    use crate::local_chain::LocalChain;

    // Testnet e6218018...ff7c, moving funds to three target wallets.
    const MOVING_FUNDS_TX: &str = "0100000000010180653f6e07dabddae14cf08d45475388343763100e4548914d811f373465a42e0100000000ffffffff031c160900000000001976a9142cd680318747b720d67bf4246eb7403b476adb3488ac1d160900000000001600148900de8fc6e4cd1db4c7ab0759d28503b4cb0ab11c160900000000001976a914af7a841e055fc19bf31acf4cbed5ef548a2cc45388ac0247304402202d615c196548b6cb4f1cd1f44b559cd348ce2cb8bd90356be9883a7460d7c8aa0220675e7b67e4d96a6180f7adb5ecb9ab962275d39742009911980e19e734523ff4012102ee067a0273f2e3ba88d23140a24fdb290f27bbcd0f94117a9c65be3911c5c04e00000000";
    // Testnet 2ea46534...6580, output 1 is the wallet's main UTXO.
    const MAIN_UTXO_TX: &str = "02000000000101f064a0d2775bda695f1b5e476c1860aa541ef065c5d9a4eb5d49fc8595c6c1dd0100000000feffffff0252ba92190200000016001420e46ff6ba650c7898839617ce40ef54ca0e33377d651b00000000001600147ac2d9378a1c47e589dfb8095ca95ed2140d2726024730440220755156b6d9759f213a5fe189e222e9b781b6386ed83fbf070113b082ff2ddcd60220355820a2a87990271dcdedb57a80402b18e1aa6fcbaf7fa15eb06ba06790cfc101210399d30f01b702d4b8607c429af6bb7d0611cf6333a23154b31ba2aaefdd88d5b6b2782100";

    /// Chain where the moving funds transaction is mined with one
    /// confirmation at height 2_407_000
    async fn proven_chain() -> (LocalChain, Hash, Hash) {
        let chain = LocalChain::new();
        let main_utxo_hash = chain
            .add_transaction(Transaction::from_hex(MAIN_UTXO_TX).unwrap())
            .await;
        let transaction_hash = chain
            .add_transaction(Transaction::from_hex(MOVING_FUNDS_TX).unwrap())
            .await;

        let header = BlockHeader {
            version: 4,
            previous_block_header_hash: Hash::compute(b"parent"),
            merkle_root_hash: transaction_hash,
            time: 1_680_000_000,
            bits: 0x1d00_ffff,
            nonce: 1,
        };
        chain.set_block_headers(vec![(2_407_000, header)]).await;
        chain.set_transaction_confirmations(transaction_hash, 1).await;
        chain
            .set_transaction_merkle_proof(
                transaction_hash,
                TransactionMerkleProof {
                    block_height: 2_407_000,
                    merkle_nodes: vec![],
                    position: 0,
                },
            )
            .await;

        (chain, main_utxo_hash, transaction_hash)
    }

    #[tokio::test]
    async fn test_submit_moving_funds_proof() {
        let (chain, main_utxo_hash, transaction_hash) = proven_chain().await;

        submit_moving_funds_proof(&transaction_hash, 1, &chain, &chain)
            .await
            .unwrap();

        let submissions = chain.moving_funds_submissions().await;
        assert_eq!(submissions.len(), 1);

        let submission = &submissions[0];
        assert_eq!(submission.transaction.hash(), transaction_hash);
        assert_eq!(
            submission.main_utxo,
            UnspentTransactionOutput {
                outpoint: TransactionOutpoint::new(main_utxo_hash, 1),
                value: 1_795_453,
            }
        );
        assert_eq!(
            hex::encode(submission.wallet_public_key_hash),
            "7ac2d9378a1c47e589dfb8095ca95ed2140d2726"
        );
        assert!(chain.redemption_submissions().await.is_empty());
    }

    #[tokio::test]
    async fn test_submit_moving_funds_proof_failures() {
        let (chain, _, transaction_hash) = proven_chain().await;

        assert!(matches!(
            submit_moving_funds_proof(&transaction_hash, 0, &chain, &chain).await,
            Err(WalletTransactionError::ZeroRequiredConfirmations)
        ));
        assert!(matches!(
            submit_moving_funds_proof(&transaction_hash, 2, &chain, &chain).await,
            Err(WalletTransactionError::Spv(_))
        ));
        assert!(chain.moving_funds_submissions().await.is_empty());
    }
}
