//! Redemption Proofs
//!
//! Proves a wallet's redemption transaction, which pays redeemers out of the
//! wallet's main UTXO.

use crate::bitcoin::{Hash, Transaction, UnspentTransactionOutput};
use crate::chain::{BitcoinChain, SpvChain};
use crate::logging::log_proof_submission_event;

use super::proof::assemble_spv_proof;
use super::wallet::{parse_wallet_input, WalletTransactionError};

/// Assemble the SPV proof of a redemption transaction and submit it to the
/// bridge.
pub async fn submit_redemption_proof<B, S>(
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
        parse_redemption_input(btc_chain, &transaction).await?;

    let result = spv_chain
        .submit_redemption_proof_with_reimbursement(
            &transaction,
            &proof,
            &main_utxo,
            wallet_public_key_hash,
        )
        .await;

    log_proof_submission_event(
        "redemption",
        &transaction_hash.to_string(),
        required_confirmations,
        result.as_ref().err().map(|e| e.to_string()).as_deref(),
    );

    result.map_err(WalletTransactionError::Chain)
}

/// Main UTXO and wallet of a redemption transaction
pub async fn parse_redemption_input<B>(
    btc_chain: &B,
    transaction: &Transaction,
) -> Result<(UnspentTransactionOutput, [u8; 20]), WalletTransactionError>
where
    B: BitcoinChain + ?Sized,
{
    parse_wallet_input("redemption", btc_chain, transaction).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcoin::{BlockHeader, TransactionOutpoint};
    use crate::chain::TransactionMerkleProof;
    use crate::local_chain::LocalChain;

    // Testnet 15c9b4dd...1d82: change to the wallet plus two P2SH redeemers.
    const REDEMPTION_TX: &str = "0100000000010189a128bbd1fd4626f752aa9036a118b2f4b2363ef409f5b527c69d048214d3130000000000ffffffff039ef9e92e0000000016001403b74d6893ad46dfdd01b9e0e3b3385f4fce2d1e6eed10000000000017a91486884e6be1525dab5ae0b451bd2c72cee67dcf4187791411000000000017a914538e4cc700d6510c8cae5e8b688d65276771e6088702483045022100b2e7fc655e0ddadbfef49201fb5f7046a40b36848c08f17ef2e4483bffb7a29e022024616909a96f8c901572d6a9e19d29d6aee6a835b409d4383a463fe1b338a2940121028ed84936be6a9f594a2dcc636d4bebf132713da3ce4dac5c61afbf8bbb47d6f700000000";
    // Testnet 13d31482...a189, output 0 is the wallet's main UTXO.
    const MAIN_UTXO_TX: &str = "01000000000101db7aad9f51cffa7cebf5a3b41dc3552e1151d2550d8919a8e13d6bb00e046d5b0000000000ffffffff0333fc0b2f0000000016001403b74d6893ad46dfdd01b9e0e3b3385f4fce2d1e182612000000000017a914538e4cc700d6510c8cae5e8b688d65276771e60887aa9f10000000000017a91486884e6be1525dab5ae0b451bd2c72cee67dcf418702483045022100dded6eeacf49830de6f6b590a56f9b8ba3c2fda0b24e7f51884226a5ee78b5c2022024b1fbf3406716c9f9c5bfe241cfc0766af8209ecf8eb5f3318b407fd41c59ec0121028ed84936be6a9f594a2dcc636d4bebf132713da3ce4dac5c61afbf8bbb47d6f700000000";

    #[tokio::test]
    async fn test_submit_redemption_proof() {
        let chain = LocalChain::new();
        let main_utxo_hash = chain
            .add_transaction(Transaction::from_hex(MAIN_UTXO_TX).unwrap())
            .await;
        let transaction_hash = chain
            .add_transaction(Transaction::from_hex(REDEMPTION_TX).unwrap())
            .await;

        let headers: Vec<(u64, BlockHeader)> = (0..6)
            .map(|i: u64| {
                (
                    2_406_100 + i,
                    BlockHeader {
                        version: 4,
                        previous_block_header_hash: Hash::compute(&i.to_le_bytes()),
                        merkle_root_hash: transaction_hash,
                        time: 1_680_000_000 + i as u32,
                        bits: 0x1d00_ffff,
                        nonce: i as u32,
                    },
                )
            })
            .collect();
        chain.set_block_headers(headers.clone()).await;
        chain.set_transaction_confirmations(transaction_hash, 6).await;
        chain
            .set_transaction_merkle_proof(
                transaction_hash,
                TransactionMerkleProof {
                    block_height: 2_406_100,
                    merkle_nodes: vec![
                        "7bffaff2c61291861276da41cf6c3842fad555af97dd1ff98ce41c61a0072b12".to_string(),
                    ],
                    position: 2,
                },
            )
            .await;

        submit_redemption_proof(&transaction_hash, 6, &chain, &chain)
            .await
            .unwrap();

        let submissions = chain.redemption_submissions().await;
        assert_eq!(submissions.len(), 1);

        let submission = &submissions[0];
        assert_eq!(submission.transaction.hash(), transaction_hash);
        assert_eq!(submission.proof.tx_index_in_block, 2);
        assert_eq!(submission.proof.bitcoin_headers.len(), 6 * 80);
        assert_eq!(
            submission.main_utxo,
            UnspentTransactionOutput {
                outpoint: TransactionOutpoint::new(main_utxo_hash, 0),
                value: 789_314_611,
            }
        );
        assert_eq!(
            hex::encode(submission.wallet_public_key_hash),
            "03b74d6893ad46dfdd01b9e0e3b3385f4fce2d1e"
        );
    }

    #[tokio::test]
    async fn test_parse_redemption_input_requires_funding_transaction() {
        let chain = LocalChain::new();
        let transaction = Transaction::from_hex(REDEMPTION_TX).unwrap();

        assert!(matches!(
            parse_redemption_input(&chain, &transaction).await,
            Err(WalletTransactionError::Chain(_))
        ));
    }
}
