//! Deposit Sweep Proofs
//!
//! Proves a wallet's deposit sweep transaction to the bridge contract. The
//! sweep's inputs are split into the wallet's main UTXO and the swept
//! deposits, whose common vault goes along with the proof.

use thiserror::Error;

use crate::bitcoin::{
    Hash, ScriptType, Transaction, TransactionOutpoint, UnspentTransactionOutput,
};
use crate::chain::{BitcoinChain, ChainError, DepositSweepProposalSubmittedEvent, SpvChain};
use crate::logging::log_proof_submission_event;

use super::proof::{assemble_spv_proof, SpvError};
use super::wallet::is_input_current_wallets_main_utxo;

/// Deposit sweep errors
#[derive(Debug, Error)]
pub enum DepositSweepError {
    #[error("required confirmations count must be greater than 0")]
    ZeroRequiredConfirmations,

    #[error("failed to assemble transaction spv proof: {0}")]
    Spv(#[from] SpvError),

    #[error("deposit sweep transaction must have exactly one output, got {0}")]
    OutputCount(usize),

    #[error("deposit sweep transaction has more than one non-deposit input")]
    MultipleMainUtxos,

    #[error("deposit not found: {transaction_hash}:{output_index}")]
    DepositNotFound {
        transaction_hash: Hash,
        output_index: u32,
    },

    #[error("swept deposits have different vaults")]
    DifferentVaults,

    #[error("deposit sweep transaction input {0} has an incorrect type")]
    IncorrectInputType(usize),

    #[error("previous output {transaction_hash}:{output_index} does not exist")]
    MissingPreviousOutput {
        transaction_hash: Hash,
        output_index: u32,
    },

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
}

/// Assemble the SPV proof of a deposit sweep and submit it to the bridge.
pub async fn submit_deposit_sweep_proof<B, S>(
    transaction_hash: &Hash,
    required_confirmations: u64,
    btc_chain: &B,
    spv_chain: &S,
) -> Result<(), DepositSweepError>
where
    B: BitcoinChain + ?Sized,
    S: SpvChain + ?Sized,
{
    if required_confirmations == 0 {
        return Err(DepositSweepError::ZeroRequiredConfirmations);
    }

    let (transaction, proof) =
        assemble_spv_proof(transaction_hash, required_confirmations, btc_chain).await?;

    let (main_utxo, vault) = parse_deposit_sweep_inputs(btc_chain, spv_chain, &transaction).await?;

    tracing::debug!(
        target: "btc_bridge::spv",
        transaction = %transaction_hash,
        main_utxo = %main_utxo.outpoint.transaction_hash,
        vault = ?vault,
        "submitting deposit sweep proof"
    );

    let result = spv_chain
        .submit_deposit_sweep_proof_with_reimbursement(&transaction, &proof, &main_utxo, vault)
        .await;

    log_proof_submission_event(
        "deposit_sweep",
        &transaction_hash.to_string(),
        required_confirmations,
        result.as_ref().err().map(|e| e.to_string()).as_deref(),
    );

    result.map_err(DepositSweepError::Chain)
}

/// Split a deposit sweep's inputs into the main UTXO and the deposits' vault.
///
/// P2PKH and P2WPKH inputs spend the wallet's main UTXO, of which there is at
/// most one. P2SH and P2WSH inputs spend revealed deposits, which must all
/// share the same vault. A sweep without a main UTXO yields the zero UTXO.
pub async fn parse_deposit_sweep_inputs<B, S>(
    btc_chain: &B,
    spv_chain: &S,
    transaction: &Transaction,
) -> Result<(UnspentTransactionOutput, Option<String>), DepositSweepError>
where
    B: BitcoinChain + ?Sized,
    S: SpvChain + ?Sized,
{
    if transaction.outputs.len() != 1 {
        return Err(DepositSweepError::OutputCount(transaction.outputs.len()));
    }

    let mut main_utxo: Option<UnspentTransactionOutput> = None;
    // Outer `Some` once the first deposit has been seen.
    let mut vault: Option<Option<String>> = None;

    for (index, input) in transaction.inputs.iter().enumerate() {
        let TransactionOutpoint {
            transaction_hash,
            output_index,
        } = input.outpoint;

        let previous_transaction = btc_chain.get_transaction(&transaction_hash).await?;
        let previous_output = previous_transaction
            .outputs
            .get(output_index as usize)
            .ok_or(DepositSweepError::MissingPreviousOutput {
                transaction_hash,
                output_index,
            })?;

        match ScriptType::classify(&previous_output.public_key_script) {
            ScriptType::P2PKH | ScriptType::P2WPKH => {
                if main_utxo.is_some() {
                    return Err(DepositSweepError::MultipleMainUtxos);
                }
                main_utxo = Some(UnspentTransactionOutput {
                    outpoint: input.outpoint,
                    value: previous_output.value,
                });
            }
            ScriptType::P2SH | ScriptType::P2WSH => {
                let deposit = spv_chain
                    .get_deposit_request(&transaction_hash, output_index)
                    .await?
                    .ok_or(DepositSweepError::DepositNotFound {
                        transaction_hash,
                        output_index,
                    })?;

                match &vault {
                    Some(seen) if *seen != deposit.vault => {
                        return Err(DepositSweepError::DifferentVaults);
                    }
                    Some(_) => {}
                    None => vault = Some(deposit.vault),
                }
            }
            ScriptType::NonStandard => {
                return Err(DepositSweepError::IncorrectInputType(index));
            }
        }
    }

    Ok((
        main_utxo.unwrap_or_else(UnspentTransactionOutput::zero),
        vault.flatten(),
    ))
}

/// Wallets of the proposals, first occurrence order, without repetition
pub fn unique_wallet_public_key_hashes(
    events: &[DepositSweepProposalSubmittedEvent],
) -> Vec<[u8; 20]> {
    let mut wallets: Vec<[u8; 20]> = Vec::new();
    for event in events {
        if !wallets.contains(&event.wallet_public_key_hash) {
            wallets.push(event.wallet_public_key_hash);
        }
    }
    wallets
}

/// Deposit sweeps of recently proposed wallets the bridge has not seen
/// proven yet.
///
/// Wallets come from the sweep proposals of the last `history_depth`
/// host-chain blocks. Only the `transaction_limit` most recent transactions
/// of each wallet are inspected, and wallets no longer accepting sweeps are
/// skipped.
pub async fn get_unproven_deposit_sweep_transactions<B, S>(
    history_depth: u64,
    transaction_limit: usize,
    btc_chain: &B,
    spv_chain: &S,
) -> Result<Vec<Transaction>, DepositSweepError>
where
    B: BitcoinChain + ?Sized,
    S: SpvChain + ?Sized,
{
    let current_block = spv_chain.current_block().await?;
    let start_block = current_block.saturating_sub(history_depth);

    let events = spv_chain
        .past_deposit_sweep_proposal_submitted_events(start_block)
        .await?;
    let wallets = unique_wallet_public_key_hashes(&events);

    tracing::debug!(
        target: "btc_bridge::spv",
        start_block,
        events = events.len(),
        wallets = wallets.len(),
        "looking for unproven deposit sweeps"
    );

    let mut unproven = Vec::new();

    for wallet_public_key_hash in wallets {
        let wallet = spv_chain.get_wallet(&wallet_public_key_hash).await?;
        if !wallet.state.accepts_deposit_sweeps() {
            tracing::debug!(
                target: "btc_bridge::spv",
                wallet = %hex::encode(wallet_public_key_hash),
                state = ?wallet.state,
                "skipping wallet not accepting deposit sweeps"
            );
            continue;
        }

        let transactions = btc_chain
            .get_transactions_for_public_key_hash(&wallet_public_key_hash, transaction_limit)
            .await?;

        for transaction in transactions {
            if is_unproven_deposit_sweep_transaction(
                &transaction,
                &wallet_public_key_hash,
                btc_chain,
                spv_chain,
            )
            .await?
            {
                unproven.push(transaction);
            }
        }
    }

    Ok(unproven)
}

/// Whether the transaction is a deposit sweep of the wallet the bridge has
/// not been shown yet.
///
/// Every input must either spend an unswept revealed deposit or be the
/// wallet's current main UTXO, and at least one deposit must be spent.
pub async fn is_unproven_deposit_sweep_transaction<B, S>(
    transaction: &Transaction,
    wallet_public_key_hash: &[u8; 20],
    btc_chain: &B,
    spv_chain: &S,
) -> Result<bool, DepositSweepError>
where
    B: BitcoinChain + ?Sized,
    S: SpvChain + ?Sized,
{
    if transaction.outputs.len() != 1 {
        return Ok(false);
    }

    let mut has_deposit_inputs = false;

    for input in &transaction.inputs {
        let TransactionOutpoint {
            transaction_hash,
            output_index,
        } = input.outpoint;

        match spv_chain
            .get_deposit_request(&transaction_hash, output_index)
            .await?
        {
            Some(deposit) if deposit.is_swept() => return Ok(false),
            Some(_) => has_deposit_inputs = true,
            None => {
                let is_main_utxo = is_input_current_wallets_main_utxo(
                    &input.outpoint,
                    wallet_public_key_hash,
                    btc_chain,
                    spv_chain,
                )
                .await?;
                if !is_main_utxo {
                    return Ok(false);
                }
            }
        }
    }

    Ok(has_deposit_inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcoin::{BlockHeader, TransactionInput, TransactionOutput};
    use crate::chain::{
        DepositRequest, MockBitcoinChain, TransactionMerkleProof, Wallet, WalletState,
    };
    use crate::local_chain::LocalChain;

    // Output 0 is a P2SH deposit, output 1 the wallet's P2WPKH change.
    const DEPOSIT_AND_MAIN_UTXO_TX: &str = "01000000011d9b71144a3ddbb56dd099ee94e6dd8646d7d1eb37fe1195367e6fa844a388e7010000006a47304402206f8553c07bcdc0c3b906311888103d623ca9096ca0b28b7d04650a029a01fcf9022064cda02e39e65ace712029845cfcf58d1b59617d753c3fd3556f3551b609bbb00121039d61d62dcd048d3f8550d22eb90b4af908db60231d117aeede04e7bc11907bfaffffffff02204e00000000000017a9143ec459d0f3c29286ae5df5fcc421e2786024277e87a6c2140000000000160014e257eccafbc07c381642ce6e7e55120fb077fbed00000000";
    // Output 0 is a P2WSH deposit.
    const WITNESS_DEPOSIT_TX: &str = "0100000000010189f12fac482d2b036f74378a9c9af7ab17bcc963d4172cec78d01750dd1b13e20100000000ffffffff028038010000000000220020ef0b4d985752aa5ef6243e4c6f6bebc2a007e7d671ef27d4b1d0db8dcc93bc1c7ad42900000000001600147ac2d9378a1c47e589dfb8095ca95ed2140d27260247304402205e28ad48e4b128ce8b30dae8c98c8422a5a1e9aa079c0aa9d21cae999831851d02204603961ea369acfdff28a5fee1b095a9ee6a338d5c13cf8775023418e1e7c4d8012102ee067a0273f2e3ba88d23140a24fdb290f27bbcd0f94117a9c65be3911c5c04e00000000";

    const VAULT: &str = "0x594cfd89700040163727828AE20B52099C58F02C";

    fn deposit(vault: Option<&str>) -> DepositRequest {
        DepositRequest {
            depositor: "0x7F62CddE8A86328d63B9517BC70B255017f25EEa".to_string(),
            amount: 20_000,
            revealed_at: 1_670_000_000,
            vault: vault.map(str::to_string),
            treasury_fee: 10,
            swept_at: 0,
        }
    }

    fn sweep(outpoints: &[(Hash, u32)], outputs: usize) -> Transaction {
        Transaction {
            version: 1,
            inputs: outpoints
                .iter()
                .map(|&(hash, index)| TransactionInput::new(TransactionOutpoint::new(hash, index)))
                .collect(),
            outputs: (0..outputs)
                .map(|_| {
                    TransactionOutput::new(
                        1_400_000,
                        hex::decode("0014e257eccafbc07c381642ce6e7e55120fb077fbed").unwrap(),
                    )
                })
                .collect(),
            locktime: 0,
        }
    }

    /// Chain with both funding transactions and their deposits revealed
    async fn funded_chain(vaults: (Option<&str>, Option<&str>)) -> (LocalChain, Hash, Hash) {
        let chain = LocalChain::new();
        let legacy = chain
            .add_transaction(Transaction::from_hex(DEPOSIT_AND_MAIN_UTXO_TX).unwrap())
            .await;
        let witness = chain
            .add_transaction(Transaction::from_hex(WITNESS_DEPOSIT_TX).unwrap())
            .await;

        chain.set_deposit_request(legacy, 0, deposit(vaults.0)).await;
        chain.set_deposit_request(witness, 0, deposit(vaults.1)).await;

        (chain, legacy, witness)
    }

    #[tokio::test]
    async fn test_parse_deposits_and_main_utxo() {
        let (chain, legacy, witness) = funded_chain((Some(VAULT), Some(VAULT))).await;
        let transaction = sweep(&[(legacy, 0), (legacy, 1), (witness, 0)], 1);

        let (main_utxo, vault) = parse_deposit_sweep_inputs(&chain, &chain, &transaction)
            .await
            .unwrap();

        assert_eq!(
            main_utxo,
            UnspentTransactionOutput {
                outpoint: TransactionOutpoint::new(legacy, 1),
                value: 1_360_550,
            }
        );
        assert_eq!(vault.as_deref(), Some(VAULT));
    }

    #[tokio::test]
    async fn test_parse_deposits_without_main_utxo() {
        let (chain, legacy, witness) = funded_chain((None, None)).await;
        let transaction = sweep(&[(witness, 0), (legacy, 0)], 1);

        let (main_utxo, vault) = parse_deposit_sweep_inputs(&chain, &chain, &transaction)
            .await
            .unwrap();

        assert_eq!(main_utxo, UnspentTransactionOutput::zero());
        assert_eq!(vault, None);
    }

    #[tokio::test]
    async fn test_parse_rejects_different_vaults() {
        let (chain, legacy, witness) = funded_chain((Some(VAULT), None)).await;
        let transaction = sweep(&[(legacy, 0), (witness, 0)], 1);

        let result = parse_deposit_sweep_inputs(&chain, &chain, &transaction).await;
        assert!(matches!(result, Err(DepositSweepError::DifferentVaults)));
    }

    #[tokio::test]
    async fn test_parse_rejects_malformed_sweeps() {
        let (chain, legacy, witness) = funded_chain((None, None)).await;

        let two_outputs = sweep(&[(legacy, 0)], 2);
        assert!(matches!(
            parse_deposit_sweep_inputs(&chain, &chain, &two_outputs).await,
            Err(DepositSweepError::OutputCount(2))
        ));

        // Output 1 of both funding transactions is P2WPKH.
        let two_main_utxos = sweep(&[(legacy, 1), (witness, 1)], 1);
        assert!(matches!(
            parse_deposit_sweep_inputs(&chain, &chain, &two_main_utxos).await,
            Err(DepositSweepError::MultipleMainUtxos)
        ));

        let missing_output = sweep(&[(legacy, 2)], 1);
        assert!(matches!(
            parse_deposit_sweep_inputs(&chain, &chain, &missing_output).await,
            Err(DepositSweepError::MissingPreviousOutput { output_index: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_parse_rejects_unknown_deposit() {
        let chain = LocalChain::new();
        let legacy = chain
            .add_transaction(Transaction::from_hex(DEPOSIT_AND_MAIN_UTXO_TX).unwrap())
            .await;
        let transaction = sweep(&[(legacy, 0)], 1);

        let result = parse_deposit_sweep_inputs(&chain, &chain, &transaction).await;
        assert!(matches!(
            result,
            Err(DepositSweepError::DepositNotFound { output_index: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_parse_rejects_non_standard_input() {
        let chain = LocalChain::new();
        let funding = chain
            .add_transaction(Transaction {
                version: 1,
                inputs: vec![],
                outputs: vec![TransactionOutput::new(5_000, vec![0x51])],
                locktime: 0,
            })
            .await;
        let transaction = sweep(&[(funding, 0)], 1);

        let result = parse_deposit_sweep_inputs(&chain, &chain, &transaction).await;
        assert!(matches!(result, Err(DepositSweepError::IncorrectInputType(0))));
    }

    #[tokio::test]
    async fn test_submit_deposit_sweep_proof() {
        let (chain, legacy, witness) = funded_chain((Some(VAULT), Some(VAULT))).await;
        let transaction = sweep(&[(legacy, 0), (legacy, 1), (witness, 0)], 1);
        let transaction_hash = chain.add_transaction(transaction.clone()).await;

        let header = BlockHeader {
            version: 4,
            previous_block_header_hash: Hash::compute(b"parent"),
            merkle_root_hash: transaction_hash,
            time: 1_646_051_559,
            bits: 0x1d00_ffff,
            nonce: 7,
        };
        chain.set_block_headers(vec![(2_164_200, header)]).await;
        chain.set_transaction_confirmations(transaction_hash, 1).await;
        chain
            .set_transaction_merkle_proof(
                transaction_hash,
                TransactionMerkleProof {
                    block_height: 2_164_200,
                    merkle_nodes: vec![],
                    position: 0,
                },
            )
            .await;

        submit_deposit_sweep_proof(&transaction_hash, 1, &chain, &chain)
            .await
            .unwrap();

        let submissions = chain.deposit_sweep_submissions().await;
        assert_eq!(submissions.len(), 1);

        let submission = &submissions[0];
        assert_eq!(submission.transaction, transaction);
        assert_eq!(submission.main_utxo.outpoint, TransactionOutpoint::new(legacy, 1));
        assert_eq!(submission.vault.as_deref(), Some(VAULT));
        assert_eq!(submission.proof.bitcoin_headers, header.serialize().to_vec());
        assert!(submission.proof.merkle_proof.is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_zero_confirmations() {
        let btc_chain = MockBitcoinChain::new();
        let spv_chain = LocalChain::new();

        let result = submit_deposit_sweep_proof(&Hash::compute(b"sweep"), 0, &btc_chain, &spv_chain).await;
        assert!(matches!(result, Err(DepositSweepError::ZeroRequiredConfirmations)));
        assert!(spv_chain.deposit_sweep_submissions().await.is_empty());
    }

    const WALLET: [u8; 20] = [0xe2; 20];

    fn proposal(wallet_public_key_hash: [u8; 20], block_number: u64) -> DepositSweepProposalSubmittedEvent {
        DepositSweepProposalSubmittedEvent {
            wallet_public_key_hash,
            block_number,
        }
    }

    /// Funded chain where `(legacy, 1)` is the wallet's current main UTXO
    async fn wallet_chain(state: WalletState) -> (LocalChain, Hash, Hash) {
        let (chain, legacy, witness) = funded_chain((None, None)).await;
        let main_utxo_hash = chain.compute_main_utxo_hash(&UnspentTransactionOutput {
            outpoint: TransactionOutpoint::new(legacy, 1),
            value: 1_360_550,
        });
        chain
            .set_wallet(
                WALLET,
                Wallet {
                    main_utxo_hash,
                    state,
                },
            )
            .await;
        (chain, legacy, witness)
    }

    #[test]
    fn test_unique_wallet_public_key_hashes() {
        let events = vec![
            proposal([0x02; 20], 10),
            proposal([0x01; 20], 11),
            proposal([0x02; 20], 12),
            proposal([0x03; 20], 13),
            proposal([0x01; 20], 14),
        ];

        assert_eq!(
            unique_wallet_public_key_hashes(&events),
            vec![[0x02; 20], [0x01; 20], [0x03; 20]]
        );
        assert!(unique_wallet_public_key_hashes(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_is_unproven_deposit_sweep_transaction() {
        let (chain, legacy, witness) = wallet_chain(WalletState::Live).await;

        let with_main_utxo = sweep(&[(legacy, 1), (legacy, 0), (witness, 0)], 1);
        assert!(is_unproven_deposit_sweep_transaction(&with_main_utxo, &WALLET, &chain, &chain)
            .await
            .unwrap());

        let deposits_only = sweep(&[(witness, 0)], 1);
        assert!(is_unproven_deposit_sweep_transaction(&deposits_only, &WALLET, &chain, &chain)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_is_unproven_deposit_sweep_transaction_rejections() {
        let (chain, legacy, witness) = wallet_chain(WalletState::Live).await;

        // Not a sweep: two outputs.
        let two_outputs = sweep(&[(legacy, 0)], 2);
        assert!(!is_unproven_deposit_sweep_transaction(&two_outputs, &WALLET, &chain, &chain)
            .await
            .unwrap());

        // Spends the main UTXO but no deposit.
        let main_utxo_only = sweep(&[(legacy, 1)], 1);
        assert!(!is_unproven_deposit_sweep_transaction(&main_utxo_only, &WALLET, &chain, &chain)
            .await
            .unwrap());

        // The non-deposit input is not the wallet's current main UTXO.
        let stale_main_utxo = sweep(&[(witness, 1), (legacy, 0)], 1);
        assert!(!is_unproven_deposit_sweep_transaction(&stale_main_utxo, &WALLET, &chain, &chain)
            .await
            .unwrap());

        // Already proven: the bridge marked the deposit swept.
        chain
            .set_deposit_request(
                witness,
                0,
                DepositRequest {
                    swept_at: 1_670_000_500,
                    ..deposit(None)
                },
            )
            .await;
        let swept = sweep(&[(legacy, 1), (legacy, 0), (witness, 0)], 1);
        assert!(!is_unproven_deposit_sweep_transaction(&swept, &WALLET, &chain, &chain)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_get_unproven_deposit_sweep_transactions() {
        let (chain, legacy, witness) = wallet_chain(WalletState::Live).await;
        let closed_wallet = [0xc1; 20];
        chain
            .set_wallet(
                closed_wallet,
                Wallet {
                    state: WalletState::Closed,
                    ..Wallet::default()
                },
            )
            .await;

        chain.set_current_block(1_000).await;
        // Outside the history window, and not a known wallet.
        chain.add_deposit_sweep_proposal(proposal([0x99; 20], 100)).await;
        chain.add_deposit_sweep_proposal(proposal(WALLET, 900)).await;
        chain.add_deposit_sweep_proposal(proposal(closed_wallet, 950)).await;
        chain.add_deposit_sweep_proposal(proposal(WALLET, 990)).await;

        let unproven = sweep(&[(legacy, 1), (legacy, 0), (witness, 0)], 1);
        let not_a_sweep = sweep(&[(legacy, 0)], 2);
        let older_sweep = sweep(&[(witness, 0)], 1);
        chain
            .set_transactions_for_public_key_hash(
                WALLET,
                vec![older_sweep, not_a_sweep, unproven.clone()],
            )
            .await;
        chain
            .set_transactions_for_public_key_hash(closed_wallet, vec![unproven.clone()])
            .await;

        let transactions = get_unproven_deposit_sweep_transactions(500, 2, &chain, &chain)
            .await
            .unwrap();
        assert_eq!(transactions, vec![unproven]);
    }

    #[tokio::test]
    async fn test_get_unproven_deposit_sweep_transactions_unknown_wallet() {
        let chain = LocalChain::new();
        chain.set_current_block(50).await;
        chain.add_deposit_sweep_proposal(proposal(WALLET, 10)).await;

        let result = get_unproven_deposit_sweep_transactions(1_000, 5, &chain, &chain).await;
        assert!(matches!(
            result,
            Err(DepositSweepError::Chain(ChainError::NotFound(_)))
        ));
    }
}
