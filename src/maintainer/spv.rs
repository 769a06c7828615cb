//! SPV Maintainer
//!
//! Background task proving wallet deposit sweeps to the bridge. Each round
//! looks up the wallets with recent sweep proposals, finds their sweeps the
//! bridge has not seen yet and submits a proof for every one the relay can
//! verify.
//!
//! ```text
//! find unproven sweeps -> prove each in relay range -> idle backoff -> find ...
//! any error -> restart backoff -> find unproven sweeps
//! ```

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::bitcoin::Transaction;
use crate::chain::{BitcoinChain, DifficultyChain, SpvChain};
use crate::logging::log_maintainer_lifecycle_event;
use crate::spv::{
    get_proof_info, get_unproven_deposit_sweep_transactions, submit_deposit_sweep_proof,
    DepositSweepError, SpvError,
};

use super::shutdown::ShutdownSignal;

/// Host-chain blocks searched for sweep proposals
pub const DEFAULT_HISTORY_DEPTH: u64 = 43_200;

/// Most recent transactions of a wallet checked each round
pub const DEFAULT_TRANSACTION_LIMIT: usize = 20;

/// Back-off between proving rounds
pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_secs(600);

/// Back-off after a failed round
pub const DEFAULT_RESTART_BACKOFF: Duration = Duration::from_secs(600);

/// SPV maintainer errors
#[derive(Debug, Error)]
pub enum SpvMaintainerError {
    #[error("failed to get unproven deposit sweeps: {0}")]
    DepositSweep(#[from] DepositSweepError),

    #[error("failed to get proof info of transaction {transaction}: {source}")]
    ProofInfo {
        transaction: String,
        #[source]
        source: SpvError,
    },

    #[error("spv maintainer cancelled")]
    Cancelled,
}

/// SPV maintainer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpvConfig {
    pub history_depth: u64,
    pub transaction_limit: usize,
    pub idle_backoff: Duration,
    pub restart_backoff: Duration,
}

impl Default for SpvConfig {
    fn default() -> Self {
        Self {
            history_depth: DEFAULT_HISTORY_DEPTH,
            transaction_limit: DEFAULT_TRANSACTION_LIMIT,
            idle_backoff: DEFAULT_IDLE_BACKOFF,
            restart_backoff: DEFAULT_RESTART_BACKOFF,
        }
    }
}

/// Submits SPV proofs of wallet deposit sweeps to the bridge
pub struct SpvMaintainer {
    btc_chain: Arc<dyn BitcoinChain>,
    spv_chain: Arc<dyn SpvChain>,
    difficulty_chain: Arc<dyn DifficultyChain>,
    config: SpvConfig,
}

impl SpvMaintainer {
    pub fn new(
        btc_chain: Arc<dyn BitcoinChain>,
        spv_chain: Arc<dyn SpvChain>,
        difficulty_chain: Arc<dyn DifficultyChain>,
        config: SpvConfig,
    ) -> Self {
        Self {
            btc_chain,
            spv_chain,
            difficulty_chain,
            config,
        }
    }

    pub fn config(&self) -> &SpvConfig {
        &self.config
    }

    /// Run the control loop on the tokio runtime
    pub fn spawn(self, shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_control_loop(&shutdown).await })
    }

    /// Maintain proofs until shutdown, restarting after a back-off on errors
    pub async fn run_control_loop(&self, shutdown: &ShutdownSignal) {
        tracing::info!(
            target: "btc_bridge::maintainer",
            history_depth = self.config.history_depth,
            transaction_limit = self.config.transaction_limit,
            "starting spv maintainer"
        );
        log_maintainer_lifecycle_event("spv", true);

        loop {
            match self.maintain_spv(shutdown).await {
                Err(SpvMaintainerError::Cancelled) => break,
                Err(e) => {
                    tracing::error!(
                        target: "btc_bridge::maintainer",
                        error = %e,
                        backoff_secs = self.config.restart_backoff.as_secs(),
                        "error while maintaining spv proofs; restarting maintainer"
                    );
                }
                Ok(()) => {}
            }

            if !shutdown.sleep(self.config.restart_backoff).await {
                break;
            }
        }

        tracing::info!(target: "btc_bridge::maintainer", "stopping spv maintainer");
        log_maintainer_lifecycle_event("spv", false);
    }

    /// Prove rounds separated by the idle back-off, until an error or
    /// shutdown
    pub async fn maintain_spv(&self, shutdown: &ShutdownSignal) -> Result<(), SpvMaintainerError> {
        loop {
            let proven = self.prove_deposit_sweep_transactions().await?;

            tracing::debug!(
                target: "btc_bridge::maintainer",
                proven,
                backoff_secs = self.config.idle_backoff.as_secs(),
                "finished proving deposit sweeps"
            );

            if !shutdown.sleep(self.config.idle_backoff).await {
                return Err(SpvMaintainerError::Cancelled);
            }
        }
    }

    /// Submit proofs of the unproven deposit sweeps that have accumulated
    /// enough confirmations. Returns the number of proofs submitted.
    pub async fn prove_deposit_sweep_transactions(&self) -> Result<usize, SpvMaintainerError> {
        let transactions = get_unproven_deposit_sweep_transactions(
            self.config.history_depth,
            self.config.transaction_limit,
            &*self.btc_chain,
            &*self.spv_chain,
        )
        .await?;

        let mut proven = 0;
        for transaction in &transactions {
            if self.prove_transaction(transaction).await? {
                proven += 1;
            }
        }

        Ok(proven)
    }

    /// Submit a deposit sweep proof if the relay can verify it now
    async fn prove_transaction(&self, transaction: &Transaction) -> Result<bool, SpvMaintainerError> {
        let transaction_hash = transaction.hash();

        let info = get_proof_info(
            &transaction_hash,
            &*self.btc_chain,
            &*self.spv_chain,
            &*self.difficulty_chain,
        )
        .await
        .map_err(|source| SpvMaintainerError::ProofInfo {
            transaction: transaction_hash.to_string(),
            source,
        })?;

        if !info.is_within_relay_range {
            tracing::warn!(
                target: "btc_bridge::maintainer",
                transaction = %transaction_hash,
                "deposit sweep proof is outside the difficulty relay range; skipping"
            );
            return Ok(false);
        }

        if info.accumulated_confirmations < info.required_confirmations {
            tracing::info!(
                target: "btc_bridge::maintainer",
                transaction = %transaction_hash,
                accumulated = info.accumulated_confirmations,
                required = info.required_confirmations,
                "deposit sweep does not have enough confirmations yet"
            );
            return Ok(false);
        }

        submit_deposit_sweep_proof(
            &transaction_hash,
            info.required_confirmations,
            &*self.btc_chain,
            &*self.spv_chain,
        )
        .await?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcoin::{
        BlockHeader, Hash, TransactionInput, TransactionOutpoint, TransactionOutput,
    };
    use crate::chain::{
        ChainError, DepositRequest, DepositSweepProposalSubmittedEvent, MockSpvChain,
        TransactionMerkleProof, Wallet, WalletState,
    };
    use crate::local_chain::LocalChain;
    use crate::maintainer::shutdown::shutdown_channel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WALLET: [u8; 20] = [0x8d; 20];
    const SWEEP_HEIGHT: u64 = 2_164_200;

    fn maintainer(chain: &LocalChain) -> SpvMaintainer {
        SpvMaintainer::new(
            Arc::new(chain.clone()),
            Arc::new(chain.clone()),
            Arc::new(chain.clone()),
            SpvConfig::default(),
        )
    }

    /// Chain with one unproven P2WSH deposit sweep of a live wallet, mined
    /// at `SWEEP_HEIGHT` with `confirmations` confirmations
    async fn sweep_chain(confirmations: u64) -> (LocalChain, Hash) {
        let chain = LocalChain::new();

        let mut deposit_script = vec![0x00, 0x20];
        deposit_script.extend_from_slice(&[0xef; 32]);
        let funding = chain
            .add_transaction(Transaction {
                version: 1,
                inputs: vec![],
                outputs: vec![TransactionOutput::new(80_000, deposit_script)],
                locktime: 0,
            })
            .await;
        chain
            .set_deposit_request(
                funding,
                0,
                DepositRequest {
                    depositor: "0x7F62CddE8A86328d63B9517BC70B255017f25EEa".to_string(),
                    amount: 80_000,
                    revealed_at: 1_646_000_000,
                    vault: None,
                    treasury_fee: 40,
                    swept_at: 0,
                },
            )
            .await;

        let mut wallet_script = vec![0x00, 0x14];
        wallet_script.extend_from_slice(&WALLET);
        let sweep = Transaction {
            version: 1,
            inputs: vec![TransactionInput::new(TransactionOutpoint::new(funding, 0))],
            outputs: vec![TransactionOutput::new(79_000, wallet_script)],
            locktime: 0,
        };
        let sweep_hash = chain.add_transaction(sweep.clone()).await;

        chain
            .set_wallet(
                WALLET,
                Wallet {
                    state: WalletState::Live,
                    ..Wallet::default()
                },
            )
            .await;
        chain.set_current_block(20_000).await;
        chain
            .add_deposit_sweep_proposal(DepositSweepProposalSubmittedEvent {
                wallet_public_key_hash: WALLET,
                block_number: 19_990,
            })
            .await;
        chain
            .set_transactions_for_public_key_hash(WALLET, vec![sweep])
            .await;

        let header = BlockHeader {
            version: 4,
            previous_block_header_hash: Hash::compute(b"parent"),
            merkle_root_hash: sweep_hash,
            time: 1_646_051_559,
            bits: 0x1d00_ffff,
            nonce: 3,
        };
        chain.set_block_headers(vec![(SWEEP_HEIGHT, header)]).await;
        chain.set_latest_block_height(SWEEP_HEIGHT).await;
        chain
            .set_transaction_confirmations(sweep_hash, confirmations)
            .await;
        chain
            .set_transaction_merkle_proof(
                sweep_hash,
                TransactionMerkleProof {
                    block_height: SWEEP_HEIGHT,
                    merkle_nodes: vec![],
                    position: 0,
                },
            )
            .await;

        chain.set_tx_proof_difficulty_factor(1).await;
        chain
            .set_current_epoch(SWEEP_HEIGHT / crate::spv::DIFFICULTY_EPOCH_LENGTH)
            .await;

        (chain, sweep_hash)
    }

    #[tokio::test]
    async fn test_prove_deposit_sweep_transactions() {
        let (chain, sweep_hash) = sweep_chain(1).await;
        let maintainer = maintainer(&chain);

        assert_eq!(maintainer.prove_deposit_sweep_transactions().await.unwrap(), 1);

        let submissions = chain.deposit_sweep_submissions().await;
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].transaction.hash(), sweep_hash);
        assert_eq!(submissions[0].proof.bitcoin_headers.len(), 80);

        // The bridge now knows the deposit as swept.
        assert_eq!(maintainer.prove_deposit_sweep_transactions().await.unwrap(), 0);
        assert_eq!(chain.deposit_sweep_submissions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_prove_skips_unconfirmed_sweep() {
        let (chain, _) = sweep_chain(0).await;

        assert_eq!(
            maintainer(&chain)
                .prove_deposit_sweep_transactions()
                .await
                .unwrap(),
            0
        );
        assert!(chain.deposit_sweep_submissions().await.is_empty());
    }

    #[tokio::test]
    async fn test_prove_skips_sweep_outside_relay_range() {
        let (chain, _) = sweep_chain(1).await;
        chain.set_current_epoch(1_000).await;

        assert_eq!(
            maintainer(&chain)
                .prove_deposit_sweep_transactions()
                .await
                .unwrap(),
            0
        );
        assert!(chain.deposit_sweep_submissions().await.is_empty());
    }

    #[tokio::test]
    async fn test_prove_uses_configured_history_depth() {
        let (chain, _) = sweep_chain(1).await;
        let maintainer = SpvMaintainer::new(
            Arc::new(chain.clone()),
            Arc::new(chain.clone()),
            Arc::new(chain.clone()),
            SpvConfig {
                history_depth: 5,
                ..SpvConfig::default()
            },
        );

        // The only proposal is 10 blocks old.
        assert_eq!(maintainer.prove_deposit_sweep_transactions().await.unwrap(), 0);
        assert!(chain.deposit_sweep_submissions().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintain_spv_proves_after_idle_backoff() {
        let (chain, sweep_hash) = sweep_chain(0).await;

        let (trigger, shutdown) = shutdown_channel();
        let task = tokio::spawn({
            let maintainer = maintainer(&chain);
            async move { maintainer.maintain_spv(&shutdown).await }
        });

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(chain.deposit_sweep_submissions().await.is_empty());

        chain.set_transaction_confirmations(sweep_hash, 1).await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(chain.deposit_sweep_submissions().await.len(), 1);

        trigger.shutdown();
        assert!(matches!(
            task.await.unwrap(),
            Err(SpvMaintainerError::Cancelled)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_loop_restarts_after_backoff() {
        let calls = Arc::new(AtomicUsize::new(0));

        let mut spv_chain = MockSpvChain::new();
        spv_chain.expect_current_block().returning({
            let calls = calls.clone();
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ChainError::Transport("connection refused".into()))
            }
        });

        let chain = LocalChain::new();
        let maintainer = SpvMaintainer::new(
            Arc::new(chain.clone()),
            Arc::new(spv_chain),
            Arc::new(chain),
            SpvConfig::default(),
        );

        let (trigger, shutdown) = shutdown_channel();
        let handle = maintainer.spawn(shutdown);

        // Attempts at 0s, 600s and 1200s.
        tokio::time::sleep(Duration::from_secs(1_250)).await;
        trigger.shutdown();
        handle.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_default_config() {
        let config = SpvConfig::default();
        assert_eq!(config.history_depth, 43_200);
        assert_eq!(config.transaction_limit, 20);
        assert_eq!(config.idle_backoff, Duration::from_secs(600));
        assert_eq!(config.restart_backoff, Duration::from_secs(600));
    }
}
