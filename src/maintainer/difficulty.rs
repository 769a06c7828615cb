//! Bitcoin Difficulty Maintainer
//!
//! Background task keeping the on-chain difficulty relay in sync with
//! Bitcoin's retarget epochs. For every new epoch it submits the headers
//! around the retarget boundary, then waits for the relay to acknowledge it.
//!
//! ```text
//! eligibility check -> prove next epoch -+-> proven: prove next epoch
//!                                        +-> nothing to prove: idle backoff
//! any error -> restart backoff -> eligibility check
//! ```

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::bitcoin::BlockHeader;
use crate::chain::{BitcoinChain, ChainError, DifficultyChain};
use crate::logging::{log_maintainer_lifecycle_event, log_retarget_event};
use crate::spv::DIFFICULTY_EPOCH_LENGTH;

use super::shutdown::ShutdownSignal;

/// Back-off after a failed `prove_epochs` run
pub const DEFAULT_RESTART_BACKOFF: Duration = Duration::from_secs(120);

/// Back-off when the relay is up to date or the new epoch is still too short
pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_secs(60);

/// Poll interval while waiting for the relay to report a proven epoch
pub const DEFAULT_EPOCH_UPDATE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Maintainer errors
#[derive(Debug, Error)]
pub enum MaintainerError {
    #[error("genesis has not been performed in the Bitcoin difficulty chain")]
    NoGenesis,

    #[error("bitcoin difficulty maintainer has not been authorized to submit block headers")]
    NotAuthorized,

    #[error("difficulty relay reports a zero proof length")]
    ZeroProofLength,

    #[error("header window after epoch {epoch} with proof length {proof_length} exceeds the block height range")]
    EpochOverflow { epoch: u64, proof_length: u64 },

    #[error("failed to get block header at height {height}: {source}")]
    MissingHeader {
        height: u64,
        #[source]
        source: ChainError,
    },

    #[error("{context}: {source}")]
    Chain {
        context: String,
        #[source]
        source: ChainError,
    },

    #[error("bitcoin difficulty maintainer cancelled")]
    Cancelled,
}

fn chain_error(context: impl Into<String>) -> impl FnOnce(ChainError) -> MaintainerError {
    let context = context.into();
    move |source| MaintainerError::Chain { context, source }
}

/// Difficulty maintainer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DifficultyConfig {
    /// Submit through `retarget` instead of the refunding proxy
    pub disable_proxy: bool,
    pub idle_backoff: Duration,
    pub restart_backoff: Duration,
    pub epoch_update_poll_interval: Duration,
}

impl Default for DifficultyConfig {
    fn default() -> Self {
        Self {
            disable_proxy: false,
            idle_backoff: DEFAULT_IDLE_BACKOFF,
            restart_backoff: DEFAULT_RESTART_BACKOFF,
            epoch_update_poll_interval: DEFAULT_EPOCH_UPDATE_POLL_INTERVAL,
        }
    }
}

/// Keeps the difficulty relay's proven epoch up with the Bitcoin chain
pub struct DifficultyMaintainer {
    btc_chain: Arc<dyn BitcoinChain>,
    chain: Arc<dyn DifficultyChain>,
    config: DifficultyConfig,
}

impl DifficultyMaintainer {
    pub fn new(
        btc_chain: Arc<dyn BitcoinChain>,
        chain: Arc<dyn DifficultyChain>,
        config: DifficultyConfig,
    ) -> Self {
        Self {
            btc_chain,
            chain,
            config,
        }
    }

    pub fn config(&self) -> &DifficultyConfig {
        &self.config
    }

    /// Run the control loop on the tokio runtime
    pub fn spawn(self, shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_control_loop(&shutdown).await })
    }

    /// Prove epochs until shutdown, restarting after a back-off on errors
    pub async fn run_control_loop(&self, shutdown: &ShutdownSignal) {
        tracing::info!(
            target: "btc_bridge::maintainer",
            proxy = !self.config.disable_proxy,
            "starting bitcoin difficulty maintainer"
        );
        log_maintainer_lifecycle_event("difficulty", true);

        loop {
            match self.prove_epochs(shutdown).await {
                Err(MaintainerError::Cancelled) => break,
                Err(e) => {
                    tracing::error!(
                        target: "btc_bridge::maintainer",
                        error = %e,
                        backoff_secs = self.config.restart_backoff.as_secs(),
                        "error while proving bitcoin epochs; restarting maintainer"
                    );
                }
                Ok(()) => {}
            }

            if !shutdown.sleep(self.config.restart_backoff).await {
                break;
            }
        }

        tracing::info!(
            target: "btc_bridge::maintainer",
            "stopping bitcoin difficulty maintainer"
        );
        log_maintainer_lifecycle_event("difficulty", false);
    }

    /// Check eligibility once, then prove epochs until an error or shutdown.
    ///
    /// Sleeps for the idle back-off only when no epoch was proven, as a
    /// proven epoch is likely followed by more.
    pub async fn prove_epochs(&self, shutdown: &ShutdownSignal) -> Result<(), MaintainerError> {
        self.verify_submission_eligibility().await?;

        loop {
            let epoch_proven = self.prove_next_epoch(shutdown).await?;

            if !epoch_proven && !shutdown.sleep(self.config.idle_backoff).await {
                return Err(MaintainerError::Cancelled);
            }

            if shutdown.is_shutdown() {
                return Err(MaintainerError::Cancelled);
            }
        }
    }

    /// Verify the relay has been initialized and accepts our submissions
    pub async fn verify_submission_eligibility(&self) -> Result<(), MaintainerError> {
        let ready = self
            .chain
            .ready()
            .await
            .map_err(chain_error("cannot check whether genesis has been performed"))?;
        if !ready {
            return Err(MaintainerError::NoGenesis);
        }

        let operator = self.chain.operator_address();

        let authorized = if self.config.disable_proxy {
            let required = self.chain.authorization_required().await.map_err(chain_error(
                "cannot check whether authorization is required to submit block headers",
            ))?;
            if !required {
                return Ok(());
            }

            self.chain
                .is_authorized(&operator)
                .await
                .map_err(chain_error("cannot check maintainer authorization"))?
        } else {
            self.chain
                .is_authorized_for_refund(&operator)
                .await
                .map_err(chain_error("cannot check maintainer authorization for refund"))?
        };

        if !authorized {
            return Err(MaintainerError::NotAuthorized);
        }

        Ok(())
    }

    /// Prove the epoch following the relay's current one, if the Bitcoin
    /// chain is long enough.
    ///
    /// The header window spans `proof_length` blocks on each side of the
    /// retarget: for a new epoch starting at 522144 and a proof length of 3
    /// it is `[522141, 522146]`. Returns whether an epoch was proven.
    pub async fn prove_next_epoch(&self, shutdown: &ShutdownSignal) -> Result<bool, MaintainerError> {
        let current_block_height = self
            .btc_chain
            .get_latest_block_height()
            .await
            .map_err(chain_error("failed to get latest block height"))?;

        let current_epoch = self
            .chain
            .current_epoch()
            .await
            .map_err(chain_error("failed to get current epoch"))?;

        let proof_length = self
            .chain
            .proof_length()
            .await
            .map_err(chain_error("failed to get proof length"))?;
        if proof_length == 0 {
            return Err(MaintainerError::ZeroProofLength);
        }

        let overflow = || MaintainerError::EpochOverflow {
            epoch: current_epoch,
            proof_length,
        };
        let new_epoch = current_epoch.checked_add(1).ok_or_else(overflow)?;
        let new_epoch_height = new_epoch
            .checked_mul(DIFFICULTY_EPOCH_LENGTH)
            .ok_or_else(overflow)?;

        let first_header_height = new_epoch_height.saturating_sub(proof_length);
        // proof_length is non-zero, so the subtraction cannot wrap.
        let last_header_height = new_epoch_height
            .checked_add(proof_length)
            .ok_or_else(overflow)?
            - 1;

        if current_block_height < last_header_height {
            if current_block_height >= new_epoch_height {
                tracing::info!(
                    target: "btc_bridge::maintainer",
                    epoch = new_epoch,
                    "waiting for {} new blocks to form a headers chain for retarget",
                    last_header_height - current_block_height
                );
            } else {
                tracing::debug!(
                    target: "btc_bridge::maintainer",
                    epoch = current_epoch,
                    "difficulty relay is up-to-date with the bitcoin chain"
                );
            }
            return Ok(false);
        }

        let headers = self
            .get_block_headers(first_header_height, last_header_height)
            .await?;

        let with_refund = !self.config.disable_proxy;
        let submitted = if with_refund {
            self.chain.retarget_with_refund(&headers).await
        } else {
            self.chain.retarget(&headers).await
        };

        log_retarget_event(
            new_epoch,
            first_header_height,
            last_header_height,
            with_refund,
            submitted.as_ref().err().map(|e| e.to_string()).as_deref(),
        );

        submitted.map_err(chain_error(format!(
            "failed to submit block headers [{}:{}] to the difficulty relay",
            first_header_height, last_header_height
        )))?;

        self.wait_for_current_epoch_update(new_epoch, shutdown)
            .await?;

        tracing::info!(
            target: "btc_bridge::maintainer",
            epoch = new_epoch,
            first_header_height,
            last_header_height,
            "submitted block headers; epoch proven"
        );

        Ok(true)
    }

    /// Fetch the headers in the inclusive range, oldest first
    pub async fn get_block_headers(
        &self,
        first_header_height: u64,
        last_header_height: u64,
    ) -> Result<Vec<BlockHeader>, MaintainerError> {
        let mut headers = Vec::new();

        for height in first_header_height..=last_header_height {
            let header = self
                .btc_chain
                .get_block_header(height)
                .await
                .map_err(|source| MaintainerError::MissingHeader { height, source })?;
            headers.push(header);
        }

        Ok(headers)
    }

    /// Wait until the relay's current epoch reaches `target_epoch`
    pub async fn wait_for_current_epoch_update(
        &self,
        target_epoch: u64,
        shutdown: &ShutdownSignal,
    ) -> Result<(), MaintainerError> {
        loop {
            let current_epoch = self
                .chain
                .current_epoch()
                .await
                .map_err(chain_error("failed to get current epoch"))?;

            if current_epoch >= target_epoch {
                return Ok(());
            }

            tracing::info!(
                target: "btc_bridge::maintainer",
                target_epoch,
                current_epoch,
                "waiting for difficulty relay to reach epoch"
            );

            if !shutdown.sleep(self.config.epoch_update_poll_interval).await {
                return Err(MaintainerError::Cancelled);
            }
        }
    }
}
