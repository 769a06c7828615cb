//! SPV Proofs
//!
//! Assembly of Bitcoin transaction proofs and their submission to the
//! bridge contract.

pub mod deposit_sweep;
pub mod moving_funds;
pub mod proof;
pub mod redemption;
pub mod wallet;

pub use deposit_sweep::{
    get_unproven_deposit_sweep_transactions, is_unproven_deposit_sweep_transaction,
    parse_deposit_sweep_inputs, submit_deposit_sweep_proof, unique_wallet_public_key_hashes,
    DepositSweepError,
};
pub use moving_funds::{parse_moving_funds_input, submit_moving_funds_proof};
pub use proof::{
    assemble_spv_proof, get_proof_info, ProofInfo, SpvError, SpvProof, DIFFICULTY_EPOCH_LENGTH,
};
pub use redemption::{parse_redemption_input, submit_redemption_proof};
pub use wallet::{is_input_current_wallets_main_utxo, WalletTransactionError};
