//! Transaction Builder
//!
//! Assembles unsigned transactions from UTXOs, computes the signature hash
//! of every input (legacy or BIP-143 depending on the locking script) and
//! splices externally produced signatures back in.
//!
//! Signing itself happens elsewhere (threshold signers, HSMs), so the builder
//! only deals with digests and `(r, s, public key)` triples.

use primitive_types::U256;
use secp256k1::{ecdsa::Signature, PublicKey};
use thiserror::Error;

use crate::bitcoin::codec::write_var_bytes;
use crate::bitcoin::hash::{double_sha256, hash160, sha256};
use crate::bitcoin::script::{
    extract_public_key_hash, extract_script_hash, pay_to_public_key_hash, push_data, ScriptType,
};
use crate::bitcoin::{
    InputUnlock, SerializationFormat, Transaction, TransactionInput, TransactionOutput,
    UnspentTransactionOutput,
};

/// Transaction version used for every built transaction
pub const TRANSACTION_VERSION: i32 = 1;

/// SIGHASH_ALL, the only sighash type the bridge signs with
pub const SIGHASH_ALL: u32 = 1;

/// Transaction builder errors
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("UTXO pointed by the input is not P2PKH/P2WPKH")]
    NotPublicKeyHashScript,

    #[error("UTXO pointed by the input is not P2SH/P2WSH")]
    NotScriptHashScript,

    #[error("redeem script does not match the locking script hash")]
    RedeemScriptMismatch,

    #[error("wrong signatures count: expected {expected}, got {got}")]
    WrongSignaturesCount { expected: usize, got: usize },

    #[error("invalid signature for input [{index}]: {reason}")]
    InvalidSignature { index: usize, reason: String },
}

/// Signature data for one input, as returned by a signer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureContainer {
    pub r: U256,
    pub s: U256,
    pub public_key: PublicKey,
}

/// How the unlocking data of an input is assembled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnlockKind {
    /// Signature and public key only
    PublicKeyHash,
    /// Signature, public key and the redeem script
    ScriptHash,
}

/// Arguments needed to compute the sighash of one input
#[derive(Debug, Clone, PartialEq, Eq)]
struct SigHashArgs {
    /// Value of the spent UTXO
    value: i64,
    /// Script actually executed when spending the UTXO
    script_code: Vec<u8>,
    /// Whether the UTXO is locked with a witness program
    is_witness: bool,
    kind: UnlockKind,
}

/// Builder of bridge transactions
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    inputs: Vec<(TransactionInput, SigHashArgs)>,
    outputs: Vec<TransactionOutput>,
    locktime: u32,
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionBuilder {
    /// Empty builder: version 1, locktime 0
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            locktime: 0,
        }
    }

    /// Add an unsigned input spending `utxo`.
    ///
    /// `script_code` is the script executed when spending: the P2PKH script
    /// for P2PKH/P2WPKH UTXOs, the plain-text redeem script for P2SH/P2WSH
    /// UTXOs. A P2PKH `script_code` is unlocked with signature and public key
    /// only; any other script is also placed in the unlocking data.
    pub fn add_input(&mut self, utxo: &UnspentTransactionOutput, script_code: Vec<u8>, is_witness: bool) {
        let kind = if ScriptType::classify(&script_code) == ScriptType::P2PKH {
            UnlockKind::PublicKeyHash
        } else {
            UnlockKind::ScriptHash
        };

        self.push_input(utxo, script_code, is_witness, kind);
    }

    /// Add an input spending a UTXO locked with a P2PKH or P2WPKH script
    pub fn add_public_key_hash_input(
        &mut self,
        utxo: &UnspentTransactionOutput,
        locking_script: &[u8],
    ) -> Result<(), BuilderError> {
        let script_type = ScriptType::classify(locking_script);
        let public_key_hash =
            extract_public_key_hash(locking_script).ok_or(BuilderError::NotPublicKeyHashScript)?;

        // BIP-143 uses the P2PKH script as the scriptCode of P2WPKH inputs.
        self.push_input(
            utxo,
            pay_to_public_key_hash(&public_key_hash),
            script_type.is_witness(),
            UnlockKind::PublicKeyHash,
        );

        Ok(())
    }

    /// Add an input spending a UTXO locked with a P2SH or P2WSH script
    pub fn add_script_hash_input(
        &mut self,
        utxo: &UnspentTransactionOutput,
        locking_script: &[u8],
        redeem_script: Vec<u8>,
    ) -> Result<(), BuilderError> {
        let script_type = ScriptType::classify(locking_script);
        let committed = extract_script_hash(locking_script).ok_or(BuilderError::NotScriptHashScript)?;

        let matches = match script_type {
            ScriptType::P2WSH => committed == &sha256(&redeem_script)[..],
            _ => committed == &hash160(&redeem_script)[..],
        };
        if !matches {
            return Err(BuilderError::RedeemScriptMismatch);
        }

        self.push_input(utxo, redeem_script, script_type.is_witness(), UnlockKind::ScriptHash);

        Ok(())
    }

    fn push_input(
        &mut self,
        utxo: &UnspentTransactionOutput,
        script_code: Vec<u8>,
        is_witness: bool,
        kind: UnlockKind,
    ) {
        let args = SigHashArgs {
            value: utxo.value,
            script_code,
            is_witness,
            kind,
        };
        self.inputs.push((TransactionInput::new(utxo.outpoint), args));
    }

    /// Append an output
    pub fn add_output(&mut self, output: TransactionOutput) {
        self.outputs.push(output);
    }

    /// Number of inputs added so far
    pub fn inputs_count(&self) -> usize {
        self.inputs.len()
    }

    /// Sum of the values of all spent UTXOs
    pub fn total_inputs_value(&self) -> i64 {
        self.inputs.iter().map(|(_, args)| args.value).sum()
    }

    /// Current state as a transaction with empty unlocking data
    pub fn unsigned_transaction(&self) -> Transaction {
        Transaction {
            version: TRANSACTION_VERSION,
            inputs: self.inputs.iter().map(|(input, _)| input.clone()).collect(),
            outputs: self.outputs.clone(),
            locktime: self.locktime,
        }
    }

    /// Compute the SIGHASH_ALL digest of every input, in input order.
    ///
    /// Digests are interpreted as big-endian integers.
    pub fn compute_signature_hashes(&self) -> Vec<U256> {
        let unsigned = self.unsigned_transaction();
        let fragments = WitnessFragments::new(&unsigned);

        self.inputs
            .iter()
            .enumerate()
            .map(|(index, (_, args))| {
                let digest = if args.is_witness {
                    witness_signature_hash(&unsigned, &fragments, index, args)
                } else {
                    legacy_signature_hash(&unsigned, index, &args.script_code)
                };
                U256::from_big_endian(&digest)
            })
            .collect()
    }

    /// Apply one signature per input and return the signed transaction
    pub fn add_signatures(&self, signatures: &[SignatureContainer]) -> Result<Transaction, BuilderError> {
        if signatures.len() != self.inputs.len() {
            return Err(BuilderError::WrongSignaturesCount {
                expected: self.inputs.len(),
                got: signatures.len(),
            });
        }

        let mut transaction = self.unsigned_transaction();

        for (index, ((_, args), signature)) in self.inputs.iter().zip(signatures).enumerate() {
            let signature_bytes = encode_signature(signature)
                .map_err(|reason| BuilderError::InvalidSignature { index, reason })?;
            let public_key_bytes = signature.public_key.serialize().to_vec();

            let unlock = if args.is_witness {
                let mut witness = vec![signature_bytes, public_key_bytes];
                if args.kind == UnlockKind::ScriptHash {
                    witness.push(args.script_code.clone());
                }
                InputUnlock::Witness(witness)
            } else {
                let mut script = Vec::new();
                push_data(&mut script, &signature_bytes);
                push_data(&mut script, &public_key_bytes);
                if args.kind == UnlockKind::ScriptHash {
                    push_data(&mut script, &args.script_code);
                }
                InputUnlock::Legacy(script)
            };

            transaction.inputs[index].unlock = unlock;
        }

        Ok(transaction)
    }
}

/// DER-encoded low-S signature followed by the sighash type byte
fn encode_signature(signature: &SignatureContainer) -> Result<Vec<u8>, String> {
    let mut compact = [0u8; 64];
    signature.r.to_big_endian(&mut compact[..32]);
    signature.s.to_big_endian(&mut compact[32..]);

    let mut ecdsa = Signature::from_compact(&compact).map_err(|e| e.to_string())?;
    ecdsa.normalize_s();

    let mut bytes = ecdsa.serialize_der().to_vec();
    bytes.push(SIGHASH_ALL as u8);
    Ok(bytes)
}

/// BIP-143 digests shared by all witness inputs of a transaction
struct WitnessFragments {
    hash_prevouts: [u8; 32],
    hash_sequence: [u8; 32],
    hash_outputs: [u8; 32],
}

impl WitnessFragments {
    fn new(transaction: &Transaction) -> Self {
        let mut prevouts = Vec::with_capacity(36 * transaction.inputs.len());
        let mut sequences = Vec::with_capacity(4 * transaction.inputs.len());
        for input in &transaction.inputs {
            prevouts.extend_from_slice(&input.outpoint.serialize());
            sequences.extend_from_slice(&input.sequence.to_le_bytes());
        }

        let mut outputs = Vec::new();
        for output in &transaction.outputs {
            output.serialize_to(&mut outputs);
        }

        Self {
            hash_prevouts: double_sha256(&prevouts),
            hash_sequence: double_sha256(&sequences),
            hash_outputs: double_sha256(&outputs),
        }
    }
}

/// BIP-143 SIGHASH_ALL digest
fn witness_signature_hash(
    transaction: &Transaction,
    fragments: &WitnessFragments,
    index: usize,
    args: &SigHashArgs,
) -> [u8; 32] {
    let input = &transaction.inputs[index];

    let mut preimage = Vec::with_capacity(160 + args.script_code.len());
    preimage.extend_from_slice(&transaction.serialize_version());
    preimage.extend_from_slice(&fragments.hash_prevouts);
    preimage.extend_from_slice(&fragments.hash_sequence);
    preimage.extend_from_slice(&input.outpoint.serialize());
    write_var_bytes(&mut preimage, &args.script_code);
    preimage.extend_from_slice(&args.value.to_le_bytes());
    preimage.extend_from_slice(&input.sequence.to_le_bytes());
    preimage.extend_from_slice(&fragments.hash_outputs);
    preimage.extend_from_slice(&transaction.serialize_locktime());
    preimage.extend_from_slice(&SIGHASH_ALL.to_le_bytes());

    double_sha256(&preimage)
}

/// Pre-segwit SIGHASH_ALL digest: every other input's script is blanked and
/// the signed input carries the script code.
fn legacy_signature_hash(transaction: &Transaction, index: usize, script_code: &[u8]) -> [u8; 32] {
    let mut copy = transaction.clone();
    for (i, input) in copy.inputs.iter_mut().enumerate() {
        input.unlock = if i == index {
            InputUnlock::Legacy(script_code.to_vec())
        } else {
            InputUnlock::Legacy(Vec::new())
        };
    }

    let mut preimage = copy.serialize(SerializationFormat::Standard);
    preimage.extend_from_slice(&SIGHASH_ALL.to_le_bytes());

    double_sha256(&preimage)
}
