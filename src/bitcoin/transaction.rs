//! Bitcoin Transactions
//!
//! Data model and bit-exact (de)serialization in the legacy (standard) and
//! BIP-144 witness formats.

use serde::{Deserialize, Serialize};

use super::codec::{write_var_bytes, DecodeError, Reader};
use super::compact_size::CompactSizeUint;
use super::hash::Hash;

/// Default input sequence (final)
pub const DEFAULT_SEQUENCE: u32 = 0xffff_ffff;

const WITNESS_MARKER: u8 = 0x00;
const WITNESS_FLAG: u8 = 0x01;

/// Transaction serialization format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationFormat {
    /// Legacy layout, witness data omitted
    Standard,
    /// BIP-144 layout with marker, flag and witness stacks
    #[default]
    Witness,
}

/// Reference to an output of a previous transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionOutpoint {
    pub transaction_hash: Hash,
    pub output_index: u32,
}

impl TransactionOutpoint {
    pub fn new(transaction_hash: Hash, output_index: u32) -> Self {
        Self {
            transaction_hash,
            output_index,
        }
    }

    fn serialize_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.transaction_hash.as_bytes());
        out.extend_from_slice(&self.output_index.to_le_bytes());
    }

    /// 36-byte wire form
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(36);
        self.serialize_to(&mut out);
        out
    }
}

/// Unlocking data of an input.
///
/// Scripts and witness items are stored without length prefixes. An input
/// with an empty witness stack is serialized exactly like one with an empty
/// signature script, so unsigned inputs should use `Legacy(vec![])`.
///
/// `Nested` covers P2SH-wrapped segwit spends (P2SH-P2WPKH, P2SH-P2WSH),
/// whose signature script pushes the witness program and whose signatures
/// live in the witness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputUnlock {
    /// `signatureScript` of a legacy input
    Legacy(Vec<u8>),
    /// Witness stack items of a segwit input
    Witness(Vec<Vec<u8>>),
    /// Signature script and witness stack of a P2SH-wrapped segwit input
    Nested {
        script: Vec<u8>,
        witness: Vec<Vec<u8>>,
    },
}

impl Default for InputUnlock {
    fn default() -> Self {
        InputUnlock::Legacy(Vec::new())
    }
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub outpoint: TransactionOutpoint,
    pub unlock: InputUnlock,
    pub sequence: u32,
}

impl TransactionInput {
    /// Unsigned input with the default sequence
    pub fn new(outpoint: TransactionOutpoint) -> Self {
        Self {
            outpoint,
            unlock: InputUnlock::default(),
            sequence: DEFAULT_SEQUENCE,
        }
    }

    /// Legacy signature script, empty for witness inputs
    pub fn signature_script(&self) -> &[u8] {
        match &self.unlock {
            InputUnlock::Legacy(script) | InputUnlock::Nested { script, .. } => script,
            InputUnlock::Witness(_) => &[],
        }
    }

    /// Witness stack, empty for legacy inputs
    pub fn witness(&self) -> &[Vec<u8>] {
        match &self.unlock {
            InputUnlock::Legacy(_) => &[],
            InputUnlock::Witness(witness) | InputUnlock::Nested { witness, .. } => witness,
        }
    }

    pub fn has_witness(&self) -> bool {
        !self.witness().is_empty()
    }

    fn serialize_to(&self, out: &mut Vec<u8>) {
        self.outpoint.serialize_to(out);
        write_var_bytes(out, self.signature_script());
        out.extend_from_slice(&self.sequence.to_le_bytes());
    }

    fn serialize_witness_to(&self, out: &mut Vec<u8>) {
        let witness = self.witness();
        CompactSizeUint::from(witness.len()).encode_to(out);
        for item in witness {
            write_var_bytes(out, item);
        }
    }
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    /// Value in satoshis
    pub value: i64,
    #[serde(with = "hex_bytes")]
    pub public_key_script: Vec<u8>,
}

impl TransactionOutput {
    pub fn new(value: i64, public_key_script: Vec<u8>) -> Self {
        Self {
            value,
            public_key_script,
        }
    }

    pub(crate) fn serialize_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.value.to_le_bytes());
        write_var_bytes(out, &self.public_key_script);
    }
}

/// Output that can be spent, as tracked by wallets and the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentTransactionOutput {
    pub outpoint: TransactionOutpoint,
    pub value: i64,
}

impl UnspentTransactionOutput {
    /// Placeholder used when a wallet has no main UTXO yet
    pub fn zero() -> Self {
        Self {
            outpoint: TransactionOutpoint::new(Hash::zero(), 0),
            value: 0,
        }
    }
}

/// Bitcoin transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub locktime: u32,
}

impl Transaction {
    /// True if at least one input carries witness data
    pub fn is_witness(&self) -> bool {
        self.inputs.iter().any(TransactionInput::has_witness)
    }

    /// Serialize in the requested format.
    ///
    /// The witness format falls back to the standard layout when no input
    /// carries witness data.
    pub fn serialize(&self, format: SerializationFormat) -> Vec<u8> {
        let witness = format == SerializationFormat::Witness && self.is_witness();

        let mut out = Vec::new();
        out.extend_from_slice(&self.serialize_version());
        if witness {
            out.push(WITNESS_MARKER);
            out.push(WITNESS_FLAG);
        }
        out.extend_from_slice(&self.serialize_inputs());
        out.extend_from_slice(&self.serialize_outputs());
        if witness {
            for input in &self.inputs {
                input.serialize_witness_to(&mut out);
            }
        }
        out.extend_from_slice(&self.serialize_locktime());
        out
    }

    /// Version field as it appears in the standard serialization
    pub fn serialize_version(&self) -> [u8; 4] {
        self.version.to_le_bytes()
    }

    /// Input count and inputs as they appear in the standard serialization
    pub fn serialize_inputs(&self) -> Vec<u8> {
        let mut out = CompactSizeUint::from(self.inputs.len()).encode();
        for input in &self.inputs {
            input.serialize_to(&mut out);
        }
        out
    }

    /// Output count and outputs as they appear in the standard serialization
    pub fn serialize_outputs(&self) -> Vec<u8> {
        let mut out = CompactSizeUint::from(self.outputs.len()).encode();
        for output in &self.outputs {
            output.serialize_to(&mut out);
        }
        out
    }

    /// Locktime field as it appears in the standard serialization
    pub fn serialize_locktime(&self) -> [u8; 4] {
        self.locktime.to_le_bytes()
    }

    /// Transaction ID: double SHA-256 of the standard serialization
    pub fn hash(&self) -> Hash {
        Hash::compute(&self.serialize(SerializationFormat::Standard))
    }

    /// Witness transaction ID: double SHA-256 of the witness serialization
    pub fn witness_hash(&self) -> Hash {
        Hash::compute(&self.serialize(SerializationFormat::Witness))
    }

    /// Parse a transaction in either format, rejecting trailing bytes
    pub fn deserialize(data: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(data);
        let version = reader.read_i32_le()?;

        let witness = reader.peek_u8() == Some(WITNESS_MARKER);
        if witness {
            reader.read_u8()?;
            let flag = reader.read_u8()?;
            if flag != WITNESS_FLAG {
                return Err(DecodeError::InvalidWitnessFlag(flag));
            }
        }

        let input_count = reader.read_length()?;
        let mut raw_inputs = Vec::new();
        for _ in 0..input_count {
            let transaction_hash = reader.read_hash()?;
            let output_index = reader.read_u32_le()?;
            let script = reader.read_var_bytes()?;
            let sequence = reader.read_u32_le()?;
            raw_inputs.push((
                TransactionOutpoint::new(transaction_hash, output_index),
                script,
                sequence,
            ));
        }

        let output_count = reader.read_length()?;
        let mut outputs = Vec::new();
        for _ in 0..output_count {
            let value = reader.read_i64_le()?;
            let public_key_script = reader.read_var_bytes()?;
            outputs.push(TransactionOutput::new(value, public_key_script));
        }

        let mut inputs = Vec::with_capacity(raw_inputs.len());
        for (outpoint, script, sequence) in raw_inputs {
            let mut stack = Vec::new();
            if witness {
                let item_count = reader.read_length()?;
                for _ in 0..item_count {
                    stack.push(reader.read_var_bytes()?);
                }
            }

            let unlock = if stack.is_empty() {
                InputUnlock::Legacy(script)
            } else if script.is_empty() {
                InputUnlock::Witness(stack)
            } else {
                InputUnlock::Nested {
                    script,
                    witness: stack,
                }
            };

            inputs.push(TransactionInput {
                outpoint,
                unlock,
                sequence,
            });
        }

        let locktime = reader.read_u32_le()?;
        reader.finish()?;

        Ok(Self {
            version,
            inputs,
            outputs,
            locktime,
        })
    }

    /// Parse a hex-encoded transaction
    pub fn from_hex(s: &str) -> Result<Self, DecodeError> {
        let bytes = hex::decode(s.trim()).map_err(|e| DecodeError::InvalidHex(e.to_string()))?;
        Self::deserialize(&bytes)
    }

    /// Hex of the witness serialization
    pub fn to_hex(&self) -> String {
        hex::encode(self.serialize(SerializationFormat::Witness))
    }
}

/// Hex (de)serialization of byte vectors for JSON output
pub(crate) mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(de::Error::custom)
    }
}
