//! Bitcoin Primitives
//!
//! Hashes, CompactSize integers, transactions, block headers and scripts,
//! serialized bit-exact to the Bitcoin wire format.

pub mod block;
pub mod codec;
pub mod compact_size;
pub mod hash;
pub mod script;
pub mod transaction;

pub use block::{compact_to_target, BlockHeader, BLOCK_HEADER_BYTE_LENGTH};
pub use codec::DecodeError;
pub use compact_size::{read_compact_size, CompactSizeError, CompactSizeUint};
pub use hash::{double_sha256, hash160, sha256, ByteOrder, Hash, HashError};
pub use script::{ScriptError, ScriptType};
pub use transaction::{
    InputUnlock, SerializationFormat, Transaction, TransactionInput, TransactionOutpoint,
    TransactionOutput, UnspentTransactionOutput, DEFAULT_SEQUENCE,
};
