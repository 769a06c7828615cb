//! Bitcoin Hash Type
//!
//! 32-byte double-SHA-256 digests with explicit byte order handling.
//! Internal order is what the protocol hashes and serializes; reversed order
//! is what block explorers and RPC interfaces display.

use std::fmt;

use ripemd::Ripemd160;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of a hash in bytes
pub const HASH_BYTE_LENGTH: usize = 32;

/// Hash construction errors
#[derive(Debug, Error)]
pub enum HashError {
    #[error("wrong hash length: expected {HASH_BYTE_LENGTH} bytes, got {0}")]
    InvalidLength(usize),

    #[error("invalid hash hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Byte order of a hash representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian order used inside the protocol
    Internal,
    /// Big-endian order used by explorers and RPC
    Reversed,
}

/// Double-SHA-256 digest, always stored in internal byte order
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash([u8; HASH_BYTE_LENGTH]);

impl Hash {
    /// The all-zero hash
    pub const fn zero() -> Self {
        Self([0u8; HASH_BYTE_LENGTH])
    }

    /// Hash arbitrary data with double SHA-256
    pub fn compute(data: &[u8]) -> Self {
        Self(double_sha256(data))
    }

    /// Build a hash from bytes given in the specified order
    pub fn from_bytes(bytes: &[u8], order: ByteOrder) -> Result<Self, HashError> {
        let mut internal: [u8; HASH_BYTE_LENGTH] = bytes
            .try_into()
            .map_err(|_| HashError::InvalidLength(bytes.len()))?;

        if order == ByteOrder::Reversed {
            internal.reverse();
        }

        Ok(Self(internal))
    }

    /// Build a hash from a hex string given in the specified order
    pub fn from_hex(s: &str, order: ByteOrder) -> Result<Self, HashError> {
        if s.len() != HASH_BYTE_LENGTH * 2 {
            return Err(HashError::InvalidLength(s.len() / 2));
        }

        Self::from_bytes(&hex::decode(s)?, order)
    }

    /// Internal-order bytes
    pub fn as_bytes(&self) -> &[u8; HASH_BYTE_LENGTH] {
        &self.0
    }

    /// Bytes in the requested order
    pub fn to_bytes(&self, order: ByteOrder) -> [u8; HASH_BYTE_LENGTH] {
        let mut bytes = self.0;
        if order == ByteOrder::Reversed {
            bytes.reverse();
        }
        bytes
    }

    /// Hex string in the requested order
    pub fn to_hex(&self, order: ByteOrder) -> String {
        hex::encode(self.to_bytes(order))
    }
}

impl From<[u8; HASH_BYTE_LENGTH]> for Hash {
    /// Wraps bytes that are already in internal order
    fn from(bytes: [u8; HASH_BYTE_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex(ByteOrder::Reversed))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex(ByteOrder::Reversed))
    }
}

// Serialized the way explorers show hashes.
impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex(ByteOrder::Reversed))
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s, ByteOrder::Reversed).map_err(de::Error::custom)
    }
}

/// Single SHA-256
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Double SHA-256 (Bitcoin's hash function)
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

/// RIPEMD-160 of SHA-256
pub fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}
