//! Bitcoin Block Headers
//!
//! Fixed 80-byte header layout: version, previous block hash, merkle root,
//! time, bits and nonce. Integers are little-endian and hashes are in
//! internal byte order.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use super::codec::{DecodeError, Reader};
use super::hash::Hash;

/// Serialized header length
pub const BLOCK_HEADER_BYTE_LENGTH: usize = 80;

/// Compact form of the difficulty 1 target
pub const MAX_TARGET_BITS: u32 = 0x1d00_ffff;

/// Bitcoin block header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub previous_block_header_hash: Hash,
    pub merkle_root_hash: Hash,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Serialize to the raw 80-byte format
    pub fn serialize(&self) -> [u8; BLOCK_HEADER_BYTE_LENGTH] {
        let mut raw = [0u8; BLOCK_HEADER_BYTE_LENGTH];

        raw[0..4].copy_from_slice(&self.version.to_le_bytes());
        raw[4..36].copy_from_slice(self.previous_block_header_hash.as_bytes());
        raw[36..68].copy_from_slice(self.merkle_root_hash.as_bytes());
        raw[68..72].copy_from_slice(&self.time.to_le_bytes());
        raw[72..76].copy_from_slice(&self.bits.to_le_bytes());
        raw[76..80].copy_from_slice(&self.nonce.to_le_bytes());

        raw
    }

    /// Parse exactly 80 bytes
    pub fn deserialize(raw: &[u8]) -> Result<Self, DecodeError> {
        if raw.len() != BLOCK_HEADER_BYTE_LENGTH {
            return Err(DecodeError::InvalidLength {
                expected: BLOCK_HEADER_BYTE_LENGTH,
                got: raw.len(),
            });
        }

        let mut reader = Reader::new(raw);
        let header = Self {
            version: reader.read_i32_le()?,
            previous_block_header_hash: reader.read_hash()?,
            merkle_root_hash: reader.read_hash()?,
            time: reader.read_u32_le()?,
            bits: reader.read_u32_le()?,
            nonce: reader.read_u32_le()?,
        };
        reader.finish()?;

        Ok(header)
    }

    /// Parse a hex-encoded header
    pub fn from_hex(s: &str) -> Result<Self, DecodeError> {
        let raw = hex::decode(s.trim()).map_err(|e| DecodeError::InvalidHex(e.to_string()))?;
        Self::deserialize(&raw)
    }

    /// Block hash (double SHA-256 of the serialized header)
    pub fn hash(&self) -> Hash {
        Hash::compute(&self.serialize())
    }

    /// Target threshold encoded by `bits`
    pub fn target(&self) -> U256 {
        compact_to_target(self.bits)
    }

    /// Difficulty of this header relative to the difficulty 1 target.
    ///
    /// Headers with a zero target report zero difficulty.
    pub fn difficulty(&self) -> U256 {
        let target = self.target();
        if target.is_zero() {
            return U256::zero();
        }
        compact_to_target(MAX_TARGET_BITS) / target
    }
}

/// Expand the compact `bits` representation into a 256-bit target.
///
/// Negative targets expand to zero; targets that do not fit in 256 bits
/// saturate to `U256::MAX`.
pub fn compact_to_target(bits: u32) -> U256 {
    let exponent = bits >> 24;
    let mantissa = bits & 0x007f_ffff;

    if mantissa == 0 || bits & 0x0080_0000 != 0 {
        return U256::zero();
    }

    if exponent <= 3 {
        return U256::from(mantissa >> (8 * (3 - exponent)));
    }

    let shift = 8 * (exponent - 3);
    let mantissa_bits = 32 - mantissa.leading_zeros();
    if shift + mantissa_bits > 256 {
        return U256::MAX;
    }

    U256::from(mantissa) << shift
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcoin::hash::ByteOrder;

    const HEADER_HEX: &str = "04000020a5a3501e6ba1f3e2a1ee5d29327a549524ed33f272dfef300045660000000000e27d241ca36de831ab17e6729056c14a383e7a3f43d56254f846b49649775112939edd612ac0001abbaa602e";

    fn known_header() -> BlockHeader {
        BlockHeader {
            version: 536870916,
            previous_block_header_hash: Hash::from_hex(
                "000000000066450030efdf72f233ed2495547a32295deea1e2f3a16b1e50a3a5",
                ByteOrder::Reversed,
            )
            .unwrap(),
            merkle_root_hash: Hash::from_hex(
                "1251774996b446f85462d5433f7a3e384ac1569072e617ab31e86da31c247de2",
                ByteOrder::Reversed,
            )
            .unwrap(),
            time: 1641914003,
            bits: 436256810,
            nonce: 778087099,
        }
    }

    #[test]
    fn test_serialize_known_header() {
        let header = known_header();
        assert_eq!(hex::encode(header.serialize()), HEADER_HEX);
        assert_eq!(BlockHeader::from_hex(HEADER_HEX).unwrap(), header);
    }

    #[test]
    fn test_header_hash() {
        assert_eq!(
            known_header().hash().to_hex(ByteOrder::Reversed),
            "000000000000002af10911b8db32ed34dc6ea6515f84af5f7b82973c9a839e6d"
        );
    }

    #[test]
    fn test_deserialize_wrong_length() {
        let raw = hex::decode(HEADER_HEX).unwrap();
        assert_eq!(
            BlockHeader::deserialize(&raw[..79]),
            Err(DecodeError::InvalidLength {
                expected: 80,
                got: 79
            })
        );
    }

    #[test]
    fn test_target_and_difficulty() {
        let header = known_header();
        assert_eq!(header.target(), U256::from(0xc02a) << 184);
        assert_eq!(header.difficulty(), U256::from(22350181u64));

        let mainnet = BlockHeader {
            bits: 0x171b_c330,
            ..known_header()
        };
        assert_eq!(mainnet.difficulty(), U256::from(10138538560619u64));

        let genesis = BlockHeader {
            bits: MAX_TARGET_BITS,
            ..known_header()
        };
        assert_eq!(genesis.difficulty(), U256::one());
    }

    #[test]
    fn test_compact_edge_cases() {
        assert_eq!(compact_to_target(0x0300_0001), U256::from(1));
        assert_eq!(compact_to_target(0x0212_3456), U256::from(0x1234));
        assert_eq!(compact_to_target(0x0480_0001), U256::zero());
        assert_eq!(compact_to_target(0xff12_3456), U256::MAX);
        assert!(BlockHeader { bits: 0, ..known_header() }.difficulty().is_zero());
    }
}
