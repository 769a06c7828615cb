//! Wire Decoding Helpers
//!
//! Cursor over a byte slice with little-endian primitives and CompactSize
//! prefixed fields. Every read either consumes exactly what it returns or
//! fails without side effects on the caller's data.

use thiserror::Error;

use super::compact_size::{read_compact_size, CompactSizeError};
use super::hash::{ByteOrder, Hash, HASH_BYTE_LENGTH};

/// Wire decoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of data: need {needed} bytes, {available} left")]
    UnexpectedEnd { needed: usize, available: usize },

    #[error("invalid compact size: {0}")]
    CompactSize(#[from] CompactSizeError),

    #[error("invalid witness flag: {0:#04x}")]
    InvalidWitnessFlag(u8),

    #[error("{0} trailing bytes after transaction")]
    TrailingBytes(usize),

    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

/// Forward-only reader over wire bytes
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not consumed yet
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Next byte without consuming it
    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEnd {
                needed: len,
                available: self.remaining(),
            });
        }

        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32_le(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64_le(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    /// Hash stored in internal byte order
    pub fn read_hash(&mut self) -> Result<Hash, DecodeError> {
        let bytes = self.read_bytes(HASH_BYTE_LENGTH)?;
        Hash::from_bytes(bytes, ByteOrder::Internal).map_err(|_| DecodeError::InvalidLength {
            expected: HASH_BYTE_LENGTH,
            got: bytes.len(),
        })
    }

    pub fn read_compact_size(&mut self) -> Result<u64, DecodeError> {
        let (value, consumed) = read_compact_size(&self.data[self.pos..])?;
        self.pos += consumed;
        Ok(value)
    }

    /// CompactSize length prefix followed by that many bytes
    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_length()?;
        Ok(self.read_bytes(len)?.to_vec())
    }

    /// CompactSize value used as an element count or byte length.
    ///
    /// Counts larger than the remaining data can never be satisfied, so they
    /// are rejected before anything is allocated.
    pub fn read_length(&mut self) -> Result<usize, DecodeError> {
        let value = self.read_compact_size()?;
        let available = self.remaining();
        if value > available as u64 {
            return Err(DecodeError::UnexpectedEnd {
                needed: usize::try_from(value).unwrap_or(usize::MAX),
                available,
            });
        }
        Ok(value as usize)
    }

    /// Fail unless every byte was consumed
    pub fn finish(self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}

/// Append a CompactSize length prefix and the bytes
pub fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    super::compact_size::CompactSizeUint::from(bytes.len()).encode_to(out);
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_primitives() {
        let data = hex::decode("0100000002fdffffffaabbcc").unwrap();
        let mut reader = Reader::new(&data);

        assert_eq!(reader.read_i32_le().unwrap(), 1);
        assert_eq!(reader.read_u8().unwrap(), 2);
        assert_eq!(reader.read_u32_le().unwrap(), 0xffff_fffd);
        assert_eq!(reader.read_bytes(3).unwrap(), &[0xaa, 0xbb, 0xcc]);
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn test_var_bytes_longer_than_data() {
        let mut reader = Reader::new(&[0x05, 0x01, 0x02]);
        assert!(matches!(
            reader.read_var_bytes(),
            Err(DecodeError::UnexpectedEnd { needed: 5, available: 2 })
        ));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut reader = Reader::new(&[0x00, 0x01]);
        reader.read_u8().unwrap();
        assert_eq!(reader.finish(), Err(DecodeError::TrailingBytes(1)));
    }

    #[test]
    fn test_write_var_bytes() {
        let mut out = Vec::new();
        write_var_bytes(&mut out, &[0xab; 3]);
        assert_eq!(hex::encode(out), "03ababab");
    }
}
