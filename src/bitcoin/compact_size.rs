//! CompactSize Unsigned Integers
//!
//! Bitcoin's variable-length integer encoding, used for every count and
//! length prefix in the wire format.

use thiserror::Error;

/// CompactSize decoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompactSizeError {
    #[error("empty input")]
    Empty,

    #[error("truncated compact size: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },
}

/// A CompactSize-encoded unsigned integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CompactSizeUint(pub u64);

impl CompactSizeUint {
    /// Number of bytes the encoded form takes
    pub fn encoded_len(&self) -> usize {
        match self.0 {
            0..=0xfc => 1,
            0xfd..=0xffff => 3,
            0x10000..=0xffff_ffff => 5,
            _ => 9,
        }
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_to(&mut out);
        out
    }

    /// Append the encoded form to a buffer
    pub fn encode_to(&self, out: &mut Vec<u8>) {
        let value = self.0;
        match value {
            0..=0xfc => out.push(value as u8),
            0xfd..=0xffff => {
                out.push(0xfd);
                out.extend_from_slice(&(value as u16).to_le_bytes());
            }
            0x10000..=0xffff_ffff => {
                out.push(0xfe);
                out.extend_from_slice(&(value as u32).to_le_bytes());
            }
            _ => {
                out.push(0xff);
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
    }

    /// Decode from the front of `data`, returning the value and bytes consumed
    pub fn decode(data: &[u8]) -> Result<(Self, usize), CompactSizeError> {
        let (value, consumed) = read_compact_size(data)?;
        Ok((Self(value), consumed))
    }
}

impl From<usize> for CompactSizeUint {
    fn from(value: usize) -> Self {
        Self(value as u64)
    }
}

/// Read a CompactSize value from the front of `data`.
///
/// Returns `(value, bytes_consumed)`. Non-minimal encodings are accepted.
pub fn read_compact_size(data: &[u8]) -> Result<(u64, usize), CompactSizeError> {
    let prefix = *data.first().ok_or(CompactSizeError::Empty)?;

    let width = match prefix {
        0xfd => 2,
        0xfe => 4,
        0xff => 8,
        _ => return Ok((prefix as u64, 1)),
    };

    let needed = 1 + width;
    if data.len() < needed {
        return Err(CompactSizeError::Truncated {
            needed,
            available: data.len(),
        });
    }

    let mut buf = [0u8; 8];
    buf[..width].copy_from_slice(&data[1..needed]);
    Ok((u64::from_le_bytes(buf), needed))
}
