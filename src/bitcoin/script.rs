//! Bitcoin Scripts
//!
//! Standard locking script templates (P2PKH, P2WPKH, P2SH, P2WSH), the
//! hashes they commit to and canonical data pushes.

use secp256k1::PublicKey;
use thiserror::Error;

use super::compact_size::{read_compact_size, CompactSizeError, CompactSizeUint};
use super::hash::{hash160, sha256};

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;

/// Script errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("cannot read compact size uint: {0}")]
    CompactSize(#[from] CompactSizeError),

    #[error("malformed var len data")]
    MalformedVarLenData,
}

/// Standard script templates recognized by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptType {
    P2PKH,
    P2WPKH,
    P2SH,
    P2WSH,
    NonStandard,
}

impl ScriptType {
    /// Detect the template of a locking script
    pub fn classify(script: &[u8]) -> Self {
        match script {
            [OP_DUP, OP_HASH160, 0x14, hash @ .., OP_EQUALVERIFY, OP_CHECKSIG] if hash.len() == 20 => {
                ScriptType::P2PKH
            }
            [OP_0, 0x14, hash @ ..] if hash.len() == 20 => ScriptType::P2WPKH,
            [OP_HASH160, 0x14, hash @ .., OP_EQUAL] if hash.len() == 20 => ScriptType::P2SH,
            [OP_0, 0x20, hash @ ..] if hash.len() == 32 => ScriptType::P2WSH,
            _ => ScriptType::NonStandard,
        }
    }

    /// Whether the template is a segwit v0 program
    pub fn is_witness(&self) -> bool {
        matches!(self, ScriptType::P2WPKH | ScriptType::P2WSH)
    }

    pub fn is_public_key_hash(&self) -> bool {
        matches!(self, ScriptType::P2PKH | ScriptType::P2WPKH)
    }

    pub fn is_script_hash(&self) -> bool {
        matches!(self, ScriptType::P2SH | ScriptType::P2WSH)
    }
}

/// 20-byte hash160 of the compressed public key
pub fn public_key_hash(public_key: &PublicKey) -> [u8; 20] {
    hash160(&public_key.serialize())
}

/// 20-byte hash160 of a redeem script, committed to by P2SH
pub fn script_hash(script: &[u8]) -> [u8; 20] {
    hash160(script)
}

/// 32-byte single SHA-256 of a witness script, committed to by P2WSH
pub fn witness_script_hash(script: &[u8]) -> [u8; 32] {
    sha256(script)
}

/// `OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG`
pub fn pay_to_public_key_hash(public_key_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[OP_DUP, OP_HASH160, 0x14]);
    script.extend_from_slice(public_key_hash);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}

/// `OP_0 <20 bytes>`
pub fn pay_to_witness_public_key_hash(public_key_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(22);
    script.extend_from_slice(&[OP_0, 0x14]);
    script.extend_from_slice(public_key_hash);
    script
}

/// `OP_HASH160 <20 bytes> OP_EQUAL`
pub fn pay_to_script_hash(script_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(23);
    script.extend_from_slice(&[OP_HASH160, 0x14]);
    script.extend_from_slice(script_hash);
    script.push(OP_EQUAL);
    script
}

/// `OP_0 <32 bytes>`
pub fn pay_to_witness_script_hash(witness_script_hash: &[u8; 32]) -> Vec<u8> {
    let mut script = Vec::with_capacity(34);
    script.extend_from_slice(&[OP_0, 0x20]);
    script.extend_from_slice(witness_script_hash);
    script
}

/// Public key hash committed to by a P2PKH or P2WPKH script
pub fn extract_public_key_hash(script: &[u8]) -> Option<[u8; 20]> {
    let payload = match ScriptType::classify(script) {
        ScriptType::P2PKH => &script[3..23],
        ScriptType::P2WPKH => &script[2..22],
        _ => return None,
    };
    payload.try_into().ok()
}

/// Script hash committed to by a P2SH (20 bytes) or P2WSH (32 bytes) script
pub fn extract_script_hash(script: &[u8]) -> Option<&[u8]> {
    match ScriptType::classify(script) {
        ScriptType::P2SH => Some(&script[2..22]),
        ScriptType::P2WSH => Some(&script[2..34]),
        _ => None,
    }
}

/// Prefix a script with its CompactSize length
pub fn script_to_var_len_data(script: &[u8]) -> Vec<u8> {
    let mut out = CompactSizeUint::from(script.len()).encode();
    out.extend_from_slice(script);
    out
}

/// Strip the CompactSize length prefix, requiring it to cover exactly the rest
pub fn script_from_var_len_data(data: &[u8]) -> Result<Vec<u8>, ScriptError> {
    let (len, consumed) = read_compact_size(data)?;
    let script = &data[consumed..];
    if script.len() as u64 != len {
        return Err(ScriptError::MalformedVarLenData);
    }
    Ok(script.to_vec())
}

/// Append a canonical push of `data` to a script
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    match data {
        [] => script.push(OP_0),
        [n @ 1..=16] => script.push(OP_1 + n - 1),
        [0x81] => script.push(OP_1NEGATE),
        _ => {
            let len = data.len();
            if len <= 75 {
                script.push(len as u8);
            } else if len <= 0xff {
                script.push(OP_PUSHDATA1);
                script.push(len as u8);
            } else if len <= 0xffff {
                script.push(OP_PUSHDATA2);
                script.extend_from_slice(&(len as u16).to_le_bytes());
            } else {
                script.push(OP_PUSHDATA4);
                script.extend_from_slice(&(len as u32).to_le_bytes());
            }
            script.extend_from_slice(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUBLIC_KEY: &str = "04989d253b17a6a0f41838b84ff0d20e8898f9d7b1a98f2564da4cc29dcf8581d9d218b65e7d91c752f7b22eaceb771a9af3a6f3d3f010a5d471a1aeef7d7713af";
    const PUBLIC_KEY_HASH: &str = "8db50eb52063ea9d98b3eac91489a90f738986f6";
    const REDEEM_SCRIPT: &str = "14934b98637ca318a4d6e7ca6ffd1690b8e77df637750\
        8f9f0c90d000395237576a9148db50eb52063ea9d98b3eac91489a90f738986f68763ac\
        6776a914e257eccafbc07c381642ce6e7e55120fb077fbed8804e0250162b175ac68";
    const SCRIPT_HASH: &str = "3ec459d0f3c29286ae5df5fcc421e2786024277e";
    const WITNESS_SCRIPT_HASH: &str = "86a303cdd2e2eab1d1679f1a813835dc5a1b65321077cdccaf08f98cbf04ca96";

    fn array<const N: usize>(s: &str) -> [u8; N] {
        hex::decode(s).unwrap().try_into().unwrap()
    }

    #[test]
    fn test_public_key_hash_uses_compressed_key() {
        let key = PublicKey::from_slice(&hex::decode(PUBLIC_KEY).unwrap()).unwrap();
        assert_eq!(hex::encode(public_key_hash(&key)), PUBLIC_KEY_HASH);
    }

    #[test]
    fn test_script_hashes() {
        let redeem = hex::decode(REDEEM_SCRIPT).unwrap();
        assert_eq!(hex::encode(script_hash(&redeem)), SCRIPT_HASH);
        assert_eq!(hex::encode(witness_script_hash(&redeem)), WITNESS_SCRIPT_HASH);
    }

    #[test]
    fn test_templates() {
        let pkh = array::<20>(PUBLIC_KEY_HASH);
        let sh = array::<20>(SCRIPT_HASH);
        let wsh = array::<32>(WITNESS_SCRIPT_HASH);

        let cases = [
            (pay_to_public_key_hash(&pkh), "1976a9148db50eb52063ea9d98b3eac91489a90f738986f688ac", ScriptType::P2PKH),
            (pay_to_witness_public_key_hash(&pkh), "1600148db50eb52063ea9d98b3eac91489a90f738986f6", ScriptType::P2WPKH),
            (pay_to_script_hash(&sh), "17a9143ec459d0f3c29286ae5df5fcc421e2786024277e87", ScriptType::P2SH),
            (pay_to_witness_script_hash(&wsh), "22002086a303cdd2e2eab1d1679f1a813835dc5a1b65321077cdccaf08f98cbf04ca96", ScriptType::P2WSH),
        ];

        for (script, var_len, script_type) in cases {
            assert_eq!(hex::encode(script_to_var_len_data(&script)), var_len);
            assert_eq!(ScriptType::classify(&script), script_type);
        }
    }

    #[test]
    fn test_extract_hashes() {
        let pkh = array::<20>(PUBLIC_KEY_HASH);
        assert_eq!(extract_public_key_hash(&pay_to_public_key_hash(&pkh)), Some(pkh));
        assert_eq!(extract_public_key_hash(&pay_to_witness_public_key_hash(&pkh)), Some(pkh));
        assert_eq!(extract_public_key_hash(&pay_to_script_hash(&pkh)), None);

        let wsh = array::<32>(WITNESS_SCRIPT_HASH);
        assert_eq!(
            extract_script_hash(&pay_to_witness_script_hash(&wsh)),
            Some(&wsh[..])
        );
        assert_eq!(ScriptType::classify(&hex::decode(REDEEM_SCRIPT).unwrap()), ScriptType::NonStandard);
    }

    #[test]
    fn test_script_from_var_len_data() {
        let ok = hex::decode("1600148db50eb52063ea9d98b3eac91489a90f738986f6").unwrap();
        assert_eq!(
            hex::encode(script_from_var_len_data(&ok).unwrap()),
            "00148db50eb52063ea9d98b3eac91489a90f738986f6"
        );

        assert_eq!(
            script_from_var_len_data(&[]),
            Err(ScriptError::CompactSize(CompactSizeError::Empty))
        );

        for malformed in [
            "16",
            "00148db50eb52063ea9d98b3eac91489a90f738986f6",
            "1500148db50eb52063ea9d98b3eac91489a90f738986f6",
        ] {
            assert_eq!(
                script_from_var_len_data(&hex::decode(malformed).unwrap()),
                Err(ScriptError::MalformedVarLenData),
                "{}",
                malformed
            );
        }
    }

    #[test]
    fn test_push_data() {
        let mut script = Vec::new();
        push_data(&mut script, &[]);
        push_data(&mut script, &[5]);
        push_data(&mut script, &[0xaa, 0xbb]);
        assert_eq!(hex::encode(&script), "005502aabb");

        let redeem = hex::decode(REDEEM_SCRIPT).unwrap();
        let mut script = Vec::new();
        push_data(&mut script, &redeem);
        assert_eq!(&script[..2], &[OP_PUSHDATA1, 0x5c]);
        assert_eq!(&script[2..], &redeem[..]);

        let mut script = Vec::new();
        push_data(&mut script, &[0u8; 300]);
        assert_eq!(&script[..3], &[OP_PUSHDATA2, 0x2c, 0x01]);
    }
}
