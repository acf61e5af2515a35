//! K1 signature encoding and the digests EOS nodes check signatures against.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::error::{BridgeError, Result};

pub const SIGNATURE_PREFIX: &str = "SIG_K1_";

/// Offset added to the recovery id: 27 plus 4 for compressed keys.
const COMPACT_RECOVERY_OFFSET: u8 = 31;

/// `sha256(chain_id || packed_trx || context_free_digest)`. Without context-free data
/// the last part is 32 zero bytes.
pub fn sig_digest(chain_id: &[u8], packed_trx: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(chain_id);
    hasher.update(packed_trx);
    hasher.update([0u8; 32]);
    hasher.finalize().into()
}

/// Transaction id: `sha256(packed_trx)`.
pub fn transaction_id(packed_trx: &[u8]) -> String {
    hex::encode(Sha256::digest(packed_trx))
}

/// Nodes reject signatures whose compact `r` or `s` is not minimally encoded.
pub fn is_canonical(rsv: &[u8; 65]) -> bool {
    let r = &rsv[0..32];
    let s = &rsv[32..64];
    r[0] & 0x80 == 0
        && !(r[0] == 0 && r[1] & 0x80 == 0)
        && s[0] & 0x80 == 0
        && !(s[0] == 0 && s[1] & 0x80 == 0)
}

fn k1_checksum(data: &[u8]) -> [u8; 4] {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.update(b"K1");
    let digest = hasher.finalize();
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[..4]);
    out
}

/// Encode `r || s || v` as `SIG_K1_<base58(v' || r || s || checksum)>`.
pub fn encode_signature(rsv: &[u8; 65]) -> Result<String> {
    if rsv[64] > 3 {
        return Err(BridgeError::Encoding(format!(
            "invalid recovery id {}",
            rsv[64]
        )));
    }
    let mut data = Vec::with_capacity(69);
    data.push(rsv[64] + COMPACT_RECOVERY_OFFSET);
    data.extend_from_slice(&rsv[..64]);
    let checksum = k1_checksum(&data);
    data.extend_from_slice(&checksum);
    Ok(format!("{}{}", SIGNATURE_PREFIX, bs58::encode(data).into_string()))
}

/// Inverse of [`encode_signature`].
pub fn decode_signature(sig: &str) -> Result<[u8; 65]> {
    let body = sig
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or_else(|| BridgeError::Encoding("signature must start with SIG_K1_".into()))?;
    let data = bs58::decode(body)
        .into_vec()
        .map_err(|e| BridgeError::Encoding(format!("invalid base58 signature: {}", e)))?;
    if data.len() != 69 {
        return Err(BridgeError::Encoding(format!(
            "signature must be 69 bytes, got {}",
            data.len()
        )));
    }
    let (payload, checksum) = data.split_at(65);
    if k1_checksum(payload)[..] != checksum[..] {
        return Err(BridgeError::Encoding("signature checksum mismatch".into()));
    }
    let mut rsv = [0u8; 65];
    rsv[..64].copy_from_slice(&payload[1..]);
    rsv[64] = payload[0].wrapping_sub(COMPACT_RECOVERY_OFFSET);
    Ok(rsv)
}
