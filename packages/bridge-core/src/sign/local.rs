//! Directly-held secp256k1 key for operator tooling and tests.
//!
//! Produces the same 65-byte `r || s || v` layout the threshold signer returns, so the
//! adapters' assembly code is shared by both paths. Accepted key formats:
//!
//! - 32-byte hex (`0x` optional)
//! - EOS WIF (`5...`) and `PVT_K1_...`
//! - BIP39 mnemonic, derived on the Terra path `m/44'/330'/0'/0/0`

use bip39::Mnemonic;
use cosmrs::bip32::{DerivationPath, XPrv};
use ripemd::Ripemd160;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

use crate::error::{BridgeError, Result};

/// Derivation path used for mnemonic keys (BIP44 coin type 330)
pub const TERRA_DERIVATION_PATH: &str = "m/44'/330'/0'/0/0";

const MAX_CANONICAL_ATTEMPTS: u32 = 25;

pub struct LocalKeySigner {
    secp: Secp256k1<All>,
    secret: SecretKey,
}

impl LocalKeySigner {
    pub fn from_secret(secret: &str) -> Result<Self> {
        let secret = secret.trim();
        let bytes = if secret.contains(char::is_whitespace) {
            mnemonic_key(secret)?
        } else if let Some(body) = secret.strip_prefix("PVT_K1_") {
            eos_k1_key(body)?
        } else if secret.len() == 51 && secret.starts_with('5') {
            wif_key(secret)?
        } else {
            let raw = hex::decode(secret.trim_start_matches("0x"))?;
            raw.try_into().map_err(|_| {
                BridgeError::InvalidConfig("hex private key must be 32 bytes".into())
            })?
        };
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|e| BridgeError::InvalidConfig(format!("invalid private key: {}", e)))?;
        Ok(Self {
            secp: Secp256k1::new(),
            secret,
        })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_secret_key(&self.secp, &self.secret)
    }

    /// Uncompressed (65-byte) or compressed (33-byte) public key, hex encoded.
    pub fn public_key_hex(&self, compressed: bool) -> String {
        let pk = self.public_key();
        if compressed {
            hex::encode(pk.serialize())
        } else {
            hex::encode(pk.serialize_uncompressed())
        }
    }

    /// Sign a 32-byte digest. `attempt` > 0 mixes extra entropy into the nonce so a
    /// retry yields a different signature over the same digest.
    pub fn sign_digest(&self, digest: &[u8; 32], attempt: u32) -> [u8; 65] {
        let msg = Message::from_digest(*digest);
        let sig = if attempt == 0 {
            self.secp.sign_ecdsa_recoverable(&msg, &self.secret)
        } else {
            let mut noncedata = [0u8; 32];
            noncedata[..4].copy_from_slice(&attempt.to_be_bytes());
            self.secp
                .sign_ecdsa_recoverable_with_noncedata(&msg, &self.secret, &noncedata)
        };
        let (recovery_id, compact) = sig.serialize_compact();
        let mut rsv = [0u8; 65];
        rsv[..64].copy_from_slice(&compact);
        rsv[64] = recovery_id.to_i32() as u8;
        rsv
    }

    /// Sign the hex digest, re-signing with fresh nonces until `is_canonical` holds.
    pub fn sign_canonical<P>(&self, digest_hex: &str, is_canonical: P) -> Result<[u8; 65]>
    where
        P: Fn(&[u8; 65]) -> bool,
    {
        let digest: [u8; 32] = hex::decode(digest_hex.trim_start_matches("0x"))?
            .try_into()
            .map_err(|_| BridgeError::Encoding("message hash must be 32 bytes".into()))?;
        for attempt in 0..MAX_CANONICAL_ATTEMPTS {
            let rsv = self.sign_digest(&digest, attempt);
            if is_canonical(&rsv) {
                return Ok(rsv);
            }
        }
        Err(BridgeError::NonCanonicalSignature {
            attempts: MAX_CANONICAL_ATTEMPTS,
        })
    }
}

fn mnemonic_key(phrase: &str) -> Result<[u8; 32]> {
    let mnemonic = Mnemonic::parse(phrase)
        .map_err(|e| BridgeError::InvalidConfig(format!("invalid mnemonic: {}", e)))?;
    let seed = mnemonic.to_seed("");
    let path: DerivationPath = TERRA_DERIVATION_PATH
        .parse()
        .map_err(|e| BridgeError::InvalidConfig(format!("invalid derivation path: {:?}", e)))?;
    let xprv = XPrv::derive_from_path(seed, &path)
        .map_err(|e| BridgeError::InvalidConfig(format!("key derivation failed: {}", e)))?;
    Ok(xprv.to_bytes())
}

fn wif_key(wif: &str) -> Result<[u8; 32]> {
    let data = bs58::decode(wif)
        .into_vec()
        .map_err(|e| BridgeError::InvalidConfig(format!("invalid WIF key: {}", e)))?;
    if data.len() != 37 || data[0] != 0x80 {
        return Err(BridgeError::InvalidConfig("invalid WIF key layout".into()));
    }
    let (payload, checksum) = data.split_at(33);
    let digest = Sha256::digest(Sha256::digest(payload));
    if digest[..4] != checksum[..] {
        return Err(BridgeError::InvalidConfig("invalid WIF key checksum".into()));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&payload[1..]);
    Ok(key)
}

fn eos_k1_key(body: &str) -> Result<[u8; 32]> {
    let data = bs58::decode(body)
        .into_vec()
        .map_err(|e| BridgeError::InvalidConfig(format!("invalid PVT_K1 key: {}", e)))?;
    if data.len() != 36 {
        return Err(BridgeError::InvalidConfig("invalid PVT_K1 key length".into()));
    }
    let (key, checksum) = data.split_at(32);
    let mut hasher = Ripemd160::new();
    hasher.update(key);
    hasher.update(b"K1");
    if hasher.finalize()[..4] != checksum[..] {
        return Err(BridgeError::InvalidConfig("invalid PVT_K1 key checksum".into()));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(key);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sign::is_low_s;
    use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};

    const KEY_HEX: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_hex_key_signature_recovers_to_public_key() {
        let signer = LocalKeySigner::from_secret(KEY_HEX).unwrap();
        let digest = [7u8; 32];
        let rsv = signer.sign_digest(&digest, 0);

        let secp = Secp256k1::new();
        let rec_id = RecoveryId::from_i32(rsv[64] as i32).unwrap();
        let sig = RecoverableSignature::from_compact(&rsv[..64], rec_id).unwrap();
        let recovered = secp
            .recover_ecdsa(&Message::from_digest(digest), &sig)
            .unwrap();
        assert_eq!(recovered, signer.public_key());
    }

    #[test]
    fn test_signatures_are_low_s() {
        let signer = LocalKeySigner::from_secret(KEY_HEX).unwrap();
        for attempt in 0..5 {
            assert!(is_low_s(&signer.sign_digest(&[9u8; 32], attempt)));
        }
    }

    #[test]
    fn test_retry_changes_signature() {
        let signer = LocalKeySigner::from_secret(KEY_HEX).unwrap();
        let a = signer.sign_digest(&[1u8; 32], 0);
        let b = signer.sign_digest(&[1u8; 32], 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_canonical_bound() {
        let signer = LocalKeySigner::from_secret(KEY_HEX).unwrap();
        let res = signer.sign_canonical(&hex::encode([1u8; 32]), |_| false);
        assert!(matches!(
            res,
            Err(BridgeError::NonCanonicalSignature { attempts: 25 })
        ));
    }

    #[test]
    fn test_wif_key() {
        // Well-known EOS development key
        let signer =
            LocalKeySigner::from_secret("5KQwrPbwdL6PhXujxW37FSSQZ1JiwsST4cqQzDeyXtP79zkvFD3")
                .unwrap();
        assert_eq!(
            hex::encode(signer.secret.secret_bytes()),
            "d2653ff7cbb2d8ff129ac27ef5781ce68b2558c41a74af1f2ddca635cbeef07d"
        );
    }

    #[test]
    fn test_mnemonic_key() {
        let signer = LocalKeySigner::from_secret(TEST_MNEMONIC).unwrap();
        assert_eq!(signer.public_key_hex(true).len(), 66);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(LocalKeySigner::from_secret("0x1234").is_err());
        assert!(LocalKeySigner::from_secret("not a valid mnemonic phrase").is_err());
    }
}
