//! RLP encoding of EIP-155 legacy transactions.

use alloy::primitives::{keccak256, Address, U256};

/// Unsigned legacy transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTx {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas: u64,
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn encode_length(len: usize, offset: u8, out: &mut Vec<u8>) {
    if len < 56 {
        out.push(offset + len as u8);
    } else {
        let be = (len as u64).to_be_bytes();
        let len_bytes = trim_leading_zeros(&be);
        out.push(offset + 55 + len_bytes.len() as u8);
        out.extend_from_slice(len_bytes);
    }
}

fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    if bytes.len() == 1 && bytes[0] < 0x80 {
        out.push(bytes[0]);
    } else {
        encode_length(bytes.len(), 0x80, out);
        out.extend_from_slice(bytes);
    }
}

fn encode_uint(be: &[u8], out: &mut Vec<u8>) {
    encode_bytes(trim_leading_zeros(be), out);
}

fn encode_list(items: &[u8], out: &mut Vec<u8>) {
    encode_length(items.len(), 0xc0, out);
    out.extend_from_slice(items);
}

impl LegacyTx {
    fn encode_fields(&self, out: &mut Vec<u8>) {
        encode_uint(&self.nonce.to_be_bytes(), out);
        encode_uint(&self.gas_price.to_be_bytes(), out);
        encode_uint(&self.gas.to_be_bytes(), out);
        encode_bytes(self.to.as_slice(), out);
        encode_uint(&self.value.to_be_bytes::<32>(), out);
        encode_bytes(&self.data, out);
    }

    /// `rlp([nonce, gas_price, gas, to, value, data, chain_id, 0, 0])`
    pub fn encode_for_signing(&self) -> Vec<u8> {
        let mut fields = Vec::with_capacity(64 + self.data.len());
        self.encode_fields(&mut fields);
        encode_uint(&self.chain_id.to_be_bytes(), &mut fields);
        encode_uint(&[], &mut fields);
        encode_uint(&[], &mut fields);
        let mut out = Vec::with_capacity(fields.len() + 9);
        encode_list(&fields, &mut out);
        out
    }

    pub fn signature_hash(&self) -> [u8; 32] {
        keccak256(self.encode_for_signing()).0
    }

    /// Signed envelope with `v = recovery_id + chain_id * 2 + 35`.
    pub fn encode_signed(&self, rsv: &[u8; 65]) -> Vec<u8> {
        let v = rsv[64] as u64 + self.chain_id * 2 + 35;
        let mut fields = Vec::with_capacity(128 + self.data.len());
        self.encode_fields(&mut fields);
        encode_uint(&v.to_be_bytes(), &mut fields);
        encode_uint(&rsv[0..32], &mut fields);
        encode_uint(&rsv[32..64], &mut fields);
        let mut out = Vec::with_capacity(fields.len() + 9);
        encode_list(&fields, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sign::LocalKeySigner;
    use std::str::FromStr;

    // EIP-155 example transaction
    fn eip155_tx() -> LegacyTx {
        LegacyTx {
            chain_id: 1,
            nonce: 9,
            gas_price: 20_000_000_000,
            gas: 21_000,
            to: Address::from_str("0x3535353535353535353535353535353535353535").unwrap(),
            value: U256::from(1_000_000_000_000_000_000u128),
            data: Vec::new(),
        }
    }

    #[test]
    fn test_signing_payload() {
        let tx = eip155_tx();
        assert_eq!(
            hex::encode(tx.encode_for_signing()),
            "ec098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a764000080018080"
        );
        assert_eq!(
            hex::encode(tx.signature_hash()),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );
    }

    #[test]
    fn test_signed_envelope() {
        let tx = eip155_tx();
        let signer = LocalKeySigner::from_secret(&"46".repeat(32)).unwrap();
        let rsv = signer.sign_digest(&tx.signature_hash(), 0);
        assert_eq!(
            hex::encode(tx.encode_signed(&rsv)),
            "f86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        );
    }

    #[test]
    fn test_long_payload_length_prefix() {
        let mut out = Vec::new();
        encode_bytes(&[0xab; 60], &mut out);
        assert_eq!(&out[..2], &[0xb8, 60]);
        assert_eq!(out.len(), 62);

        let mut single = Vec::new();
        encode_bytes(&[0x05], &mut single);
        assert_eq!(single, vec![0x05]);
    }
}
