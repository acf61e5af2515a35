//! Direct-mode transaction construction for externally signed Terra transfers.
//!
//! The signer only ever sees `sha256(SignDoc)`; the body and auth info bytes are kept
//! so the 64-byte compact signature can be attached without re-encoding.

use cosmrs::{
    bank::MsgSend,
    cosmwasm::MsgExecuteContract,
    crypto::PublicKey,
    proto::cosmos::tx::v1beta1::TxRaw,
    tx::{self, Fee, Msg, SignDoc, SignerInfo},
    AccountId, Any, Coin,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{BridgeError, Result};

pub const ACCOUNT_PREFIX: &str = "terra";

/// CW20 execute messages the bridge sends and recognizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cw20ExecuteMsg {
    Transfer { recipient: String, amount: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cw20QueryMsg {
    Balance { address: String },
    TokenInfo {},
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cw20BalanceResponse {
    pub balance: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cw20TokenInfoResponse {
    pub total_supply: String,
}

/// Unsigned transaction as the signer's digest and the pieces needed to attach
/// its signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTx {
    pub body_bytes: Vec<u8>,
    pub auth_info_bytes: Vec<u8>,
    pub sign_doc_bytes: Vec<u8>,
    pub chain_id: String,
    pub account_number: u64,
    pub sequence: u64,
}

impl UnsignedTx {
    pub fn sign_digest(&self) -> [u8; 32] {
        Sha256::digest(&self.sign_doc_bytes).into()
    }

    /// Encoded `TxRaw` carrying the compact `r || s` of `rsv`.
    pub fn encode_signed(&self, rsv: &[u8; 65]) -> Result<Vec<u8>> {
        let raw = tx::Raw::from(TxRaw {
            body_bytes: self.body_bytes.clone(),
            auth_info_bytes: self.auth_info_bytes.clone(),
            signatures: vec![rsv[..64].to_vec()],
        });
        raw.to_bytes()
            .map_err(|e| BridgeError::Encoding(format!("failed to encode TxRaw: {}", e)))
    }
}

/// Upper-case hex `sha256` of the transaction bytes, as the chain reports it.
pub fn tx_hash(tx_bytes: &[u8]) -> String {
    hex::encode_upper(Sha256::digest(tx_bytes))
}

pub fn parse_account_id(address: &str) -> Result<AccountId> {
    address
        .parse()
        .map_err(|e| BridgeError::InvalidArgs(format!("invalid Terra address {}: {}", address, e)))
}

/// Cosmos public key from any SEC1 encoding of a secp256k1 key.
pub fn public_key_from_hex(pubkey_hex: &str) -> Result<PublicKey> {
    let bytes = hex::decode(pubkey_hex.trim_start_matches("0x"))?;
    let key = secp256k1::PublicKey::from_slice(&bytes)
        .map_err(|e| BridgeError::Encoding(format!("invalid public key: {}", e)))?;
    let tm_key = tendermint::PublicKey::from_raw_secp256k1(&key.serialize())
        .ok_or_else(|| BridgeError::Encoding("invalid secp256k1 public key".into()))?;
    Ok(PublicKey::from(tm_key))
}

pub fn coin(denom: &str, amount: u128) -> Result<Coin> {
    Ok(Coin {
        denom: denom
            .parse()
            .map_err(|e| BridgeError::InvalidConfig(format!("invalid denom {}: {}", denom, e)))?,
        amount,
    })
}

pub fn bank_send(from: &AccountId, to: &AccountId, denom: &str, amount: u128) -> Result<Any> {
    MsgSend {
        from_address: from.clone(),
        to_address: to.clone(),
        amount: vec![coin(denom, amount)?],
    }
    .to_any()
    .map_err(|e| BridgeError::Encoding(format!("failed to encode MsgSend: {}", e)))
}

pub fn cw20_transfer(from: &AccountId, contract: &AccountId, to: &AccountId, amount: u128) -> Result<Any> {
    let msg = Cw20ExecuteMsg::Transfer {
        recipient: to.to_string(),
        amount: amount.to_string(),
    };
    MsgExecuteContract {
        sender: from.clone(),
        contract: contract.clone(),
        msg: serde_json::to_vec(&msg)?,
        funds: vec![],
    }
    .to_any()
    .map_err(|e| BridgeError::Encoding(format!("failed to encode MsgExecuteContract: {}", e)))
}

/// Fee, signer and chain parameters of one transaction.
pub struct TxParams<'a> {
    pub public_key: PublicKey,
    pub chain_id: &'a str,
    pub account_number: u64,
    pub sequence: u64,
    pub gas: u64,
    pub fee: Coin,
}

pub fn build_unsigned(msg: Any, memo: &str, params: TxParams<'_>) -> Result<UnsignedTx> {
    let body = tx::Body::new(vec![msg], memo, 0u32);
    let signer_info = SignerInfo::single_direct(Some(params.public_key), params.sequence);
    let auth_info = signer_info.auth_info(Fee::from_amount_and_gas(params.fee, params.gas));
    let chain_id = params
        .chain_id
        .parse()
        .map_err(|e| BridgeError::InvalidConfig(format!("invalid chain id {}: {}", params.chain_id, e)))?;

    let sign_doc = SignDoc::new(&body, &auth_info, &chain_id, params.account_number)
        .map_err(|e| BridgeError::Encoding(format!("failed to create sign doc: {}", e)))?;
    let body_bytes = sign_doc.body_bytes.clone();
    let auth_info_bytes = sign_doc.auth_info_bytes.clone();
    let sign_doc_bytes = sign_doc
        .into_bytes()
        .map_err(|e| BridgeError::Encoding(format!("failed to encode sign doc: {}", e)))?;

    Ok(UnsignedTx {
        body_bytes,
        auth_info_bytes,
        sign_doc_bytes,
        chain_id: params.chain_id.to_string(),
        account_number: params.account_number,
        sequence: params.sequence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sign::LocalKeySigner;
    use cosmrs::crypto::secp256k1::SigningKey;

    fn signer() -> LocalKeySigner {
        LocalKeySigner::from_secret(&"46".repeat(32)).unwrap()
    }

    fn unsigned() -> UnsignedTx {
        let signer = signer();
        let public_key = public_key_from_hex(&signer.public_key_hex(true)).unwrap();
        let from = public_key.account_id(ACCOUNT_PREFIX).unwrap();
        let msg = bank_send(&from, &from, "uluna", 1_000_000).unwrap();
        build_unsigned(
            msg,
            "SWAPTX:abc",
            TxParams {
                public_key,
                chain_id: "columbus-5",
                account_number: 7,
                sequence: 3,
                gas: 200_000,
                fee: coin("uluna", 5_665_000).unwrap(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_public_key_matches_cosmrs_derivation() {
        let key = SigningKey::from_slice(&[0x46; 32]).unwrap();
        let expected = key.public_key().account_id(ACCOUNT_PREFIX).unwrap();

        let uncompressed = public_key_from_hex(&signer().public_key_hex(false)).unwrap();
        assert_eq!(uncompressed.account_id(ACCOUNT_PREFIX).unwrap(), expected);
    }

    #[test]
    fn test_sign_doc_is_deterministic() {
        let a = unsigned();
        let b = unsigned();
        assert_eq!(a, b);
        assert_eq!(a.sign_digest(), b.sign_digest());
        assert_eq!(a.sequence, 3);
    }

    #[test]
    fn test_signed_bytes_and_hash() {
        let tx = unsigned();
        let rsv = signer().sign_digest(&tx.sign_digest(), 0);
        let bytes = tx.encode_signed(&rsv).unwrap();

        let decoded = tx::Raw::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.to_bytes().unwrap(), bytes);
        let hash = tx_hash(&bytes);
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash.to_uppercase());
    }

    #[test]
    fn test_cw20_transfer_message_shape() {
        let msg = Cw20ExecuteMsg::Transfer {
            recipient: "terra1abc".into(),
            amount: "42".into(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            serde_json::json!({ "transfer": { "recipient": "terra1abc", "amount": "42" } })
        );
        assert_eq!(
            serde_json::to_value(Cw20QueryMsg::TokenInfo {}).unwrap(),
            serde_json::json!({ "token_info": {} })
        );
    }
}
