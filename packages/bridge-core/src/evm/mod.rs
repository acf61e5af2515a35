//! EVM adapter.
//!
//! A deposit is either a native-value transaction to the deposit address carrying the
//! bind address as UTF-8 call data, or an ERC20 `transfer` to the deposit address
//! with the bind appended after the ABI arguments. Releases are EIP-155 legacy
//! transactions from the threshold address shaped the same way, with the
//! `SWAPTX:<swap id>` memo in place of the bind.
//!
//! ## Submodules
//!
//! - `client` - alloy providers and JSON-RPC calls over the endpoint set
//! - `contracts` - ERC20 bindings using alloy sol! macro
//! - `rlp` - legacy transaction encoding

pub mod client;
pub mod contracts;
pub mod rlp;

use alloy::primitives::{keccak256, Address, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use std::str::FromStr;
use tracing::{info, warn};

use crate::bridge::{init_latest_height, Bridge, BridgeBase};
use crate::build::{check_balance, prepare_build_args};
use crate::error::{BridgeError, Result};
use crate::retry::{classify_error, ErrorClass};
use crate::sign::is_low_s;
use crate::types::{
    BridgeRole, BuildTxArgs, ChainConfig, ExtraArgs, GatewayConfig, RawTx, ScannedBlock,
    SignedPayload, SignedTx, SwapType, Transfer, TxRecord, TxStatus,
};

use client::{parse_quantity, parse_u256, to_u128, EvmClient, RpcTransaction};
use contracts::ERC20;
use rlp::LegacyTx;

const NATIVE_TRANSFER_GAS: u64 = 90_000;
const TOKEN_TRANSFER_GAS: u64 = 120_000;

/// Unsigned release transaction.
#[derive(Debug, Clone)]
pub struct EvmRawTx {
    pub tx: LegacyTx,
}

#[derive(Debug, Clone)]
pub struct EvmSignedTx {
    pub tx: LegacyTx,
    /// `0x`-prefixed signed envelope.
    pub raw: String,
}

pub struct EvmBridge {
    base: BridgeBase,
    client: Option<EvmClient>,
    chain_id: u64,
}

impl EvmBridge {
    pub fn new(role: BridgeRole) -> Self {
        Self {
            base: BridgeBase::new(role),
            client: None,
            chain_id: 0,
        }
    }

    fn client(&self) -> Result<&EvmClient> {
        self.client
            .as_ref()
            .ok_or_else(|| BridgeError::InvalidConfig("EVM gateway not configured".into()))
    }

    #[allow(unreachable_patterns)]
    fn raw<'a>(&self, raw: &'a RawTx) -> Result<&'a EvmRawTx> {
        match raw {
            RawTx::Evm(tx) => Ok(tx),
            _ => Err(BridgeError::WrongRawTx),
        }
    }
}

/// Parse an address, enforcing the EIP-55 checksum on mixed-case input.
pub fn parse_address(address: &str) -> Result<Address> {
    let invalid = || BridgeError::InvalidArgs(format!("invalid EVM address {}", address));
    let digits = address.strip_prefix("0x").ok_or_else(invalid)?;
    if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let mixed = digits.chars().any(|c| c.is_ascii_lowercase())
        && digits.chars().any(|c| c.is_ascii_uppercase());
    if mixed {
        Address::parse_checksummed(address, None).map_err(|_| invalid())
    } else {
        Address::from_str(address).map_err(|_| invalid())
    }
}

/// Numeric chain id from configuration (decimal or `0x` hex).
fn parse_chain_id(network_id: &str) -> Result<u64> {
    let id = network_id.trim();
    let parsed = match id.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => id.parse(),
    };
    parsed.map_err(|_| BridgeError::InvalidConfig(format!("EVM chain id must be numeric: {}", id)))
}

fn memo_text(bytes: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?.trim_matches(char::from(0)).trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Transfers of a fetched transaction: the native value, and an ERC20 `transfer`
/// decoded from the call data.
pub fn tx_record(tx: &RpcTransaction) -> Result<TxRecord> {
    let input = hex::decode(tx.input.trim_start_matches("0x"))?;
    let to = tx.to.clone().unwrap_or_default();
    let mut transfers = Vec::new();

    let value = parse_u256(&tx.value)?;
    if !value.is_zero() && !to.is_empty() {
        transfers.push(Transfer {
            from: tx.from.clone(),
            to: to.clone(),
            value: to_u128(value)?,
            memo: memo_text(&input),
            token: None,
        });
    }

    if input.len() >= 68 && input[..4] == ERC20::transferCall::SELECTOR[..] && !to.is_empty() {
        let recipient = Address::from_slice(&input[16..36]);
        let amount = U256::from_be_slice(&input[36..68]);
        transfers.push(Transfer {
            from: tx.from.clone(),
            to: recipient.to_string(),
            value: to_u128(amount)?,
            memo: memo_text(&input[68..]),
            token: Some(to.clone()),
        });
    }

    let height = tx.block_number.as_deref().map(parse_quantity).transpose()?;
    Ok(TxRecord {
        hash: tx.hash.clone(),
        tx_to: to,
        height,
        timestamp: 0,
        transfers,
    })
}

#[async_trait]
impl Bridge for EvmBridge {
    fn base(&self) -> &BridgeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BridgeBase {
        &mut self.base
    }

    fn family(&self) -> &'static str {
        "EVM"
    }

    async fn set_chain_and_gateway(&mut self, chain: ChainConfig, gateway: GatewayConfig) -> Result<()> {
        let chain_id = parse_chain_id(&chain.network_id)?;
        self.base.configure(chain, gateway)?;
        let client = EvmClient::new(self.base.endpoints()?.clone())?;

        let remote = self
            .base
            .init_retry
            .run("eth_chainId", |_| client.chain_id(), |e| e.is_fatal())
            .await?;
        if remote != chain_id {
            return Err(BridgeError::WrongNetwork {
                expected: chain_id.to_string(),
                actual: remote.to_string(),
            });
        }
        self.client = Some(client);
        self.chain_id = chain_id;
        init_latest_height(self).await?;
        Ok(())
    }

    fn is_valid_address(&self, address: &str) -> bool {
        parse_address(address).is_ok()
    }

    fn public_key_to_address(&self, pubkey_hex: &str) -> Result<String> {
        let bytes = hex::decode(pubkey_hex.trim_start_matches("0x"))?;
        let key = secp256k1::PublicKey::from_slice(&bytes)
            .map_err(|e| BridgeError::Encoding(format!("invalid public key: {}", e)))?;
        let uncompressed = key.serialize_uncompressed();
        let digest = keccak256(&uncompressed[1..]);
        Ok(Address::from_slice(&digest[12..]).to_checksum(None))
    }

    async fn get_latest_block_number(&self) -> Result<u64> {
        self.client()?.block_number().await
    }

    async fn get_latest_block_number_of(&self, endpoint: &str) -> Result<u64> {
        self.client()?.block_number_at(endpoint).await
    }

    async fn get_balance(&self, account: &str) -> Result<u128> {
        to_u128(self.client()?.balance(parse_address(account)?).await?)
    }

    async fn get_token_balance(&self, token: &str, account: &str) -> Result<u128> {
        let balance = self
            .client()?
            .token_balance(parse_address(token)?, parse_address(account)?)
            .await?;
        to_u128(balance)
    }

    async fn get_token_supply(&self, token: &str) -> Result<u128> {
        to_u128(self.client()?.token_supply(parse_address(token)?).await?)
    }

    async fn build_raw_transaction(&self, args: &mut BuildTxArgs) -> Result<RawTx> {
        let token = prepare_build_args(self, args)?;
        let from = parse_address(&args.from)?;
        let receiver = parse_address(&args.to)?;
        let value = args.value.unwrap_or(args.origin_value);

        let tail = match args.swap_type {
            SwapType::None => match &args.input {
                Some(input) => hex::decode(input.trim_start_matches("0x"))?,
                None => Vec::new(),
            },
            _ => args.unlock_memo().into_bytes(),
        };

        let (to, tx_value, data, default_gas) = match &token.token_address {
            Some(contract) => {
                let call = ERC20::transferCall {
                    to: receiver,
                    amount: U256::from(value),
                };
                let mut data = call.abi_encode();
                data.extend_from_slice(&tail);
                (parse_address(contract)?, U256::ZERO, data, TOKEN_TRANSFER_GAS)
            }
            None => (receiver, U256::from(value), tail, NATIVE_TRANSFER_GAS),
        };

        let (nonce, gas, gas_price) = match &args.extra {
            Some(ExtraArgs::Evm {
                nonce,
                gas,
                gas_price,
            }) => (*nonce, *gas, *gas_price),
            _ => (None, None, None),
        };
        let client = self.client()?;
        let nonce = match nonce {
            Some(n) => n,
            None => client.pending_nonce(from).await?,
        };
        let gas_price = match gas_price {
            Some(p) => p,
            None => client.gas_price().await?,
        };
        let gas = gas.unwrap_or(default_gas);
        let fee = gas_price.saturating_mul(gas as u128);

        let native = self.get_balance(&args.from).await?;
        match &token.token_address {
            Some(contract) => {
                check_balance(fee, native)?;
                check_balance(value, self.get_token_balance(contract, &args.from).await?)?;
            }
            None => check_balance(value.saturating_add(fee), native)?,
        }

        let tx = LegacyTx {
            chain_id: self.chain_id,
            nonce,
            gas_price,
            gas,
            to,
            value: tx_value,
            data,
        };
        info!(
            pair_id = %args.pair_id,
            swap_id = %args.swap_id,
            swap_type = %args.swap_type,
            from = %args.from,
            to = %args.to,
            value = %value,
            nonce,
            gas_price = %gas_price,
            "Built EVM transaction"
        );
        Ok(RawTx::Evm(EvmRawTx { tx }))
    }

    fn msg_hash(&self, raw: &RawTx) -> Result<String> {
        Ok(hex::encode(self.raw(raw)?.tx.signature_hash()))
    }

    fn is_canonical_signature(&self, rsv: &[u8; 65]) -> bool {
        is_low_s(rsv)
    }

    fn assemble_signed(&self, raw: &RawTx, rsv: &[u8; 65]) -> Result<SignedTx> {
        let tx = &self.raw(raw)?.tx;
        if rsv[64] > 1 {
            return Err(BridgeError::Encoding(format!("invalid recovery id {}", rsv[64])));
        }
        let envelope = tx.encode_signed(rsv);
        Ok(SignedTx {
            tx_hash: format!("0x{}", hex::encode(keccak256(&envelope))),
            payload: SignedPayload::Evm(EvmSignedTx {
                tx: tx.clone(),
                raw: format!("0x{}", hex::encode(envelope)),
            }),
        })
    }

    async fn send_transaction(&self, signed: &SignedTx) -> Result<String> {
        #[allow(unreachable_patterns)]
        let tx = match &signed.payload {
            SignedPayload::Evm(tx) => tx,
            _ => return Err(BridgeError::WrongRawTx),
        };
        let remote = match self.client()?.send_raw_transaction(&tx.raw).await {
            Ok(hash) => hash,
            Err(e) if classify_error(&e.to_string()) == ErrorClass::AlreadyKnown => {
                warn!(tx_hash = %signed.tx_hash, error = %e, "Transaction already known");
                return Ok(signed.tx_hash.clone());
            }
            Err(e) => return Err(e),
        };
        if !remote.eq_ignore_ascii_case(&signed.tx_hash) {
            return Err(BridgeError::TxHashMismatch {
                local: signed.tx_hash.clone(),
                remote,
            });
        }
        info!(tx_hash = %remote, nonce = tx.tx.nonce, "EVM transaction sent");
        Ok(remote)
    }

    async fn get_transaction(&self, hash: &str) -> Result<TxRecord> {
        let tx = self
            .client()?
            .transaction(hash)
            .await?
            .ok_or_else(|| BridgeError::TxNotFound(hash.to_string()))?;
        tx_record(&tx)
    }

    async fn get_transaction_status(&self, hash: &str) -> Result<Option<TxStatus>> {
        let client = self.client()?;
        let receipt = match client.receipt(hash).await? {
            Some(r) if r.succeeded() => r,
            _ => return Ok(None),
        };
        let height = match receipt.block_number.as_deref() {
            Some(n) => parse_quantity(n)?,
            None => return Ok(None),
        };
        let latest = client.block_number().await?;
        let timestamp = match client.block(height).await? {
            Some(block) => parse_quantity(&block.timestamp)?,
            None => 0,
        };
        Ok(Some(TxStatus {
            block_height: height,
            confirmations: latest.saturating_sub(height) + 1,
            irreversible_height: None,
            timestamp,
        }))
    }

    async fn get_block_by_number(&self, height: u64) -> Result<ScannedBlock> {
        let block = self
            .client()?
            .block(height)
            .await?
            .ok_or_else(|| BridgeError::Rpc(format!("block {} not available yet", height)))?;
        Ok(ScannedBlock {
            id: block.hash,
            height: parse_quantity(&block.number)?,
            tx_hashes: block.transactions,
        })
    }

    async fn pending_transactions(&self) -> Result<Vec<String>> {
        Ok(self.client()?.pending_block().await?.transactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sign::LocalKeySigner;
    use serde_json::json;

    const DEPOSIT: &str = "0x1111111111111111111111111111111111111111";

    fn rpc_tx(value: &str, input: &str, to: &str) -> RpcTransaction {
        serde_json::from_value(json!({
            "hash": "0xabc",
            "from": "0x2222222222222222222222222222222222222222",
            "to": to,
            "value": value,
            "input": input,
            "blockNumber": "0x10"
        }))
        .unwrap()
    }

    #[test]
    fn test_address_validation() {
        let bridge = EvmBridge::new(BridgeRole::Destination);
        assert!(bridge.is_valid_address(DEPOSIT));
        assert!(bridge.is_valid_address("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"));
        // wrong checksum on mixed case
        assert!(!bridge.is_valid_address("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAeD"));
        assert!(!bridge.is_valid_address("1111111111111111111111111111111111111111"));
        assert!(!bridge.is_valid_address("0x11"));
        assert!(!bridge.is_valid_address("bridgedepo11"));
    }

    #[test]
    fn test_public_key_to_address() {
        let bridge = EvmBridge::new(BridgeRole::Destination);
        // private key 0x...01 maps to the well-known generator address
        let signer = LocalKeySigner::from_secret(&format!("{}01", "00".repeat(31))).unwrap();
        let expected = "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf";
        assert_eq!(
            bridge.public_key_to_address(&signer.public_key_hex(false)).unwrap(),
            expected
        );
        assert_eq!(
            bridge.public_key_to_address(&signer.public_key_hex(true)).unwrap(),
            expected
        );
    }

    #[test]
    fn test_chain_id_parsing() {
        assert_eq!(parse_chain_id("56").unwrap(), 56);
        assert_eq!(parse_chain_id("0x38").unwrap(), 56);
        assert!(matches!(
            parse_chain_id("bsc"),
            Err(BridgeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_native_deposit_record() {
        let memo = hex::encode("bridgeuser11");
        let record = tx_record(&rpc_tx("0x2710", &format!("0x{}", memo), DEPOSIT)).unwrap();
        assert_eq!(record.height, Some(16));
        assert_eq!(record.transfers.len(), 1);
        let t = &record.transfers[0];
        assert_eq!(t.value, 10_000);
        assert_eq!(t.to, DEPOSIT);
        assert_eq!(t.memo.as_deref(), Some("bridgeuser11"));
        assert_eq!(t.token, None);
    }

    #[test]
    fn test_token_deposit_record() {
        let token = "0x3333333333333333333333333333333333333333";
        let call = ERC20::transferCall {
            to: Address::from_str(DEPOSIT).unwrap(),
            amount: U256::from(5_000u64),
        };
        let mut input = call.abi_encode();
        input.extend_from_slice(b"bridgeuser11");
        let record = tx_record(&rpc_tx("0x0", &format!("0x{}", hex::encode(input)), token)).unwrap();

        assert_eq!(record.transfers.len(), 1);
        let t = &record.transfers[0];
        assert!(t.to.eq_ignore_ascii_case(DEPOSIT));
        assert_eq!(t.value, 5_000);
        assert_eq!(t.memo.as_deref(), Some("bridgeuser11"));
        assert_eq!(t.token.as_deref(), Some(token));
    }

    #[test]
    fn test_plain_contract_call_has_no_transfers() {
        let record = tx_record(&rpc_tx("0x0", "0xdeadbeef", DEPOSIT)).unwrap();
        assert!(record.transfers.is_empty());
    }

    #[test]
    fn test_signed_hash_matches_envelope() {
        let mut bridge = EvmBridge::new(BridgeRole::Destination);
        bridge.chain_id = 1;
        let raw = RawTx::Evm(EvmRawTx {
            tx: LegacyTx {
                chain_id: 1,
                nonce: 0,
                gas_price: 1_000_000_000,
                gas: NATIVE_TRANSFER_GAS,
                to: Address::from_str(DEPOSIT).unwrap(),
                value: U256::from(1u64),
                data: b"SWAPTX:abc".to_vec(),
            },
        });
        let signer = LocalKeySigner::from_secret(&"46".repeat(32)).unwrap();
        let hash = bridge.msg_hash(&raw).unwrap();
        let rsv = signer
            .sign_canonical(&hash, |rsv| bridge.is_canonical_signature(rsv))
            .unwrap();
        let signed = bridge.assemble_signed(&raw, &rsv).unwrap();
        match &signed.payload {
            SignedPayload::Evm(tx) => {
                let envelope = hex::decode(tx.raw.trim_start_matches("0x")).unwrap();
                assert_eq!(signed.tx_hash, format!("0x{}", hex::encode(keccak256(&envelope))));
            }
            #[allow(unreachable_patterns)]
            _ => panic!("expected an EVM payload"),
        }
        assert!(bridge.verify_msg_hash(&raw, &[format!("0x{}", hash)]).is_ok());
    }
}
