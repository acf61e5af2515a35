//! Terra adapter.
//!
//! Deposits are bank sends of the native denom (or CW20 `transfer` executions) to the
//! deposit address, with the bind address as the transaction memo. Releases are
//! direct-mode transactions signed with the threshold key and broadcast through the
//! LCD. Tendermint RPC endpoints, when configured, answer head-height queries.
//!
//! ## Modules
//!
//! - `client` - LCD REST and Tendermint RPC access
//! - `tx` - sign doc construction, `TxRaw` assembly and CW20 messages

pub mod client;
pub mod tx;

use async_trait::async_trait;
use base64::Engine;
use bech32::FromBase32;
use chrono::DateTime;
use serde_json::Value;
use sha2::{Digest, Sha256};
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

use client::{GetTxResponse, TerraClient};
use tx::{
    Cw20BalanceResponse, Cw20QueryMsg, Cw20TokenInfoResponse, TxParams, UnsignedTx,
    ACCOUNT_PREFIX,
};

pub const DEFAULT_DENOM: &str = "uluna";

const MSG_SEND: &str = "/cosmos.bank.v1beta1.MsgSend";
const MSG_EXECUTE_CONTRACT: &str = "/cosmwasm.wasm.v1.MsgExecuteContract";

const NATIVE_TRANSFER_GAS: u64 = 200_000;
const CW20_TRANSFER_GAS: u64 = 300_000;
/// Minimum gas price in thousandths of a micro-unit (28.325 uluna per gas).
const GAS_PRICE_MILLI: u128 = 28_325;

#[derive(Debug, Clone)]
pub struct TerraRawTx {
    pub tx: UnsignedTx,
}

#[derive(Debug, Clone)]
pub struct TerraSignedTx {
    pub tx_bytes: Vec<u8>,
}

pub struct TerraBridge {
    base: BridgeBase,
    client: Option<TerraClient>,
}

impl TerraBridge {
    pub fn new(role: BridgeRole) -> Self {
        Self {
            base: BridgeBase::new(role),
            client: None,
        }
    }

    fn client(&self) -> Result<&TerraClient> {
        self.client
            .as_ref()
            .ok_or_else(|| BridgeError::InvalidConfig("Terra gateway not configured".into()))
    }

    #[allow(unreachable_patterns)]
    fn raw<'a>(&self, raw: &'a RawTx) -> Result<&'a TerraRawTx> {
        match raw {
            RawTx::Terra(tx) => Ok(tx),
            _ => Err(BridgeError::WrongRawTx),
        }
    }

    fn denom(&self) -> String {
        self.base.native_asset(DEFAULT_DENOM)
    }
}

/// Bech32 account or contract address with the `terra` prefix.
pub fn is_terra_address(address: &str) -> bool {
    match bech32::decode(address) {
        Ok((hrp, data, _variant)) => {
            hrp == ACCOUNT_PREFIX
                && Vec::<u8>::from_base32(&data)
                    .map(|bytes| bytes.len() == 20 || bytes.len() == 32)
                    .unwrap_or(false)
        }
        Err(_) => false,
    }
}

/// Fee in the native denom for `gas` units at the minimum gas price, rounded up.
pub fn fee_for_gas(gas: u64) -> u128 {
    (gas as u128 * GAS_PRICE_MILLI).div_ceil(1000)
}

fn parse_amount(s: &str) -> Result<u128> {
    s.parse()
        .map_err(|e| BridgeError::Encoding(format!("invalid amount {:?}: {}", s, e)))
}

fn parse_timestamp(s: &str) -> u64 {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.timestamp().max(0) as u64)
        .unwrap_or(0)
}

/// Execute message bytes; the LCD renders them as a JSON object or as base64.
fn contract_msg(msg: &Value) -> Option<Value> {
    match msg {
        Value::String(encoded) => {
            let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
            serde_json::from_slice(&bytes).ok()
        }
        other => Some(other.clone()),
    }
}

/// Transfers of a fetched transaction: native-denom bank sends and CW20 `transfer`
/// executions. The transaction memo is the memo of each.
pub fn tx_record(resp: &GetTxResponse, denom: &str) -> Result<TxRecord> {
    let memo = Some(resp.tx.body.memo.trim().to_string()).filter(|m| !m.is_empty());
    let mut transfers = Vec::new();
    let mut tx_to = String::new();

    for msg in &resp.tx.body.messages {
        match msg.get("@type").and_then(Value::as_str) {
            Some(MSG_SEND) => {
                let from = msg.get("from_address").and_then(Value::as_str).unwrap_or_default();
                let to = msg.get("to_address").and_then(Value::as_str).unwrap_or_default();
                if tx_to.is_empty() {
                    tx_to = to.to_string();
                }
                let coins = msg.get("amount").and_then(Value::as_array);
                for c in coins.into_iter().flatten() {
                    if c.get("denom").and_then(Value::as_str) != Some(denom) {
                        continue;
                    }
                    let amount = c.get("amount").and_then(Value::as_str).unwrap_or("0");
                    transfers.push(Transfer {
                        from: from.to_string(),
                        to: to.to_string(),
                        value: parse_amount(amount)?,
                        memo: memo.clone(),
                        token: None,
                    });
                }
            }
            Some(MSG_EXECUTE_CONTRACT) => {
                let sender = msg.get("sender").and_then(Value::as_str).unwrap_or_default();
                let contract = msg.get("contract").and_then(Value::as_str).unwrap_or_default();
                if tx_to.is_empty() {
                    tx_to = contract.to_string();
                }
                let Some(body) = msg.get("msg").and_then(contract_msg) else {
                    continue;
                };
                let Some(transfer) = body.get("transfer") else {
                    continue;
                };
                let recipient = transfer.get("recipient").and_then(Value::as_str);
                let amount = transfer.get("amount").and_then(Value::as_str);
                if let (Some(recipient), Some(amount)) = (recipient, amount) {
                    transfers.push(Transfer {
                        from: sender.to_string(),
                        to: recipient.to_string(),
                        value: parse_amount(amount)?,
                        memo: memo.clone(),
                        token: Some(contract.to_string()),
                    });
                }
            }
            _ => {}
        }
    }

    Ok(TxRecord {
        hash: resp.tx_response.txhash.clone(),
        tx_to,
        height: Some(resp.tx_response.height).filter(|h| *h > 0),
        timestamp: parse_timestamp(&resp.tx_response.timestamp),
        transfers,
    })
}

#[async_trait]
impl Bridge for TerraBridge {
    fn base(&self) -> &BridgeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BridgeBase {
        &mut self.base
    }

    fn family(&self) -> &'static str {
        "TERRA"
    }

    async fn set_chain_and_gateway(&mut self, chain: ChainConfig, gateway: GatewayConfig) -> Result<()> {
        let expected = chain.network_id.trim().to_string();
        if expected.is_empty() {
            return Err(BridgeError::InvalidConfig("Terra chain id cannot be empty".into()));
        }
        self.base.configure(chain, gateway)?;
        let client = TerraClient::new(
            self.base.endpoints()?.clone(),
            self.base.ext_endpoints().cloned(),
        )?;

        let node = self
            .base
            .init_retry
            .run("node_info", |_| client.node_info(), |e| e.is_fatal())
            .await?;
        if node.network != expected {
            return Err(BridgeError::WrongNetwork {
                expected,
                actual: node.network,
            });
        }
        self.client = Some(client);
        init_latest_height(self).await?;
        Ok(())
    }

    fn is_valid_address(&self, address: &str) -> bool {
        is_terra_address(address)
    }

    fn public_key_to_address(&self, pubkey_hex: &str) -> Result<String> {
        let key = tx::public_key_from_hex(pubkey_hex)?;
        key.account_id(ACCOUNT_PREFIX)
            .map(|id| id.to_string())
            .map_err(|e| BridgeError::Encoding(format!("failed to derive account id: {}", e)))
    }

    async fn get_latest_block_number(&self) -> Result<u64> {
        self.client()?.latest_height().await
    }

    async fn get_latest_block_number_of(&self, endpoint: &str) -> Result<u64> {
        self.client()?.latest_height_at(endpoint).await
    }

    async fn get_balance(&self, account: &str) -> Result<u128> {
        self.client()?.balance(account, &self.denom()).await
    }

    async fn get_token_balance(&self, token: &str, account: &str) -> Result<u128> {
        let resp: Cw20BalanceResponse = self
            .client()?
            .query_contract(
                token,
                &Cw20QueryMsg::Balance {
                    address: account.to_string(),
                },
            )
            .await?;
        parse_amount(&resp.balance)
    }

    async fn get_token_supply(&self, token: &str) -> Result<u128> {
        let resp: Cw20TokenInfoResponse = self
            .client()?
            .query_contract(token, &Cw20QueryMsg::TokenInfo {})
            .await?;
        parse_amount(&resp.total_supply)
    }

    async fn build_raw_transaction(&self, args: &mut BuildTxArgs) -> Result<RawTx> {
        let token = prepare_build_args(self, args)?;
        let from = tx::parse_account_id(&args.from)?;
        let to = tx::parse_account_id(&args.to)?;
        let value = args.value.unwrap_or(args.origin_value);
        let denom = self.denom();

        let (sequence, account_number, gas, fee_amount, extra_memo) = match &args.extra {
            Some(ExtraArgs::Terra {
                sequence,
                account_number,
                gas,
                fee_amount,
                memo,
            }) => (*sequence, *account_number, *gas, *fee_amount, memo.clone()),
            _ => (None, None, None, None, None),
        };
        let memo = match args.swap_type {
            SwapType::None => extra_memo.or_else(|| args.input.clone()).unwrap_or_default(),
            _ => args.unlock_memo(),
        };

        let (msg, default_gas) = match &token.token_address {
            Some(contract) => {
                let contract = tx::parse_account_id(contract)?;
                (tx::cw20_transfer(&from, &contract, &to, value)?, CW20_TRANSFER_GAS)
            }
            None => (tx::bank_send(&from, &to, &denom, value)?, NATIVE_TRANSFER_GAS),
        };
        let gas = gas.unwrap_or(default_gas);
        let fee = fee_amount.unwrap_or_else(|| fee_for_gas(gas));

        let native = self.get_balance(&args.from).await?;
        match &token.token_address {
            Some(contract) => {
                check_balance(fee, native)?;
                check_balance(value, self.get_token_balance(contract, &args.from).await?)?;
            }
            None => check_balance(value.saturating_add(fee), native)?,
        }

        let (sequence, account_number) = match (sequence, account_number) {
            (Some(s), Some(n)) => (s, n),
            (s, n) => {
                let account = self.client()?.account(&args.from).await?;
                (s.unwrap_or(account.sequence), n.unwrap_or(account.account_number))
            }
        };

        let chain_id = self.base.chain()?.network_id.trim().to_string();
        let unsigned = tx::build_unsigned(
            msg,
            &memo,
            TxParams {
                public_key: tx::public_key_from_hex(&token.dcrm_pubkey)?,
                chain_id: &chain_id,
                account_number,
                sequence,
                gas,
                fee: tx::coin(&denom, fee)?,
            },
        )?;
        info!(
            pair_id = %args.pair_id,
            swap_id = %args.swap_id,
            swap_type = %args.swap_type,
            from = %args.from,
            to = %args.to,
            value = %value,
            sequence,
            account_number,
            "Built Terra transaction"
        );
        Ok(RawTx::Terra(TerraRawTx { tx: unsigned }))
    }

    fn msg_hash(&self, raw: &RawTx) -> Result<String> {
        Ok(hex::encode(self.raw(raw)?.tx.sign_digest()))
    }

    fn is_canonical_signature(&self, rsv: &[u8; 65]) -> bool {
        is_low_s(rsv)
    }

    fn assemble_signed(&self, raw: &RawTx, rsv: &[u8; 65]) -> Result<SignedTx> {
        let tx_bytes = self.raw(raw)?.tx.encode_signed(rsv)?;
        Ok(SignedTx {
            tx_hash: tx::tx_hash(&tx_bytes),
            payload: SignedPayload::Terra(TerraSignedTx { tx_bytes }),
        })
    }

    async fn send_transaction(&self, signed: &SignedTx) -> Result<String> {
        #[allow(unreachable_patterns)]
        let tx = match &signed.payload {
            SignedPayload::Terra(tx) => tx,
            _ => return Err(BridgeError::WrongRawTx),
        };
        let remote = match self.client()?.broadcast(&tx.tx_bytes).await {
            Ok(hash) => hash,
            Err(e) if classify_error(&e.to_string()) == ErrorClass::AlreadyKnown => {
                warn!(tx_hash = %signed.tx_hash, error = %e, "Transaction already in mempool");
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
        info!(tx_hash = %remote, "Terra transaction broadcast");
        Ok(remote)
    }

    async fn get_transaction(&self, hash: &str) -> Result<TxRecord> {
        let resp = self
            .client()?
            .tx(hash)
            .await?
            .ok_or_else(|| BridgeError::TxNotFound(hash.to_string()))?;
        tx_record(&resp, &self.denom())
    }

    async fn get_transaction_status(&self, hash: &str) -> Result<Option<TxStatus>> {
        let client = self.client()?;
        let resp = match client.tx(hash).await? {
            Some(resp) if resp.tx_response.code == 0 && resp.tx_response.height > 0 => resp,
            _ => return Ok(None),
        };
        let height = resp.tx_response.height;
        let latest = client.latest_height().await?;
        Ok(Some(TxStatus {
            block_height: height,
            confirmations: latest.saturating_sub(height) + 1,
            irreversible_height: None,
            timestamp: parse_timestamp(&resp.tx_response.timestamp),
        }))
    }

    async fn get_block_by_number(&self, height: u64) -> Result<ScannedBlock> {
        let resp = self.client()?.block(height).await?;
        let engine = base64::engine::general_purpose::STANDARD;
        let id = hex::encode_upper(
            engine
                .decode(&resp.block_id.hash)
                .map_err(|e| BridgeError::Encoding(format!("invalid block hash: {}", e)))?,
        );
        let tx_hashes = resp
            .block
            .data
            .txs
            .iter()
            .map(|encoded| {
                engine
                    .decode(encoded)
                    .map(|bytes| hex::encode_upper(Sha256::digest(bytes)))
                    .map_err(|e| BridgeError::Encoding(format!("invalid block tx: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ScannedBlock {
            id,
            height: resp.block.header.height,
            tx_hashes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sign::LocalKeySigner;
    use crate::types::{TokenConfig, TokenPairConfig, TokenPairs};
    use serde_json::json;
    use std::sync::Arc;

    const DEPOSIT: &str = "terra1x46rqay4d3cssq8gxxvqz8xt6nwlz4td20k38v";

    fn terra_address(byte: u8) -> String {
        use bech32::ToBase32;
        bech32::encode(ACCOUNT_PREFIX, [byte; 20].to_base32(), bech32::Variant::Bech32).unwrap()
    }

    fn get_tx(messages: Value, memo: &str, code: u32) -> GetTxResponse {
        serde_json::from_value(json!({
            "tx": { "body": { "messages": messages, "memo": memo } },
            "tx_response": {
                "txhash": "AB12",
                "height": "1500",
                "code": code,
                "raw_log": "",
                "timestamp": "2024-01-01T00:00:00Z"
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_address_validation() {
        let bridge = TerraBridge::new(BridgeRole::Destination);
        assert!(bridge.is_valid_address(&terra_address(7)));
        assert!(!bridge.is_valid_address("cosmos1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu"));
        assert!(!bridge.is_valid_address("0x1111111111111111111111111111111111111111"));
        assert!(!bridge.is_valid_address("terra1notbech32"));
    }

    #[test]
    fn test_public_key_to_address_formats_agree() {
        let bridge = TerraBridge::new(BridgeRole::Destination);
        let signer = LocalKeySigner::from_secret(&"46".repeat(32)).unwrap();
        let compressed = bridge
            .public_key_to_address(&signer.public_key_hex(true))
            .unwrap();
        let uncompressed = bridge
            .public_key_to_address(&signer.public_key_hex(false))
            .unwrap();
        assert_eq!(compressed, uncompressed);
        assert!(bridge.is_valid_address(&compressed));
    }

    #[test]
    fn test_fee_rounds_up() {
        assert_eq!(fee_for_gas(200_000), 5_665_000);
        assert_eq!(fee_for_gas(1), 29);
        assert_eq!(fee_for_gas(0), 0);
    }

    #[test]
    fn test_bank_send_record() {
        let resp = get_tx(
            json!([{
                "@type": MSG_SEND,
                "from_address": "terra1sender",
                "to_address": DEPOSIT,
                "amount": [
                    { "denom": "uusd", "amount": "999" },
                    { "denom": "uluna", "amount": "2500000" }
                ]
            }]),
            " 0x1111111111111111111111111111111111111111 ",
            0,
        );
        let record = tx_record(&resp, DEFAULT_DENOM).unwrap();
        assert_eq!(record.height, Some(1500));
        assert_eq!(record.timestamp, 1_704_067_200);
        assert_eq!(record.transfers.len(), 1);
        let t = &record.transfers[0];
        assert_eq!(t.value, 2_500_000);
        assert_eq!(t.to, DEPOSIT);
        assert_eq!(
            t.memo.as_deref(),
            Some("0x1111111111111111111111111111111111111111")
        );
        assert_eq!(t.token, None);
    }

    #[test]
    fn test_cw20_transfer_record_accepts_base64_msg() {
        let inner = json!({ "transfer": { "recipient": DEPOSIT, "amount": "77" } });
        let encoded = base64::engine::general_purpose::STANDARD.encode(inner.to_string());
        for msg in [inner.clone(), Value::String(encoded)] {
            let resp = get_tx(
                json!([{
                    "@type": MSG_EXECUTE_CONTRACT,
                    "sender": "terra1sender",
                    "contract": "terra1token",
                    "msg": msg,
                    "funds": []
                }]),
                "0xbind",
                0,
            );
            let record = tx_record(&resp, DEFAULT_DENOM).unwrap();
            assert_eq!(record.tx_to, "terra1token");
            assert_eq!(record.transfers.len(), 1);
            assert_eq!(record.transfers[0].token.as_deref(), Some("terra1token"));
            assert_eq!(record.transfers[0].value, 77);
        }
    }

    #[test]
    fn test_empty_memo_is_none() {
        let resp = get_tx(
            json!([{
                "@type": MSG_SEND,
                "from_address": "terra1sender",
                "to_address": DEPOSIT,
                "amount": [{ "denom": "uluna", "amount": "1" }]
            }]),
            "   ",
            0,
        );
        assert_eq!(tx_record(&resp, DEFAULT_DENOM).unwrap().transfers[0].memo, None);
    }

    fn token() -> TokenConfig {
        let signer = LocalKeySigner::from_secret(&"46".repeat(32)).unwrap();
        TokenConfig {
            deposit_address: terra_address(1),
            dcrm_address: terra_address(2),
            dcrm_pubkey: signer.public_key_hex(true),
            decimals: 6,
            use_bip32: false,
            token_address: None,
            min_swap: 1,
            max_swap: u128::MAX,
            big_value_threshold: 0,
            swap_fee_rate_bps: 0,
            minimum_swap_fee: 0,
            maximum_swap_fee: 0,
            initial_sequence: None,
            private_key: None,
        }
    }

    #[test]
    fn test_assembled_hash_is_sha256_of_bytes() {
        let mut bridge = TerraBridge::new(BridgeRole::Destination);
        bridge.set_token_pairs(Arc::new(
            TokenPairs::new(vec![TokenPairConfig {
                pair_id: "luna".into(),
                src_token: token(),
                dest_token: token(),
            }])
            .unwrap(),
        ));
        let from = tx::parse_account_id(&terra_address(2)).unwrap();
        let to = tx::parse_account_id(&terra_address(3)).unwrap();
        let unsigned = tx::build_unsigned(
            tx::bank_send(&from, &to, DEFAULT_DENOM, 10).unwrap(),
            "SWAPTX:abc",
            TxParams {
                public_key: tx::public_key_from_hex(&token().dcrm_pubkey).unwrap(),
                chain_id: "localterra",
                account_number: 1,
                sequence: 0,
                gas: NATIVE_TRANSFER_GAS,
                fee: tx::coin(DEFAULT_DENOM, fee_for_gas(NATIVE_TRANSFER_GAS)).unwrap(),
            },
        )
        .unwrap();
        let raw = RawTx::Terra(TerraRawTx { tx: unsigned });

        let signer = LocalKeySigner::from_secret(&"46".repeat(32)).unwrap();
        let hash = bridge.msg_hash(&raw).unwrap();
        let rsv = signer
            .sign_canonical(&hash, |rsv| bridge.is_canonical_signature(rsv))
            .unwrap();
        let signed = bridge.assemble_signed(&raw, &rsv).unwrap();
        match &signed.payload {
            SignedPayload::Terra(tx) => {
                assert_eq!(signed.tx_hash, hex::encode_upper(Sha256::digest(&tx.tx_bytes)));
            }
            #[allow(unreachable_patterns)]
            _ => panic!("expected a Terra payload"),
        }
        assert!(bridge.verify_msg_hash(&raw, &[hash.to_uppercase()]).is_ok());
    }
}
