//! EOS adapter.
//!
//! Deposits are native `eosio.token::transfer` actions to the deposit account; release
//! transactions are transfers from the threshold-controlled account with a
//! `SWAPTX:<swap id>` memo. The chain has native finality, so stability means "at or
//! below the last irreversible block". Scanning follows the deposit account's action
//! log rather than walking blocks.
//!
//! ## Modules
//!
//! - `client` - nodeos chain and history API calls
//! - `codec` - ABI serialization of the transfer transaction
//! - `signature` - signing digest, transaction id and `SIG_K1_` encoding

pub mod client;
pub mod codec;
pub mod signature;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::bridge::{init_latest_height, Bridge, BridgeBase, ScanMode};
use crate::build::{check_balance, prepare_build_args};
use crate::error::{BridgeError, Result};
use crate::retry::{classify_error, ErrorClass};
use crate::stability::StabilityPolicy;
use crate::types::{
    AccountAction, BridgeRole, BuildTxArgs, ChainConfig, ExtraArgs, GatewayConfig, RawTx,
    ScannedBlock, SignedPayload, SignedTx, SwapInfo, SwapType, Transfer, TxRecord, TxStatus,
};
use crate::verifier::Verifier;

use client::{ChainInfo, EosClient, HistoryTransaction, PushTransaction};
use codec::{Action, Asset, Transaction, NATIVE_SYMBOL, TOKEN_CONTRACT, TRANSFER_ACTION};

pub const MAINNET_CHAIN_ID: &str = "aca376f206b8fc25a6ed44dbdc66547c36c6c33e3a119ffbeaef943642f0e906";

const DEFAULT_EXPIRATION_SECS: u32 = 120;
const MAX_NET_USAGE_WORDS: u32 = 999;
const MAX_CPU_USAGE_MS: u8 = 200;
const EXECUTED: &str = "executed";

/// Unsigned release transaction.
#[derive(Debug, Clone)]
pub struct EosRawTx {
    pub transaction: Transaction,
}

#[derive(Debug, Clone)]
pub struct EosSignedTx {
    pub transaction: Transaction,
    /// Hex of the packed transaction, as pushed to the node.
    pub packed_trx: String,
    pub signatures: Vec<String>,
}

pub struct EosBridge {
    base: BridgeBase,
    client: Option<EosClient>,
    chain_id: [u8; 32],
}

impl EosBridge {
    pub fn new(role: BridgeRole) -> Self {
        Self {
            base: BridgeBase::new(role),
            client: None,
            chain_id: [0u8; 32],
        }
    }

    fn client(&self) -> Result<&EosClient> {
        self.client
            .as_ref()
            .ok_or_else(|| BridgeError::InvalidConfig("EOS gateway not configured".into()))
    }

    #[allow(unreachable_patterns)]
    fn raw<'a>(&self, raw: &'a RawTx) -> Result<&'a EosRawTx> {
        match raw {
            RawTx::Eos(tx) => Ok(tx),
            _ => Err(BridgeError::WrongRawTx),
        }
    }

    fn packed(&self, raw: &RawTx) -> Result<Vec<u8>> {
        codec::pack_transaction(&self.raw(raw)?.transaction)
    }
}

/// Account names are exactly twelve characters of `a-z` and `1-5`.
pub fn is_account_name(name: &str) -> bool {
    name.len() == 12
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || (b'1'..=b'5').contains(&b))
}

fn parse_chain_id(network_id: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(network_id.trim())
        .map_err(|e| BridgeError::InvalidConfig(format!("EOS chain id must be hex: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| BridgeError::InvalidConfig("EOS chain id must be 32 bytes".into()))
}

/// Seconds since the epoch of a node timestamp (`2024-01-02T03:04:05.500`, UTC).
pub fn parse_block_time(s: &str) -> Result<i64> {
    NaiveDateTime::parse_from_str(s.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
        .map(|t| t.and_utc().timestamp())
        .map_err(|e| BridgeError::Encoding(format!("invalid block time {:?}: {}", s, e)))
}

/// TaPoS fields: the low 16 bits of the head height and bytes 8..12 of the head id.
pub fn tapos(info: &ChainInfo) -> Result<(u16, u32)> {
    let id = hex::decode(&info.head_block_id)?;
    if id.len() < 12 {
        return Err(BridgeError::Encoding(format!(
            "head block id too short: {}",
            info.head_block_id
        )));
    }
    let prefix = u32::from_le_bytes([id[8], id[9], id[10], id[11]]);
    Ok(((info.head_block_num & 0xffff) as u16, prefix))
}

#[derive(Deserialize)]
struct TransferJson {
    from: String,
    to: String,
    quantity: String,
    #[serde(default)]
    memo: String,
}

/// Native transfers of a history transaction.
pub fn tx_record(hash: &str, tx: &HistoryTransaction) -> Result<TxRecord> {
    let mut transfers = Vec::new();
    let mut tx_to = String::new();
    for action in tx.actions() {
        if action.account != TOKEN_CONTRACT || action.name != TRANSFER_ACTION {
            continue;
        }
        let data: TransferJson = match serde_json::from_value(action.data.clone()) {
            Ok(d) => d,
            Err(e) => {
                debug!(tx = hash, error = %e, "Undecodable transfer data");
                continue;
            }
        };
        let quantity = Asset::parse(&data.quantity)?;
        if !quantity.is_native() {
            continue;
        }
        if tx_to.is_empty() {
            tx_to = action.account.clone();
        }
        transfers.push(Transfer {
            from: data.from,
            to: data.to,
            value: quantity.value()?,
            memo: Some(data.memo),
            token: None,
        });
    }
    let timestamp = match &tx.block_time {
        Some(t) => parse_block_time(t)?.max(0) as u64,
        None => 0,
    };
    Ok(TxRecord {
        hash: hash.to_string(),
        tx_to,
        height: tx.block_num,
        timestamp,
        transfers,
    })
}

/// Inclusion status; `None` unless the receipt says executed.
pub fn tx_status(tx: &HistoryTransaction) -> Result<Option<TxStatus>> {
    if tx.receipt_status() != Some(EXECUTED) {
        return Ok(None);
    }
    let height = match tx.block_num {
        Some(h) if h > 0 => h,
        _ => return Ok(None),
    };
    let lib = tx.last_irreversible_block;
    let confirmations = lib
        .filter(|lib| *lib >= height)
        .map(|lib| lib - height + 1)
        .unwrap_or(0);
    let timestamp = match &tx.block_time {
        Some(t) => parse_block_time(t)?.max(0) as u64,
        None => 0,
    };
    Ok(Some(TxStatus {
        block_height: height,
        confirmations,
        irreversible_height: lib,
        timestamp,
    }))
}

#[async_trait]
impl Bridge for EosBridge {
    fn base(&self) -> &BridgeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BridgeBase {
        &mut self.base
    }

    fn family(&self) -> &'static str {
        "EOS"
    }

    async fn set_chain_and_gateway(&mut self, chain: ChainConfig, gateway: GatewayConfig) -> Result<()> {
        let chain_id = parse_chain_id(&chain.network_id)?;
        self.base.configure(chain.clone(), gateway.clone())?;
        let client = EosClient::new(self.base.endpoints()?.clone(), gateway.auth)?;

        let info = self
            .base
            .init_retry
            .run("get_info", |_| client.get_info(), |e| e.is_fatal())
            .await?;
        if !info.chain_id.eq_ignore_ascii_case(chain.network_id.trim()) {
            return Err(BridgeError::WrongNetwork {
                expected: chain.network_id,
                actual: info.chain_id,
            });
        }
        self.client = Some(client);
        self.chain_id = chain_id;
        init_latest_height(self).await?;
        Ok(())
    }

    fn is_valid_address(&self, address: &str) -> bool {
        is_account_name(address)
    }

    async fn check_bind_address(&self, address: &str) -> Result<()> {
        if !is_account_name(address) {
            return Err(BridgeError::WrongBindAddress(address.to_string()));
        }
        match self.client()?.get_account(address).await? {
            Some(account) if account.account_name == address => Ok(()),
            _ => Err(BridgeError::WrongBindAddress(address.to_string())),
        }
    }

    fn public_key_to_address(&self, _pubkey_hex: &str) -> Result<String> {
        Err(BridgeError::Unsupported("deriving an account name from a public key"))
    }

    async fn get_latest_block_number(&self) -> Result<u64> {
        Ok(self.client()?.get_info().await?.head_block_num)
    }

    async fn get_latest_block_number_of(&self, endpoint: &str) -> Result<u64> {
        Ok(self.client()?.get_info_at(endpoint).await?.head_block_num)
    }

    async fn get_balance(&self, account: &str) -> Result<u128> {
        let symbol = self.base.native_asset(NATIVE_SYMBOL);
        let balances = self
            .client()?
            .get_currency_balance(TOKEN_CONTRACT, account, &symbol)
            .await?;
        for balance in balances {
            let asset = Asset::parse(&balance)?;
            if asset.is_native() {
                return asset.value();
            }
        }
        Ok(0)
    }

    async fn build_raw_transaction(&self, args: &mut BuildTxArgs) -> Result<RawTx> {
        if args.swap_type == SwapType::Swapin && !self.role().is_src() {
            return Err(BridgeError::SwapTypeNotSupported);
        }
        prepare_build_args(self, args)?;
        if !is_account_name(&args.to) {
            return Err(BridgeError::InvalidArgs(format!("invalid receiver {}", args.to)));
        }

        let (extra_memo, expiration_secs) = match &args.extra {
            Some(ExtraArgs::Eos {
                memo,
                expiration_secs,
            }) => (memo.clone(), *expiration_secs),
            _ => (None, None),
        };
        let memo = match args.swap_type {
            SwapType::None => extra_memo.or_else(|| args.input.clone()).unwrap_or_default(),
            _ => args.unlock_memo(),
        };
        let value = args.value.unwrap_or(args.origin_value);
        let quantity = Asset::native(value)?;

        check_balance(value, self.get_balance(&args.from).await?)?;

        let info = self.client()?.get_info().await?;
        let (ref_block_num, ref_block_prefix) = tapos(&info)?;
        let head_time = parse_block_time(&info.head_block_time)?;
        let expiration = u32::try_from(head_time)
            .map_err(|_| BridgeError::Encoding("head block time out of range".into()))?
            .saturating_add(expiration_secs.unwrap_or(DEFAULT_EXPIRATION_SECS));

        let transaction = Transaction {
            expiration,
            ref_block_num,
            ref_block_prefix,
            max_net_usage_words: MAX_NET_USAGE_WORDS,
            max_cpu_usage_ms: MAX_CPU_USAGE_MS,
            delay_sec: 0,
            actions: vec![Action::transfer(&args.from, &args.to, quantity.clone(), memo)],
        };
        info!(
            pair_id = %args.pair_id,
            swap_id = %args.swap_id,
            swap_type = %args.swap_type,
            from = %args.from,
            to = %args.to,
            quantity = %quantity,
            "Built EOS transfer"
        );
        Ok(RawTx::Eos(EosRawTx { transaction }))
    }

    fn msg_hash(&self, raw: &RawTx) -> Result<String> {
        let packed = self.packed(raw)?;
        Ok(hex::encode(signature::sig_digest(&self.chain_id, &packed)))
    }

    fn is_canonical_signature(&self, rsv: &[u8; 65]) -> bool {
        signature::is_canonical(rsv)
    }

    fn assemble_signed(&self, raw: &RawTx, rsv: &[u8; 65]) -> Result<SignedTx> {
        let tx = self.raw(raw)?;
        let packed = codec::pack_transaction(&tx.transaction)?;
        Ok(SignedTx {
            tx_hash: signature::transaction_id(&packed),
            payload: SignedPayload::Eos(EosSignedTx {
                transaction: tx.transaction.clone(),
                packed_trx: hex::encode(packed),
                signatures: vec![signature::encode_signature(rsv)?],
            }),
        })
    }

    async fn send_transaction(&self, signed: &SignedTx) -> Result<String> {
        #[allow(unreachable_patterns)]
        let tx = match &signed.payload {
            SignedPayload::Eos(tx) => tx,
            _ => return Err(BridgeError::WrongRawTx),
        };
        let body = PushTransaction {
            signatures: &tx.signatures,
            compression: "none",
            packed_context_free_data: "",
            packed_trx: &tx.packed_trx,
        };
        let remote = match self.client()?.push_transaction(&body).await {
            Ok(id) => id,
            Err(e) if classify_error(&e.to_string()) == ErrorClass::AlreadyKnown => {
                warn!(tx_hash = %signed.tx_hash, error = %e, "Transaction already pushed");
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
        info!(tx_hash = %remote, "EOS transaction pushed");
        Ok(remote)
    }

    async fn get_transaction(&self, hash: &str) -> Result<TxRecord> {
        let tx = self.client()?.get_transaction(hash).await?;
        tx_record(hash, &tx)
    }

    async fn get_transaction_status(&self, hash: &str) -> Result<Option<TxStatus>> {
        match self.client()?.get_transaction(hash).await {
            Ok(tx) => tx_status(&tx),
            Err(BridgeError::TxNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn stability_policy(&self) -> StabilityPolicy {
        StabilityPolicy::Irreversible
    }

    async fn verify_transaction(
        &self,
        pair_id: &str,
        hash: &str,
        allow_unstable: bool,
    ) -> Result<Option<SwapInfo>> {
        if !self.role().is_src() {
            return Err(BridgeError::BridgeDestinationNotSupported);
        }
        let counterpart = self.base.counterpart()?;
        Verifier::new(self, counterpart)
            .verify(pair_id, hash, allow_unstable)
            .await
    }

    fn scan_mode(&self) -> ScanMode {
        ScanMode::AccountActions
    }

    async fn get_block_by_number(&self, height: u64) -> Result<ScannedBlock> {
        let block = self.client()?.get_block(height).await?;
        Ok(ScannedBlock {
            id: block.id,
            height: block.block_num,
            tx_hashes: block
                .transactions
                .iter()
                .filter(|t| t.status == EXECUTED)
                .map(|t| t.trx.id().to_string())
                .collect(),
        })
    }

    async fn get_account_actions(
        &self,
        account: &str,
        start_sequence: u64,
        limit: u64,
    ) -> Result<Vec<AccountAction>> {
        let entries = self
            .client()?
            .get_actions(account, start_sequence, limit)
            .await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.account_action_seq >= start_sequence)
            .map(|e| AccountAction {
                sequence: e.account_action_seq,
                tx_hash: e.action_trace.trx_id,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sign::LocalKeySigner;
    use crate::types::{TokenConfig, TokenPairConfig, TokenPairs};
    use serde_json::json;
    use std::sync::Arc;

    fn token() -> TokenConfig {
        TokenConfig {
            deposit_address: "bridgedepo11".into(),
            dcrm_address: "bridgedcrm11".into(),
            dcrm_pubkey: "02aa".into(),
            decimals: 4,
            use_bip32: false,
            token_address: None,
            min_swap: 10_000,
            max_swap: 10_000_000_000,
            big_value_threshold: 0,
            swap_fee_rate_bps: 0,
            minimum_swap_fee: 0,
            maximum_swap_fee: 0,
            initial_sequence: None,
            private_key: None,
        }
    }

    fn bridge(role: BridgeRole) -> EosBridge {
        let mut bridge = EosBridge::new(role);
        let pairs = TokenPairs::new(vec![TokenPairConfig {
            pair_id: "eos".into(),
            src_token: token(),
            dest_token: token(),
        }])
        .unwrap();
        bridge.set_token_pairs(Arc::new(pairs));
        bridge.chain_id = parse_chain_id(MAINNET_CHAIN_ID).unwrap();
        bridge
    }

    fn raw_tx() -> RawTx {
        RawTx::Eos(EosRawTx {
            transaction: Transaction {
                expiration: 1_700_000_120,
                ref_block_num: 0x1234,
                ref_block_prefix: 0xdeadbeef,
                max_net_usage_words: MAX_NET_USAGE_WORDS,
                max_cpu_usage_ms: MAX_CPU_USAGE_MS,
                delay_sec: 0,
                actions: vec![Action::transfer(
                    "bridgedcrm11",
                    "useraccount1",
                    Asset::native(1_998_000).unwrap(),
                    "SWAPTX:0xabc".into(),
                )],
            },
        })
    }

    #[test]
    fn test_account_names() {
        assert!(is_account_name("bridgedepo11"));
        assert!(is_account_name("a12345zzzzzz"));
        assert!(!is_account_name("bridgedepo1"));
        assert!(!is_account_name("bridgedepo16"));
        assert!(!is_account_name("Bridgedepo11"));
        assert!(!is_account_name("eosio.token"));
        assert!(!is_account_name("0x1111111111111111111111111111111111111111"));
    }

    #[test]
    fn test_chain_id_parsing() {
        assert!(parse_chain_id(MAINNET_CHAIN_ID).is_ok());
        assert!(matches!(
            parse_chain_id("abcd"),
            Err(BridgeError::InvalidConfig(_))
        ));
        assert!(parse_chain_id("zz").is_err());
    }

    #[test]
    fn test_block_time_and_tapos() {
        assert_eq!(parse_block_time("1970-01-01T00:01:40.500").unwrap(), 100);
        let info = ChainInfo {
            chain_id: MAINNET_CHAIN_ID.into(),
            head_block_num: 0x0001_0005,
            last_irreversible_block_num: 0,
            head_block_id: "00010005aabbccdd1122334455667788".into(),
            head_block_time: "2024-01-01T00:00:00.000".into(),
        };
        let (num, prefix) = tapos(&info).unwrap();
        assert_eq!(num, 5);
        assert_eq!(prefix, u32::from_le_bytes([0x11, 0x22, 0x33, 0x44]));
    }

    #[tokio::test]
    async fn test_swap_endpoint_rules() {
        let mut args = BuildTxArgs {
            pair_id: "eos".into(),
            swap_id: "0xabc".into(),
            swap_type: SwapType::Swapin,
            bind: "useraccount1".into(),
            origin_value: 100_000,
            ..Default::default()
        };
        assert!(matches!(
            bridge(BridgeRole::Source).build_raw_transaction(&mut args).await,
            Err(BridgeError::BuildSwapTxInWrongEndpoint)
        ));
        assert!(matches!(
            bridge(BridgeRole::Destination).build_raw_transaction(&mut args).await,
            Err(BridgeError::SwapTypeNotSupported)
        ));

        args.swap_type = SwapType::Swapout;
        assert!(matches!(
            bridge(BridgeRole::Destination).build_raw_transaction(&mut args).await,
            Err(BridgeError::BuildSwapTxInWrongEndpoint)
        ));
    }

    #[tokio::test]
    async fn test_destination_role_does_not_verify() {
        let res = bridge(BridgeRole::Destination)
            .verify_transaction("eos", "abc", false)
            .await;
        assert!(matches!(res, Err(BridgeError::BridgeDestinationNotSupported)));
    }

    #[test]
    fn test_signed_transaction_hash_and_signature() {
        let bridge = bridge(BridgeRole::Source);
        let raw = raw_tx();
        let signer = LocalKeySigner::from_secret(&"01".repeat(32)).unwrap();
        let digest = bridge.msg_hash(&raw).unwrap();
        let rsv = signer
            .sign_canonical(&digest, |rsv| bridge.is_canonical_signature(rsv))
            .unwrap();
        assert!(signature::is_canonical(&rsv));

        let signed = bridge.assemble_signed(&raw, &rsv).unwrap();
        let packed = bridge.packed(&raw).unwrap();
        assert_eq!(signed.tx_hash, signature::transaction_id(&packed));
        match signed.payload {
            SignedPayload::Eos(tx) => {
                assert_eq!(tx.packed_trx, hex::encode(&packed));
                assert_eq!(signature::decode_signature(&tx.signatures[0]).unwrap(), rsv);
            }
            #[allow(unreachable_patterns)]
            _ => panic!("expected an EOS payload"),
        }
    }

    #[test]
    fn test_msg_hash_binds_chain_id() {
        let mut other = bridge(BridgeRole::Source);
        other.chain_id = [0x11; 32];
        let raw = raw_tx();
        assert_ne!(
            bridge(BridgeRole::Source).msg_hash(&raw).unwrap(),
            other.msg_hash(&raw).unwrap()
        );
    }

    fn history(status: &str, block: u64, lib: u64) -> HistoryTransaction {
        serde_json::from_value(json!({
            "id": "abc",
            "block_num": block,
            "block_time": "2024-01-01T00:00:00.000",
            "last_irreversible_block": lib,
            "trx": {
                "receipt": { "status": status },
                "trx": { "actions": [
                    {
                        "account": "eosio.token",
                        "name": "transfer",
                        "data": { "from": "useraccount1", "to": "bridgedepo11",
                                  "quantity": "1.5000 EOS", "memo": "0x1111111111111111111111111111111111111111" }
                    },
                    {
                        "account": "fakeeostoken",
                        "name": "transfer",
                        "data": { "from": "useraccount1", "to": "bridgedepo11",
                                  "quantity": "900.0000 EOS", "memo": "x" }
                    },
                    {
                        "account": "eosio.token",
                        "name": "transfer",
                        "data": { "from": "useraccount1", "to": "bridgedepo11",
                                  "quantity": "3.0000 SYS", "memo": "x" }
                    }
                ] }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_only_native_token_transfers_count() {
        let record = tx_record("abc", &history("executed", 10, 10)).unwrap();
        assert_eq!(record.transfers.len(), 1);
        let t = &record.transfers[0];
        assert_eq!(t.from, "useraccount1");
        assert_eq!(t.value, 15_000);
        assert_eq!(record.tx_to, "eosio.token");
        assert_eq!(record.height, Some(10));
        assert_eq!(record.timestamp, 1_704_067_200);
    }

    #[test]
    fn test_status_requires_execution() {
        assert!(tx_status(&history("hard_fail", 10, 20)).unwrap().is_none());

        let status = tx_status(&history("executed", 10, 9)).unwrap().unwrap();
        assert!(!StabilityPolicy::Irreversible.is_stable(&status));

        let status = tx_status(&history("executed", 10, 12)).unwrap().unwrap();
        assert!(StabilityPolicy::Irreversible.is_stable(&status));
        assert_eq!(status.confirmations, 3);
    }
}
