//! In-Memory Chain
//!
//! A [`Bridge`] over a process-local ledger. Deposits create blocks, the head can be
//! advanced by hand, and fetch failures can be injected, so scanner and verifier
//! behavior is testable without a node.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::bridge::{Bridge, BridgeBase, ScanMode};
use crate::build::{check_balance, prepare_build_args};
use crate::error::{BridgeError, Result};
use crate::redact::Redacted;
use crate::sign::is_low_s;
use crate::types::{
    AccountAction, BridgeRole, BuildTxArgs, ChainConfig, GatewayConfig, RawTx, ScannedBlock,
    SignedPayload, SignedTx, TokenConfig, TokenPairConfig, TokenPairs, Transfer, TxRecord,
    TxStatus,
};

const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
const BLOCK_INTERVAL_SECS: u64 = 5;

/// Unsigned mock transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockRawTx {
    pub from: String,
    pub to: String,
    pub value: u128,
    pub memo: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockSignedTx {
    pub raw: MockRawTx,
    pub rsv: String,
}

/// A native transfer to submit to a [`MockChain`].
#[derive(Debug, Clone)]
pub struct MockDeposit {
    pub from: String,
    /// `None` sends to the chain's deposit address of the default pair.
    pub to: Option<String>,
    pub value: u128,
    pub memo: Option<String>,
}

impl MockDeposit {
    pub fn new(value: u128, memo: Option<&str>) -> Self {
        Self {
            from: MockChain::DEFAULT_SENDER.to_string(),
            to: None,
            value,
            memo: memo.map(String::from),
        }
    }

    pub fn to(mut self, address: &str) -> Self {
        self.to = Some(address.to_string());
        self
    }

    pub fn sender(mut self, address: &str) -> Self {
        self.from = address.to_string();
        self
    }
}

struct MockTx {
    record: TxRecord,
    /// `None` while the transaction sits in the pool.
    height: Option<u64>,
}

struct ChainState {
    latest: u64,
    blocks: BTreeMap<u64, Vec<String>>,
    txs: HashMap<String, MockTx>,
    pending: Vec<String>,
    actions: HashMap<String, Vec<String>>,
    rejected_binds: HashSet<String>,
    tx_fetches: HashMap<String, usize>,
    block_fetches: usize,
    failing_block_fetches: u32,
    failing_heights: HashMap<u64, u32>,
    failing_latest: u32,
    failing_status: u32,
    balances: HashMap<String, u128>,
    sent: Vec<MockSignedTx>,
    tx_counter: u64,
    scan_mode: ScanMode,
}

pub struct MockChain {
    base: BridgeBase,
    state: Mutex<ChainState>,
}

impl MockChain {
    pub const DEFAULT_SENDER: &'static str = "mock_alice";
    pub const PAIR_ID: &'static str = "usdt";
    pub const NETWORK_ID: &'static str = "mock";
    /// Local key configured on both sides of the default pair.
    pub const PRIVATE_KEY: &'static str =
        "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    pub const INITIAL_BALANCE: u128 = 1_000_000_000_000;

    pub fn new(role: BridgeRole, confirmations: u64) -> Self {
        Self::with_chain(role, Self::chain_config(confirmations))
    }

    pub fn chain_config(confirmations: u64) -> ChainConfig {
        ChainConfig {
            blockchain: "MOCK".to_string(),
            network_id: Self::NETWORK_ID.to_string(),
            confirmations,
            initial_height: 0,
            enable_scan: true,
            scan_pool: false,
            native_asset: None,
        }
    }

    pub fn with_chain(role: BridgeRole, chain: ChainConfig) -> Self {
        let mut base = BridgeBase::new(role);
        base.set_chain(chain);
        let mut blocks = BTreeMap::new();
        blocks.insert(0, Vec::new());
        Self {
            base,
            state: Mutex::new(ChainState {
                latest: 0,
                blocks,
                txs: HashMap::new(),
                pending: Vec::new(),
                actions: HashMap::new(),
                rejected_binds: HashSet::new(),
                tx_fetches: HashMap::new(),
                block_fetches: 0,
                failing_block_fetches: 0,
                failing_heights: HashMap::new(),
                failing_latest: 0,
                failing_status: 0,
                balances: HashMap::new(),
                sent: Vec::new(),
                tx_counter: 0,
                scan_mode: ScanMode::Blocks,
            }),
        }
    }

    /// Token config of one side of the default pair.
    pub fn default_token(role: BridgeRole) -> TokenConfig {
        TokenConfig {
            deposit_address: format!("mock_{}_deposit", role),
            dcrm_address: format!("mock_{}_dcrm", role),
            dcrm_pubkey: "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5"
                .to_string(),
            decimals: 6,
            use_bip32: false,
            token_address: None,
            min_swap: 1_000,
            max_swap: 100_000_000_000,
            big_value_threshold: 0,
            swap_fee_rate_bps: 10,
            minimum_swap_fee: 100,
            maximum_swap_fee: 1_000_000,
            initial_sequence: None,
            private_key: Some(Redacted(Self::PRIVATE_KEY.to_string())),
        }
    }

    pub fn default_pairs() -> TokenPairs {
        TokenPairs::new(vec![TokenPairConfig {
            pair_id: Self::PAIR_ID.to_string(),
            src_token: Self::default_token(BridgeRole::Source),
            dest_token: Self::default_token(BridgeRole::Destination),
        }])
        .unwrap_or_default()
    }

    /// Source and destination chains sharing the default pair, cross-linked.
    pub fn wired_pair(confirmations: u64) -> (Arc<MockChain>, Arc<MockChain>) {
        Self::wired_pair_with(Self::chain_config(confirmations))
    }

    /// Like [`Self::wired_pair`], with `chain` on both sides.
    pub fn wired_pair_with(chain: ChainConfig) -> (Arc<MockChain>, Arc<MockChain>) {
        let pairs = Arc::new(Self::default_pairs());
        let mut src = MockChain::with_chain(BridgeRole::Source, chain.clone());
        let mut dst = MockChain::with_chain(BridgeRole::Destination, chain);
        src.base.set_token_pairs(pairs.clone());
        dst.base.set_token_pairs(pairs);
        for chain in [&src, &dst] {
            let dcrm = format!("mock_{}_dcrm", chain.role());
            chain.set_balance(&dcrm, Self::INITIAL_BALANCE);
        }

        let src = Arc::new(src);
        let dst = Arc::new(dst);
        let src_dyn: Arc<dyn Bridge> = src.clone();
        let dst_dyn: Arc<dyn Bridge> = dst.clone();
        src.set_destination(&dst_dyn);
        dst.set_destination(&src_dyn);
        (src, dst)
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn next_hash(state: &mut ChainState, role: BridgeRole) -> String {
        state.tx_counter += 1;
        hex::encode(Sha256::digest(format!("mock:{}:{}", role, state.tx_counter)))
    }

    fn default_deposit_address(&self) -> String {
        self.base
            .token(Self::PAIR_ID)
            .map(|t| t.deposit_address.clone())
            .unwrap_or_default()
    }

    /// Submit one deposit in a new block. Returns the transaction hash.
    pub fn deposit(&self, deposit: MockDeposit) -> String {
        self.deposit_many(vec![deposit]).remove(0)
    }

    /// Submit several deposits in one new block.
    pub fn deposit_many(&self, deposits: Vec<MockDeposit>) -> Vec<String> {
        let default_to = self.default_deposit_address();
        let role = self.role();
        let mut state = self.state();
        let height = state.latest + 1;
        let timestamp = GENESIS_TIMESTAMP + height * BLOCK_INTERVAL_SECS;
        let mut hashes = Vec::with_capacity(deposits.len());
        for d in deposits {
            let hash = Self::next_hash(&mut state, role);
            let to = d.to.clone().unwrap_or_else(|| default_to.clone());
            let record = Self::deposit_record(&hash, d, &to, Some(height), timestamp);
            state.txs.insert(hash.clone(), MockTx { record, height: Some(height) });
            state.actions.entry(to).or_default().push(hash.clone());
            hashes.push(hash);
        }
        state.blocks.insert(height, hashes.clone());
        state.latest = height;
        hashes
    }

    /// Submit a deposit to the pool without producing a block.
    pub fn submit_pending(&self, deposit: MockDeposit) -> String {
        let default_to = self.default_deposit_address();
        let role = self.role();
        let mut state = self.state();
        let hash = Self::next_hash(&mut state, role);
        let to = deposit.to.clone().unwrap_or(default_to);
        let record = Self::deposit_record(&hash, deposit, &to, None, 0);
        state.txs.insert(hash.clone(), MockTx { record, height: None });
        state.pending.push(hash.clone());
        hash
    }

    /// Include every pooled transaction in a new block.
    pub fn mine_pending(&self) -> u64 {
        let mut state = self.state();
        let height = state.latest + 1;
        let timestamp = GENESIS_TIMESTAMP + height * BLOCK_INTERVAL_SECS;
        let hashes = std::mem::take(&mut state.pending);
        for hash in &hashes {
            if let Some(tx) = state.txs.get_mut(hash) {
                tx.height = Some(height);
                tx.record.height = Some(height);
                tx.record.timestamp = timestamp;
            }
            let to = state.txs.get(hash).map(|tx| tx.record.tx_to.clone());
            if let Some(to) = to {
                state.actions.entry(to).or_default().push(hash.clone());
            }
        }
        state.blocks.insert(height, hashes);
        state.latest = height;
        height
    }

    fn deposit_record(hash: &str, d: MockDeposit, to: &str, height: Option<u64>, timestamp: u64) -> TxRecord {
        TxRecord {
            hash: hash.to_string(),
            tx_to: to.to_string(),
            height,
            timestamp,
            transfers: vec![Transfer {
                from: d.from,
                to: to.to_string(),
                value: d.value,
                memo: d.memo,
                token: None,
            }],
        }
    }

    /// Produce `n` empty blocks.
    pub fn advance_blocks(&self, n: u64) {
        let mut state = self.state();
        for _ in 0..n {
            let height = state.latest + 1;
            state.blocks.insert(height, Vec::new());
            state.latest = height;
        }
    }

    pub fn latest(&self) -> u64 {
        self.state().latest
    }

    /// Make `check_bind_address` refuse `address`.
    pub fn reject_bind(&self, address: &str) {
        self.state().rejected_binds.insert(address.to_lowercase());
    }

    pub fn set_balance(&self, account: &str, value: u128) {
        self.state().balances.insert(account.to_string(), value);
    }

    pub fn set_scan_mode(&self, mode: ScanMode) {
        self.state().scan_mode = mode;
    }

    /// Fail the next `n` block fetches with an RPC error.
    pub fn fail_block_fetches(&self, n: u32) {
        self.state().failing_block_fetches = n;
    }

    /// Fail the next `n` fetches of block `height` only.
    pub fn fail_block_fetches_at(&self, height: u64, n: u32) {
        self.state().failing_heights.insert(height, n);
    }

    /// Fail the next `n` transaction status queries with an RPC error.
    pub fn fail_status_queries(&self, n: u32) {
        self.state().failing_status = n;
    }

    /// Fail the next `n` head-height queries with an RPC error.
    pub fn fail_latest(&self, n: u32) {
        self.state().failing_latest = n;
    }

    pub fn get_transaction_calls(&self, hash: &str) -> usize {
        self.state().tx_fetches.get(hash).copied().unwrap_or(0)
    }

    pub fn block_fetches(&self) -> usize {
        self.state().block_fetches
    }

    pub fn sent_transactions(&self) -> Vec<MockSignedTx> {
        self.state().sent.clone()
    }

    #[allow(unreachable_patterns)]
    fn raw<'a>(&self, raw: &'a RawTx) -> Result<&'a MockRawTx> {
        match raw {
            RawTx::Mock(tx) => Ok(tx),
            _ => Err(BridgeError::WrongRawTx),
        }
    }
}

#[async_trait]
impl Bridge for MockChain {
    fn base(&self) -> &BridgeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BridgeBase {
        &mut self.base
    }

    fn family(&self) -> &'static str {
        "MOCK"
    }

    async fn set_chain_and_gateway(&mut self, chain: ChainConfig, gateway: GatewayConfig) -> Result<()> {
        if chain.network_id != Self::NETWORK_ID {
            return Err(BridgeError::WrongNetwork {
                expected: chain.network_id,
                actual: Self::NETWORK_ID.to_string(),
            });
        }
        self.base.configure(chain, gateway)
    }

    fn is_valid_address(&self, address: &str) -> bool {
        if let Some(name) = address.strip_prefix("mock_") {
            return !name.is_empty();
        }
        address.len() == 42
            && address.starts_with("0x")
            && address[2..].chars().all(|c| c.is_ascii_hexdigit())
    }

    async fn check_bind_address(&self, address: &str) -> Result<()> {
        if self.state().rejected_binds.contains(&address.to_lowercase()) || !self.is_valid_address(address) {
            return Err(BridgeError::WrongBindAddress(address.to_string()));
        }
        Ok(())
    }

    fn public_key_to_address(&self, pubkey_hex: &str) -> Result<String> {
        let bytes = hex::decode(pubkey_hex.trim_start_matches("0x"))?;
        let digest = Sha256::digest(bytes);
        Ok(format!("mock_{}", hex::encode(&digest[..8])))
    }

    async fn get_latest_block_number(&self) -> Result<u64> {
        let mut state = self.state();
        if state.failing_latest > 0 {
            state.failing_latest -= 1;
            return Err(BridgeError::Rpc("mock head unavailable".into()));
        }
        Ok(state.latest)
    }

    async fn get_latest_block_number_of(&self, _endpoint: &str) -> Result<u64> {
        Ok(self.state().latest)
    }

    async fn get_balance(&self, account: &str) -> Result<u128> {
        Ok(self.state().balances.get(account).copied().unwrap_or(0))
    }

    async fn build_raw_transaction(&self, args: &mut BuildTxArgs) -> Result<RawTx> {
        prepare_build_args(self, args)?;
        let value = args.value.unwrap_or(args.origin_value);
        check_balance(value, self.get_balance(&args.from).await?)?;
        let memo = if args.swap_type == crate::types::SwapType::None {
            args.input.clone().unwrap_or_default()
        } else {
            args.unlock_memo()
        };
        Ok(RawTx::Mock(MockRawTx {
            from: args.from.clone(),
            to: args.to.clone(),
            value,
            memo,
        }))
    }

    fn msg_hash(&self, raw: &RawTx) -> Result<String> {
        let tx = self.raw(raw)?;
        Ok(hex::encode(Sha256::digest(serde_json::to_vec(tx)?)))
    }

    fn is_canonical_signature(&self, rsv: &[u8; 65]) -> bool {
        is_low_s(rsv)
    }

    fn assemble_signed(&self, raw: &RawTx, rsv: &[u8; 65]) -> Result<SignedTx> {
        let tx = self.raw(raw)?;
        let mut hasher = Sha256::new();
        hasher.update(self.msg_hash(raw)?.as_bytes());
        hasher.update(rsv);
        Ok(SignedTx {
            tx_hash: hex::encode(hasher.finalize()),
            payload: SignedPayload::Mock(MockSignedTx {
                raw: tx.clone(),
                rsv: hex::encode(rsv),
            }),
        })
    }

    async fn send_transaction(&self, signed: &SignedTx) -> Result<String> {
        #[allow(unreachable_patterns)]
        let tx = match &signed.payload {
            SignedPayload::Mock(tx) => tx.clone(),
            _ => return Err(BridgeError::WrongRawTx),
        };
        let mut state = self.state();
        let height = state.latest + 1;
        let record = TxRecord {
            hash: signed.tx_hash.clone(),
            tx_to: tx.raw.to.clone(),
            height: Some(height),
            timestamp: GENESIS_TIMESTAMP + height * BLOCK_INTERVAL_SECS,
            transfers: vec![Transfer {
                from: tx.raw.from.clone(),
                to: tx.raw.to.clone(),
                value: tx.raw.value,
                memo: Some(tx.raw.memo.clone()),
                token: None,
            }],
        };
        let balance = state.balances.entry(tx.raw.from.clone()).or_insert(0);
        *balance = balance.saturating_sub(tx.raw.value);
        state.txs.insert(signed.tx_hash.clone(), MockTx { record, height: Some(height) });
        state.blocks.insert(height, vec![signed.tx_hash.clone()]);
        state.latest = height;
        state.sent.push(tx);
        Ok(signed.tx_hash.clone())
    }

    async fn get_transaction(&self, hash: &str) -> Result<TxRecord> {
        let mut state = self.state();
        *state.tx_fetches.entry(hash.to_string()).or_insert(0) += 1;
        state
            .txs
            .get(hash)
            .map(|tx| tx.record.clone())
            .ok_or_else(|| BridgeError::TxNotFound(hash.to_string()))
    }

    async fn get_transaction_status(&self, hash: &str) -> Result<Option<TxStatus>> {
        let mut state = self.state();
        if state.failing_status > 0 {
            state.failing_status -= 1;
            return Err(BridgeError::Rpc("mock status unavailable".into()));
        }
        let latest = state.latest;
        Ok(state.txs.get(hash).and_then(|tx| {
            let height = tx.height?;
            Some(TxStatus {
                block_height: height,
                confirmations: latest.saturating_sub(height) + 1,
                irreversible_height: None,
                timestamp: tx.record.timestamp,
            })
        }))
    }

    fn scan_mode(&self) -> ScanMode {
        self.state().scan_mode
    }

    async fn get_block_by_number(&self, height: u64) -> Result<ScannedBlock> {
        let mut state = self.state();
        state.block_fetches += 1;
        if state.failing_block_fetches > 0 {
            state.failing_block_fetches -= 1;
            return Err(BridgeError::Rpc(format!("mock block {} unavailable", height)));
        }
        if let Some(n) = state.failing_heights.get_mut(&height).filter(|n| **n > 0) {
            *n -= 1;
            return Err(BridgeError::Rpc(format!("mock block {} unavailable", height)));
        }
        let txs = state
            .blocks
            .get(&height)
            .cloned()
            .ok_or_else(|| BridgeError::Rpc(format!("block {} not produced yet", height)))?;
        Ok(ScannedBlock {
            id: format!("mockblock-{}-{}", self.role(), height),
            height,
            tx_hashes: txs,
        })
    }

    async fn get_account_actions(
        &self,
        account: &str,
        start_sequence: u64,
        limit: u64,
    ) -> Result<Vec<AccountAction>> {
        let state = self.state();
        let Some(log) = state.actions.get(account) else {
            return Ok(Vec::new());
        };
        Ok(log
            .iter()
            .enumerate()
            .skip(start_sequence as usize)
            .take(limit as usize)
            .map(|(seq, hash)| AccountAction {
                sequence: seq as u64,
                tx_hash: hash.clone(),
            })
            .collect())
    }

    async fn pending_transactions(&self) -> Result<Vec<String>> {
        Ok(self.state().pending.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deposit_creates_block() {
        let (src, _dst) = MockChain::wired_pair(1);
        let hashes = src.deposit_many(vec![
            MockDeposit::new(5_000, Some("mock_bob")),
            MockDeposit::new(6_000, Some("mock_carol")),
        ]);
        assert_eq!(src.latest(), 1);
        let block = src.get_block_by_number(1).await.unwrap();
        assert_eq!(block.tx_hashes, hashes);
        assert_ne!(hashes[0], hashes[1]);

        let record = src.get_transaction(&hashes[0]).await.unwrap();
        assert_eq!(record.transfers[0].to, "mock_src_deposit");
    }

    #[tokio::test]
    async fn test_confirmations_grow_with_head() {
        let (src, _dst) = MockChain::wired_pair(1);
        let hash = src.deposit(MockDeposit::new(5_000, None));
        src.advance_blocks(4);
        let status = src.get_transaction_status(&hash).await.unwrap().unwrap();
        assert_eq!(status.block_height, 1);
        assert_eq!(status.confirmations, 5);
        assert!(src.get_transaction_status("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_deposit_has_no_status_until_mined() {
        let (src, _dst) = MockChain::wired_pair(1);
        let hash = src.submit_pending(MockDeposit::new(5_000, Some("mock_bob")));
        assert_eq!(src.pending_transactions().await.unwrap(), vec![hash.clone()]);
        assert!(src.get_transaction(&hash).await.unwrap().height.is_none());
        assert!(src.get_transaction_status(&hash).await.unwrap().is_none());

        let height = src.mine_pending();
        assert!(src.pending_transactions().await.unwrap().is_empty());
        let status = src.get_transaction_status(&hash).await.unwrap().unwrap();
        assert_eq!(status.block_height, height);
        let block = src.get_block_by_number(height).await.unwrap();
        assert_eq!(block.tx_hashes, vec![hash]);
    }

    #[tokio::test]
    async fn test_account_actions_page() {
        let (src, _dst) = MockChain::wired_pair(1);
        for _ in 0..3 {
            src.deposit(MockDeposit::new(5_000, None));
        }
        let page = src
            .get_account_actions("mock_src_deposit", 1, 10)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].sequence, 1);
    }

    #[tokio::test]
    async fn test_local_signing_path() {
        let (_src, dst) = MockChain::wired_pair(1);
        let mut args = BuildTxArgs {
            pair_id: "usdt".into(),
            swap_id: "feed".into(),
            swap_type: crate::types::SwapType::Swapin,
            bind: "mock_bob".into(),
            origin_value: 50_000,
            ..Default::default()
        };
        let raw = dst.build_raw_transaction(&mut args).await.unwrap();
        let signed = dst.sign_transaction(&raw, "usdt").await.unwrap();
        let hash = dst.send_transaction(&signed).await.unwrap();
        assert_eq!(hash, signed.tx_hash);

        let sent = dst.sent_transactions();
        assert_eq!(sent[0].raw.to, "mock_bob");
        assert_eq!(sent[0].raw.memo, "SWAPTX:feed");
        assert_eq!(sent[0].raw.value, 49_900);
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let (_src, dst) = MockChain::wired_pair(1);
        dst.set_balance("mock_dst_dcrm", 10);
        let mut args = BuildTxArgs {
            pair_id: "usdt".into(),
            swap_id: "feed".into(),
            swap_type: crate::types::SwapType::Swapin,
            bind: "mock_bob".into(),
            origin_value: 50_000,
            ..Default::default()
        };
        assert!(matches!(
            dst.build_raw_transaction(&mut args).await,
            Err(BridgeError::InsufficientBalance { .. })
        ));
    }
}
