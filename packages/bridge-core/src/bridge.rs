//! The bridge capability contract and adapter construction.
//!
//! A [`Bridge`] is one chain adapter serving one side ([`BridgeRole`]) of the configured
//! token pairs. Everything downstream of [`new_cross_chain_bridge`] holds only
//! `Arc<dyn Bridge>`; the chain family is decided once, here.

use async_trait::async_trait;
use std::sync::{Arc, RwLock, Weak};
use tracing::{info, warn};

use crate::error::{BridgeError, Result};
use crate::gateway::EndpointSet;
use crate::retry::RetryPolicy;
use crate::sign::local::LocalKeySigner;
use crate::sign::SignCoordinator;
use crate::stability::StabilityPolicy;
use crate::types::{
    AccountAction, BuildTxArgs, ChainConfig, GatewayConfig, RawTx, ScannedBlock, SignedTx,
    SwapInfo, TokenConfig, TokenPairs, TxRecord, TxStatus,
};
use crate::verifier::Verifier;

pub use crate::types::BridgeRole;

/// How the scanner discovers candidate transactions on a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Walk blocks by height.
    Blocks,
    /// Page through the deposit account's append-only action log.
    AccountActions,
    /// Poll the node's pending transactions only.
    Pool,
}

/// State every adapter carries: role, configuration, endpoints, token pairs and the
/// bridge serving the other side of each pair.
pub struct BridgeBase {
    pub role: BridgeRole,
    chain: Option<ChainConfig>,
    gateway: Option<GatewayConfig>,
    endpoints: Option<EndpointSet>,
    ext_endpoints: Option<EndpointSet>,
    token_pairs: Arc<TokenPairs>,
    counterpart: RwLock<Option<Weak<dyn Bridge>>>,
    /// Retry used for one-time initialization reads (network id, current height).
    pub init_retry: RetryPolicy,
}

impl BridgeBase {
    pub fn new(role: BridgeRole) -> Self {
        Self {
            role,
            chain: None,
            gateway: None,
            endpoints: None,
            ext_endpoints: None,
            token_pairs: Arc::new(TokenPairs::default()),
            counterpart: RwLock::new(None),
            init_retry: RetryPolicy::forever(std::time::Duration::from_secs(3)),
        }
    }

    /// Store chain and gateway configuration and build the endpoint sets.
    pub fn configure(&mut self, chain: ChainConfig, gateway: GatewayConfig) -> Result<()> {
        let timeout = gateway.timeout();
        let endpoints = EndpointSet::new(&gateway.api_addresses, timeout)?;
        let ext_endpoints = if gateway.ext_api_addresses.is_empty() {
            None
        } else {
            Some(EndpointSet::new(&gateway.ext_api_addresses, timeout)?)
        };
        self.chain = Some(chain);
        self.gateway = Some(gateway);
        self.endpoints = Some(endpoints);
        self.ext_endpoints = ext_endpoints;
        Ok(())
    }

    /// Chain configuration without gateway endpoints (in-process chains).
    pub fn set_chain(&mut self, chain: ChainConfig) {
        self.chain = Some(chain);
    }

    pub fn chain(&self) -> Result<&ChainConfig> {
        self.chain
            .as_ref()
            .ok_or_else(|| BridgeError::InvalidConfig("chain config not set".into()))
    }

    pub fn gateway(&self) -> Result<&GatewayConfig> {
        self.gateway
            .as_ref()
            .ok_or_else(|| BridgeError::InvalidConfig("gateway config not set".into()))
    }

    pub fn endpoints(&self) -> Result<&EndpointSet> {
        self.endpoints
            .as_ref()
            .ok_or_else(|| BridgeError::InvalidConfig("gateway config not set".into()))
    }

    pub fn ext_endpoints(&self) -> Option<&EndpointSet> {
        self.ext_endpoints.as_ref()
    }

    pub fn token_pairs(&self) -> &Arc<TokenPairs> {
        &self.token_pairs
    }

    pub fn set_token_pairs(&mut self, pairs: Arc<TokenPairs>) {
        self.token_pairs = pairs;
    }

    /// This side's token config of `pair_id`.
    pub fn token(&self, pair_id: &str) -> Result<&TokenConfig> {
        self.token_pairs.token(pair_id, self.role)
    }

    pub fn set_counterpart(&self, other: &Arc<dyn Bridge>) {
        let mut slot = self
            .counterpart
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(Arc::downgrade(other));
    }

    pub fn counterpart(&self) -> Result<Arc<dyn Bridge>> {
        let slot = self
            .counterpart
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| BridgeError::InvalidConfig("counterpart bridge not set".into()))
    }

    /// Native asset of the chain, falling back to the adapter default.
    pub fn native_asset(&self, default: &str) -> String {
        self.chain
            .as_ref()
            .and_then(|c| c.native_asset.clone())
            .unwrap_or_else(|| default.to_string())
    }
}

/// Capability set every chain adapter provides.
#[async_trait]
pub trait Bridge: Send + Sync {
    fn base(&self) -> &BridgeBase;
    fn base_mut(&mut self) -> &mut BridgeBase;

    /// Chain family name, for logs.
    fn family(&self) -> &'static str;

    fn role(&self) -> BridgeRole {
        self.base().role
    }

    /// Validate network identity against the gateway and run one-time initialization.
    /// A mismatch is [`BridgeError::WrongNetwork`].
    async fn set_chain_and_gateway(&mut self, chain: ChainConfig, gateway: GatewayConfig) -> Result<()>;

    fn set_token_pairs(&mut self, pairs: Arc<TokenPairs>) {
        self.base_mut().set_token_pairs(pairs);
    }

    /// Wire the bridge serving the other side of every pair (the destination of a
    /// source bridge and vice versa).
    fn set_destination(&self, other: &Arc<dyn Bridge>) {
        self.base().set_counterpart(other);
    }

    // ---- addresses ----

    fn is_valid_address(&self, address: &str) -> bool;

    /// Bind-address validation used when this bridge is the receiving side of a swap.
    async fn check_bind_address(&self, address: &str) -> Result<()> {
        if self.is_valid_address(address) {
            Ok(())
        } else {
            Err(BridgeError::WrongBindAddress(address.to_string()))
        }
    }

    fn public_key_to_address(&self, pubkey_hex: &str) -> Result<String>;

    /// Account-model chains have no per-deposit input code.
    fn get_bip32_input_code(&self, _address: &str) -> Result<String> {
        Ok(String::new())
    }

    // ---- chain state ----

    async fn get_latest_block_number(&self) -> Result<u64>;
    async fn get_latest_block_number_of(&self, endpoint: &str) -> Result<u64>;

    async fn get_balance(&self, account: &str) -> Result<u128>;

    async fn get_token_balance(&self, _token: &str, _account: &str) -> Result<u128> {
        Err(BridgeError::Unsupported("token balance"))
    }

    async fn get_token_supply(&self, _token: &str) -> Result<u128> {
        Err(BridgeError::Unsupported("token supply"))
    }

    // ---- release transactions ----

    async fn build_raw_transaction(&self, args: &mut BuildTxArgs) -> Result<RawTx>;

    /// Hex digest handed to the signer for `raw`.
    fn msg_hash(&self, raw: &RawTx) -> Result<String>;

    /// Canonical-form predicate on a 65-byte `r || s || v` signature.
    fn is_canonical_signature(&self, _rsv: &[u8; 65]) -> bool {
        true
    }

    /// Attach a signature to `raw`, computing the transaction hash locally.
    fn assemble_signed(&self, raw: &RawTx, rsv: &[u8; 65]) -> Result<SignedTx>;

    async fn dcrm_sign_transaction(
        &self,
        coordinator: &SignCoordinator,
        raw: &RawTx,
        args: &BuildTxArgs,
    ) -> Result<SignedTx> {
        coordinator.sign_transaction(self, raw, args).await
    }

    /// Local-key path for tooling. Produces the same signed shape as the threshold path.
    async fn sign_transaction(&self, raw: &RawTx, pair_id: &str) -> Result<SignedTx> {
        let token = self.base().token(pair_id)?;
        let secret = token.private_key.as_ref().ok_or_else(|| {
            BridgeError::InvalidConfig(format!("no private key configured for pair {}", pair_id))
        })?;
        let signer = LocalKeySigner::from_secret(secret.expose())?;
        let msg_hash = self.msg_hash(raw)?;
        let rsv = signer.sign_canonical(&msg_hash, |rsv| self.is_canonical_signature(rsv))?;
        self.assemble_signed(raw, &rsv)
    }

    async fn send_transaction(&self, signed: &SignedTx) -> Result<String>;

    // ---- verification ----

    async fn get_transaction(&self, hash: &str) -> Result<TxRecord>;

    /// `None` while the transaction is unknown or not executed.
    async fn get_transaction_status(&self, hash: &str) -> Result<Option<TxStatus>>;

    fn verify_msg_hash(&self, raw: &RawTx, hashes: &[String]) -> Result<()> {
        if hashes.len() != 1 {
            return Err(BridgeError::WrongCountOfMsgHashes(hashes.len()));
        }
        let local = self.msg_hash(raw)?;
        let given = hashes[0].trim_start_matches("0x");
        if !local.trim_start_matches("0x").eq_ignore_ascii_case(given) {
            return Err(BridgeError::MsgHashMismatch {
                local,
                given: hashes[0].clone(),
            });
        }
        Ok(())
    }

    fn stability_policy(&self) -> StabilityPolicy {
        let confirmations = self.base().chain().map(|c| c.confirmations).unwrap_or(1);
        StabilityPolicy::Confirmations(confirmations)
    }

    async fn verify_transaction(
        &self,
        pair_id: &str,
        hash: &str,
        allow_unstable: bool,
    ) -> Result<Option<SwapInfo>> {
        let counterpart = self.base().counterpart()?;
        Verifier::new(self, counterpart)
            .verify(pair_id, hash, allow_unstable)
            .await
    }

    // ---- scanner inputs ----

    fn scan_mode(&self) -> ScanMode {
        ScanMode::Blocks
    }

    async fn get_block_by_number(&self, _height: u64) -> Result<ScannedBlock> {
        Err(BridgeError::Unsupported("block scanning"))
    }

    async fn get_account_actions(
        &self,
        _account: &str,
        _start_sequence: u64,
        _limit: u64,
    ) -> Result<Vec<AccountAction>> {
        Err(BridgeError::Unsupported("account action log"))
    }

    /// Hashes of transactions the node holds but has not yet included in a block.
    async fn pending_transactions(&self) -> Result<Vec<String>> {
        Err(BridgeError::Unsupported("pending transaction pool"))
    }
}

/// Read the current height during initialization, retrying per `base.init_retry`.
pub async fn init_latest_height<B: Bridge + ?Sized>(bridge: &B) -> Result<u64> {
    let height = bridge
        .base()
        .init_retry
        .run(
            "get_latest_block_number",
            |_| bridge.get_latest_block_number(),
            |e| e.is_fatal(),
        )
        .await?;
    info!(
        family = bridge.family(),
        role = %bridge.role(),
        height,
        "Bridge initialized at current height"
    );
    Ok(height)
}

/// Construct the adapter for `blockchain` by chain-family prefix.
pub fn new_cross_chain_bridge(blockchain: &str, role: BridgeRole) -> Result<Box<dyn Bridge>> {
    let family = blockchain.trim().to_uppercase();

    #[cfg(feature = "eos")]
    if family.starts_with("EOS") {
        return Ok(Box::new(crate::eos::EosBridge::new(role)));
    }

    #[cfg(feature = "evm")]
    if ["ETH", "FUSION", "EVM"].iter().any(|p| family.starts_with(p)) {
        return Ok(Box::new(crate::evm::EvmBridge::new(role)));
    }

    #[cfg(feature = "terra")]
    if ["TERRA", "COSMOS"].iter().any(|p| family.starts_with(p)) {
        return Ok(Box::new(crate::terra::TerraBridge::new(role)));
    }

    let _ = role;
    Err(BridgeError::InvalidConfig(format!(
        "unsupported blockchain: {}",
        blockchain
    )))
}

/// Configuration of one side of the bridge.
#[derive(Debug, Clone)]
pub struct BridgeSideConfig {
    pub chain: ChainConfig,
    pub gateway: GatewayConfig,
}

/// The source and destination bridges wired to each other.
#[derive(Clone)]
pub struct CrossChainBridges {
    pub src: Arc<dyn Bridge>,
    pub dst: Arc<dyn Bridge>,
    pub token_pairs: Arc<TokenPairs>,
}

impl CrossChainBridges {
    /// Construct and initialize both sides: destination first, then the source.
    /// Any error here is a configuration error and should end the process.
    pub async fn init(
        src: BridgeSideConfig,
        dst: BridgeSideConfig,
        token_pairs: TokenPairs,
    ) -> Result<Self> {
        let pairs = Arc::new(token_pairs);

        let mut dst_bridge = new_cross_chain_bridge(&dst.chain.blockchain, BridgeRole::Destination)?;
        dst_bridge.set_chain_and_gateway(dst.chain, dst.gateway).await?;

        let mut src_bridge = new_cross_chain_bridge(&src.chain.blockchain, BridgeRole::Source)?;
        src_bridge.set_chain_and_gateway(src.chain, src.gateway).await?;

        Self::wire(src_bridge, dst_bridge, pairs)
    }

    /// Install token pairs, validate each side's static addresses and cross-link the
    /// two bridges.
    pub fn wire(
        mut src: Box<dyn Bridge>,
        mut dst: Box<dyn Bridge>,
        pairs: Arc<TokenPairs>,
    ) -> Result<Self> {
        src.set_token_pairs(pairs.clone());
        dst.set_token_pairs(pairs.clone());

        for pair_id in pairs.pair_ids() {
            let pair = pairs.get(&pair_id)?;
            validate_token_addresses(src.as_ref(), &pair_id, &pair.src_token)?;
            validate_token_addresses(dst.as_ref(), &pair_id, &pair.dest_token)?;
        }

        let src: Arc<dyn Bridge> = Arc::from(src);
        let dst: Arc<dyn Bridge> = Arc::from(dst);
        src.set_destination(&dst);
        dst.set_destination(&src);

        info!(
            src = src.family(),
            dst = dst.family(),
            pairs = pairs.len(),
            "Cross-chain bridges initialized"
        );
        Ok(Self {
            src,
            dst,
            token_pairs: pairs,
        })
    }
}

fn validate_token_addresses(bridge: &dyn Bridge, pair_id: &str, token: &TokenConfig) -> Result<()> {
    for (field, addr) in [
        ("deposit_address", &token.deposit_address),
        ("dcrm_address", &token.dcrm_address),
    ] {
        if !bridge.is_valid_address(addr) {
            warn!(pair_id, field, address = %addr, family = bridge.family(), "Invalid static address");
            return Err(BridgeError::InvalidConfig(format!(
                "pair {}: {} {} is not a valid {} address",
                pair_id,
                field,
                addr,
                bridge.family()
            )));
        }
    }
    Ok(())
}
