//! Shared data model: chain/gateway/token-pair configuration, swap records and the
//! per-family raw and signed transaction sum types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::{BridgeError, Result};
use crate::redact::Redacted;

/// Memo prefix of every release transaction; followed by the originating swap id.
pub const UNLOCK_MEMO_PREFIX: &str = "SWAPTX:";

/// Which side of a token pair a bridge instance serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeRole {
    Source,
    Destination,
}

impl BridgeRole {
    pub fn is_src(self) -> bool {
        matches!(self, BridgeRole::Source)
    }

    /// Key used for persisted scan cursors.
    pub fn as_str(self) -> &'static str {
        match self {
            BridgeRole::Source => "src",
            BridgeRole::Destination => "dst",
        }
    }
}

impl fmt::Display for BridgeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============ Chain / gateway configuration ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain family name, matched by prefix (`EOS`, `ETHEREUM`, `TERRA`, ...).
    pub blockchain: String,
    /// Expected network identity (EOS chain id, EVM chain id, Terra chain id).
    pub network_id: String,
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default)]
    pub initial_height: u64,
    #[serde(default)]
    pub enable_scan: bool,
    /// Also scan pending transactions next to the adapter's primary scan mode.
    #[serde(default)]
    pub scan_pool: bool,
    /// Asset symbol/denom treated as the transfer asset; adapters supply a default.
    #[serde(default)]
    pub native_asset: Option<String>,
}

fn default_confirmations() -> u64 {
    1
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayAuth {
    pub username: String,
    pub password: Redacted<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub api_addresses: Vec<String>,
    /// Secondary endpoints (Terra: Tendermint RPC alongside the LCD).
    #[serde(default)]
    pub ext_api_addresses: Vec<String>,
    #[serde(default)]
    pub auth: Option<GatewayAuth>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl GatewayConfig {
    pub fn new(api_addresses: Vec<String>) -> Self {
        Self {
            api_addresses,
            ext_api_addresses: Vec::new(),
            auth: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

// ============ Token pairs ============

/// One side of a token pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Address users deposit to (source side) or burn to (destination side).
    pub deposit_address: String,
    /// Address controlled by the threshold key; the sender of release transactions.
    pub dcrm_address: String,
    /// Hex-encoded root public key of the threshold key.
    pub dcrm_pubkey: String,
    #[serde(default)]
    pub decimals: u8,
    #[serde(default)]
    pub use_bip32: bool,
    /// Token contract; `None` for the chain's native asset.
    #[serde(default)]
    pub token_address: Option<String>,
    pub min_swap: u128,
    pub max_swap: u128,
    #[serde(default)]
    pub big_value_threshold: u128,
    #[serde(default)]
    pub swap_fee_rate_bps: u32,
    #[serde(default)]
    pub minimum_swap_fee: u128,
    #[serde(default)]
    pub maximum_swap_fee: u128,
    /// First action sequence to scan on action-log chains.
    #[serde(default)]
    pub initial_sequence: Option<u64>,
    /// Local signing key; tooling path only.
    #[serde(default)]
    pub private_key: Option<Redacted<String>>,
}

impl TokenConfig {
    /// Value-range check applied by the verifier.
    pub fn check_swap_value(&self, value: u128) -> bool {
        value > 0
            && value >= self.min_swap
            && value <= self.max_swap
            && value > self.minimum_swap_fee
    }

    /// Fee applied to a swap of `origin` base units, clamped to the configured bounds.
    pub fn swap_fee(&self, origin: u128) -> u128 {
        if self.swap_fee_rate_bps == 0 {
            return 0;
        }
        let mut fee = origin.saturating_mul(self.swap_fee_rate_bps as u128) / 10_000;
        if fee < self.minimum_swap_fee {
            fee = self.minimum_swap_fee;
        }
        if self.maximum_swap_fee > 0 && fee > self.maximum_swap_fee {
            fee = self.maximum_swap_fee;
        }
        fee
    }

    /// Value released on the other side for a deposit of `origin`.
    pub fn calc_swapped_value(&self, origin: u128) -> u128 {
        origin.saturating_sub(self.swap_fee(origin))
    }

    pub fn is_big_value(&self, value: u128) -> bool {
        self.big_value_threshold > 0 && value > self.big_value_threshold
    }

    pub fn validate(&self) -> Result<()> {
        if self.deposit_address.is_empty() {
            return Err(BridgeError::InvalidConfig("deposit_address cannot be empty".into()));
        }
        if self.dcrm_address.is_empty() {
            return Err(BridgeError::InvalidConfig("dcrm_address cannot be empty".into()));
        }
        if hex::decode(self.dcrm_pubkey.trim_start_matches("0x")).is_err() {
            return Err(BridgeError::InvalidConfig(
                "dcrm_pubkey must be hex encoded".into(),
            ));
        }
        if self.min_swap > self.max_swap {
            return Err(BridgeError::InvalidConfig(format!(
                "min_swap {} exceeds max_swap {}",
                self.min_swap, self.max_swap
            )));
        }
        if self.swap_fee_rate_bps > 10_000 {
            return Err(BridgeError::InvalidConfig(
                "swap_fee_rate_bps cannot exceed 10000".into(),
            ));
        }
        if self.maximum_swap_fee > 0 && self.minimum_swap_fee > self.maximum_swap_fee {
            return Err(BridgeError::InvalidConfig(
                "minimum_swap_fee exceeds maximum_swap_fee".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPairConfig {
    pub pair_id: String,
    pub src_token: TokenConfig,
    pub dest_token: TokenConfig,
}

impl TokenPairConfig {
    pub fn token(&self, role: BridgeRole) -> &TokenConfig {
        match role {
            BridgeRole::Source => &self.src_token,
            BridgeRole::Destination => &self.dest_token,
        }
    }
}

/// Read-only token pair table keyed by lower-cased pair id.
#[derive(Debug, Clone, Default)]
pub struct TokenPairs {
    pairs: HashMap<String, TokenPairConfig>,
}

impl TokenPairs {
    pub fn new(list: Vec<TokenPairConfig>) -> Result<Self> {
        let mut pairs = HashMap::with_capacity(list.len());
        for pair in list {
            let key = pair.pair_id.to_lowercase();
            if pairs.contains_key(&key) {
                return Err(BridgeError::InvalidConfig(format!(
                    "duplicate token pair id {}",
                    pair.pair_id
                )));
            }
            pair.src_token.validate()?;
            pair.dest_token.validate()?;
            pairs.insert(key, pair);
        }
        Ok(Self { pairs })
    }

    pub fn get(&self, pair_id: &str) -> Result<&TokenPairConfig> {
        self.pairs
            .get(&pair_id.to_lowercase())
            .ok_or_else(|| BridgeError::UnknownPairId(pair_id.to_string()))
    }

    pub fn token(&self, pair_id: &str, role: BridgeRole) -> Result<&TokenConfig> {
        self.get(pair_id).map(|p| p.token(role))
    }

    pub fn pair_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pairs.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

// ============ Swap records ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SwapType {
    #[default]
    None,
    Swapin,
    Swapout,
}

impl SwapType {
    /// Swap type registered for deposits seen by a bridge of `role`.
    pub fn for_role(role: BridgeRole) -> Self {
        match role {
            BridgeRole::Source => SwapType::Swapin,
            BridgeRole::Destination => SwapType::Swapout,
        }
    }
}

impl fmt::Display for SwapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SwapType::None => "none",
            SwapType::Swapin => "swapin",
            SwapType::Swapout => "swapout",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapInfo {
    pub hash: String,
    pub pair_id: String,
    pub from: String,
    pub to: String,
    pub tx_to: String,
    pub bind: String,
    pub value: u128,
    pub height: u64,
    pub timestamp: u64,
}

/// Chain-family specific build options, carried inside [`BuildTxArgs`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum ExtraArgs {
    Eos {
        #[serde(default)]
        memo: Option<String>,
        #[serde(default)]
        expiration_secs: Option<u32>,
    },
    Evm {
        #[serde(default)]
        nonce: Option<u64>,
        #[serde(default)]
        gas: Option<u64>,
        #[serde(default)]
        gas_price: Option<u128>,
    },
    Terra {
        #[serde(default)]
        sequence: Option<u64>,
        #[serde(default)]
        account_number: Option<u64>,
        #[serde(default)]
        gas: Option<u64>,
        #[serde(default)]
        fee_amount: Option<u128>,
        #[serde(default)]
        memo: Option<String>,
    },
}

/// Arguments for building a release transaction. Also serialized as the signer's
/// message context, so every field is plain data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BuildTxArgs {
    pub pair_id: String,
    pub swap_id: String,
    pub swap_type: SwapType,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub bind: String,
    #[serde(default)]
    pub origin_value: u128,
    #[serde(default)]
    pub value: Option<u128>,
    #[serde(default)]
    pub identifier: String,
    /// Hex call data (EVM) or memo text, only for non-swap transfers.
    #[serde(default)]
    pub input: Option<String>,
    /// BIP32 input code selecting a child of the root threshold key.
    #[serde(default)]
    pub input_code: Option<String>,
    #[serde(default)]
    pub extra: Option<ExtraArgs>,
}

impl BuildTxArgs {
    pub fn swapin(pair_id: &str, swap: &SwapInfo) -> Self {
        Self::for_swap(SwapType::Swapin, pair_id, swap)
    }

    pub fn swapout(pair_id: &str, swap: &SwapInfo) -> Self {
        Self::for_swap(SwapType::Swapout, pair_id, swap)
    }

    fn for_swap(swap_type: SwapType, pair_id: &str, swap: &SwapInfo) -> Self {
        Self {
            pair_id: pair_id.to_string(),
            swap_id: swap.hash.clone(),
            swap_type,
            bind: swap.bind.clone(),
            origin_value: swap.value,
            ..Default::default()
        }
    }

    /// Memo attached to a swap release.
    pub fn unlock_memo(&self) -> String {
        format!("{}{}", UNLOCK_MEMO_PREFIX, self.swap_id)
    }
}

// ============ Chain observations ============

/// Value transfer extracted from a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub from: String,
    pub to: String,
    pub value: u128,
    #[serde(default)]
    pub memo: Option<String>,
    /// Token contract; `None` for the chain's native asset.
    #[serde(default)]
    pub token: Option<String>,
}

/// Normalized view of a fetched transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub hash: String,
    /// Contract or account the transaction was addressed to.
    pub tx_to: String,
    pub height: Option<u64>,
    pub timestamp: u64,
    pub transfers: Vec<Transfer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TxStatus {
    pub block_height: u64,
    pub confirmations: u64,
    /// Last irreversible height, on chains with native finality.
    pub irreversible_height: Option<u64>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedBlock {
    pub id: String,
    pub height: u64,
    pub tx_hashes: Vec<String>,
}

/// Entry of an append-only per-account action log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountAction {
    pub sequence: u64,
    pub tx_hash: String,
}

// ============ Transactions ============

/// Unsigned transaction, one variant per chain family. Only the owning adapter
/// looks inside; any other adapter answers [`BridgeError::WrongRawTx`].
#[derive(Debug, Clone)]
pub enum RawTx {
    #[cfg(feature = "eos")]
    Eos(crate::eos::EosRawTx),
    #[cfg(feature = "evm")]
    Evm(crate::evm::EvmRawTx),
    #[cfg(feature = "terra")]
    Terra(crate::terra::TerraRawTx),
    #[cfg(any(test, feature = "testing"))]
    Mock(crate::testing::MockRawTx),
}

/// Signed transaction plus the hash computed locally before broadcast.
#[derive(Debug, Clone)]
pub struct SignedTx {
    pub tx_hash: String,
    pub payload: SignedPayload,
}

#[derive(Debug, Clone)]
pub enum SignedPayload {
    #[cfg(feature = "eos")]
    Eos(crate::eos::EosSignedTx),
    #[cfg(feature = "evm")]
    Evm(crate::evm::EvmSignedTx),
    #[cfg(feature = "terra")]
    Terra(crate::terra::TerraSignedTx),
    #[cfg(any(test, feature = "testing"))]
    Mock(crate::testing::MockSignedTx),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> TokenConfig {
        TokenConfig {
            deposit_address: "bridgedepo11".to_string(),
            dcrm_address: "bridgedcrm11".to_string(),
            dcrm_pubkey: "04ab".to_string(),
            decimals: 4,
            use_bip32: false,
            token_address: None,
            min_swap: 10_000,
            max_swap: 1_000_000_000,
            big_value_threshold: 0,
            swap_fee_rate_bps: 10,
            minimum_swap_fee: 1_000,
            maximum_swap_fee: 50_000,
            initial_sequence: None,
            private_key: None,
        }
    }

    #[test]
    fn test_check_swap_value_bounds() {
        let t = token();
        assert!(!t.check_swap_value(0));
        assert!(!t.check_swap_value(9_999));
        assert!(t.check_swap_value(10_000));
        assert!(t.check_swap_value(1_000_000_000));
        assert!(!t.check_swap_value(1_000_000_001));
    }

    #[test]
    fn test_value_must_exceed_minimum_fee() {
        let mut t = token();
        t.min_swap = 0;
        assert!(!t.check_swap_value(1_000));
        assert!(t.check_swap_value(1_001));
    }

    #[test]
    fn test_swap_fee_is_clamped() {
        let t = token();
        // 0.1% of 100_000 = 100, raised to the minimum fee
        assert_eq!(t.swap_fee(100_000), 1_000);
        // 0.1% of 10_000_000 = 10_000
        assert_eq!(t.swap_fee(10_000_000), 10_000);
        // 0.1% of 1_000_000_000 = 1_000_000, capped at the maximum fee
        assert_eq!(t.swap_fee(1_000_000_000), 50_000);
        assert_eq!(t.calc_swapped_value(10_000_000), 9_990_000);
    }

    #[test]
    fn test_zero_rate_means_no_fee() {
        let mut t = token();
        t.swap_fee_rate_bps = 0;
        assert_eq!(t.calc_swapped_value(12_345), 12_345);
    }

    #[test]
    fn test_token_pairs_lookup_is_case_insensitive() {
        let pairs = TokenPairs::new(vec![TokenPairConfig {
            pair_id: "EOS".to_string(),
            src_token: token(),
            dest_token: token(),
        }])
        .unwrap();
        assert!(pairs.get("eos").is_ok());
        assert!(pairs.get("Eos").is_ok());
        assert!(matches!(
            pairs.get("usdt"),
            Err(BridgeError::UnknownPairId(_))
        ));
    }

    #[test]
    fn test_token_pairs_rejects_duplicates_and_bad_ranges() {
        let dup = TokenPairs::new(vec![
            TokenPairConfig {
                pair_id: "eos".to_string(),
                src_token: token(),
                dest_token: token(),
            },
            TokenPairConfig {
                pair_id: "EOS".to_string(),
                src_token: token(),
                dest_token: token(),
            },
        ]);
        assert!(dup.is_err());

        let mut bad = token();
        bad.min_swap = bad.max_swap + 1;
        let res = TokenPairs::new(vec![TokenPairConfig {
            pair_id: "eos".to_string(),
            src_token: bad,
            dest_token: token(),
        }]);
        assert!(matches!(res, Err(BridgeError::InvalidConfig(_))));
    }

    #[test]
    fn test_build_args_context_is_json() {
        let swap = SwapInfo {
            hash: "abc".to_string(),
            pair_id: "eos".to_string(),
            from: "alice".to_string(),
            to: "bridgedepo11".to_string(),
            tx_to: "eosio.token".to_string(),
            bind: "0x1111111111111111111111111111111111111111".to_string(),
            value: 42,
            height: 7,
            timestamp: 0,
        };
        let args = BuildTxArgs::swapin("eos", &swap);
        assert_eq!(args.unlock_memo(), "SWAPTX:abc");
        let json = serde_json::to_value(&args).unwrap();
        assert_eq!(json["swap_type"], "swapin");
        assert_eq!(json["origin_value"], 42);
    }
}
