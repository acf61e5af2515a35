//! EVM JSON-RPC access: alloy providers for chain state and contract reads, plain
//! JSON-RPC for transactions, receipts and blocks.

use alloy::{
    primitives::{Address, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    transports::http::{Client as AlloyClient, Http},
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::error::{BridgeError, Result};
use crate::evm::contracts::ERC20;
use crate::gateway::{json_rpc_call, EndpointSet};

/// `eth_getTransactionByHash` result (fields used by the bridge).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: String,
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    pub value: String,
    pub input: String,
    #[serde(default)]
    pub block_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl RpcReceipt {
    pub fn succeeded(&self) -> bool {
        matches!(self.status.as_deref().map(parse_quantity), Some(Ok(1)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcBlock {
    pub hash: String,
    pub number: String,
    pub timestamp: String,
    /// Transaction hashes (the block is requested without full transactions).
    #[serde(default)]
    pub transactions: Vec<String>,
}

/// The node's `pending` block; hash and number are `null` until it is sealed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcPendingBlock {
    #[serde(default)]
    pub transactions: Vec<String>,
}

/// Hex quantity (`0x1a`) as u64.
pub fn parse_quantity(s: &str) -> Result<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| BridgeError::Encoding(format!("invalid quantity {}: {}", s, e)))
}

pub fn parse_u256(s: &str) -> Result<U256> {
    let digits = s.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| BridgeError::Encoding(format!("invalid uint256 {}: {}", s, e)))
}

/// Convert an on-chain amount to base units, failing on overflow.
pub fn to_u128(value: U256) -> Result<u128> {
    u128::try_from(value).map_err(|_| BridgeError::Encoding(format!("value {} overflows u128", value)))
}

pub struct EvmClient {
    http: Client,
    endpoints: EndpointSet,
    providers: HashMap<String, RootProvider<Http<AlloyClient>>>,
}

impl EvmClient {
    pub fn new(endpoints: EndpointSet) -> Result<Self> {
        let http = Client::builder()
            .timeout(endpoints.timeout())
            .build()
            .map_err(|e| BridgeError::InvalidConfig(format!("failed to build http client: {}", e)))?;
        let mut providers = HashMap::new();
        for url in endpoints.urls() {
            let parsed: url::Url = url
                .parse()
                .map_err(|e| BridgeError::InvalidConfig(format!("invalid RPC URL {}: {}", url, e)))?;
            providers.insert(url.clone(), ProviderBuilder::new().on_http(parsed));
        }
        Ok(Self {
            http,
            endpoints,
            providers,
        })
    }

    fn provider(&self, url: &str) -> Result<&RootProvider<Http<AlloyClient>>> {
        self.providers
            .get(url.trim_end_matches('/'))
            .ok_or_else(|| BridgeError::InvalidConfig(format!("unknown endpoint {}", url)))
    }

    async fn rpc<T: DeserializeOwned>(&self, method: &'static str, params: Value) -> Result<T> {
        self.endpoints
            .race(|url| {
                let params = params.clone();
                async move { json_rpc_call(&self.http, &url, method, params).await }
            })
            .await
    }

    /// Like [`Self::rpc`] but a `null` result is an authoritative "not found".
    async fn rpc_optional<T: DeserializeOwned>(&self, method: &'static str, params: Value) -> Result<Option<T>> {
        let value: Option<Value> = self
            .endpoints
            .race(|url| {
                let params = params.clone();
                async move {
                    match json_rpc_call::<Value>(&self.http, &url, method, params).await {
                        Ok(v) if v.is_null() => Ok(None),
                        Ok(v) => Ok(Some(v)),
                        Err(BridgeError::Rpc(msg)) if msg.ends_with("empty result") => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;
        value.map(serde_json::from_value).transpose().map_err(Into::into)
    }

    pub async fn chain_id(&self) -> Result<u64> {
        self.endpoints
            .race(|url| async move {
                let provider = self.provider(&url)?;
                provider
                    .get_chain_id()
                    .await
                    .map_err(|e| BridgeError::Rpc(format!("eth_chainId: {}", e)))
            })
            .await
    }

    pub async fn block_number(&self) -> Result<u64> {
        self.endpoints
            .race(|url| async move { self.block_number_at(&url).await })
            .await
    }

    pub async fn block_number_at(&self, url: &str) -> Result<u64> {
        let provider = self.provider(url)?;
        self.endpoints
            .call_one(async {
                provider
                    .get_block_number()
                    .await
                    .map_err(|e| BridgeError::Rpc(format!("eth_blockNumber: {}", e)))
            })
            .await
    }

    pub async fn balance(&self, account: Address) -> Result<U256> {
        self.endpoints
            .race(|url| async move {
                self.provider(&url)?
                    .get_balance(account)
                    .await
                    .map_err(|e| BridgeError::Rpc(format!("eth_getBalance: {}", e)))
            })
            .await
    }

    pub async fn token_balance(&self, token: Address, account: Address) -> Result<U256> {
        self.endpoints
            .race(|url| async move {
                let contract = ERC20::new(token, self.provider(&url)?.clone());
                let balance = contract
                    .balanceOf(account)
                    .call()
                    .await
                    .map_err(|e| BridgeError::Rpc(format!("balanceOf: {}", e)))?;
                Ok(balance._0)
            })
            .await
    }

    pub async fn token_supply(&self, token: Address) -> Result<U256> {
        self.endpoints
            .race(|url| async move {
                let contract = ERC20::new(token, self.provider(&url)?.clone());
                let supply = contract
                    .totalSupply()
                    .call()
                    .await
                    .map_err(|e| BridgeError::Rpc(format!("totalSupply: {}", e)))?;
                Ok(supply._0)
            })
            .await
    }

    pub async fn pending_nonce(&self, account: Address) -> Result<u64> {
        let nonce: String = self
            .rpc("eth_getTransactionCount", json!([account.to_string(), "pending"]))
            .await?;
        parse_quantity(&nonce)
    }

    pub async fn gas_price(&self) -> Result<u128> {
        let price: String = self.rpc("eth_gasPrice", json!([])).await?;
        to_u128(parse_u256(&price)?)
    }

    pub async fn transaction(&self, hash: &str) -> Result<Option<RpcTransaction>> {
        self.rpc_optional("eth_getTransactionByHash", json!([hash]))
            .await
    }

    pub async fn receipt(&self, hash: &str) -> Result<Option<RpcReceipt>> {
        self.rpc_optional("eth_getTransactionReceipt", json!([hash]))
            .await
    }

    pub async fn block(&self, height: u64) -> Result<Option<RpcBlock>> {
        self.rpc_optional(
            "eth_getBlockByNumber",
            json!([format!("0x{:x}", height), false]),
        )
        .await
    }

    /// Transaction hashes of the node's pending block.
    pub async fn pending_block(&self) -> Result<RpcPendingBlock> {
        Ok(self
            .rpc_optional("eth_getBlockByNumber", json!(["pending", false]))
            .await?
            .unwrap_or_default())
    }

    /// Broadcast a signed envelope; returns the hash the node computed.
    pub async fn send_raw_transaction(&self, raw_hex: &str) -> Result<String> {
        self.endpoints
            .try_each(|url| async move {
                json_rpc_call(&self.http, &url, "eth_sendRawTransaction", json!([raw_hex])).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantities() {
        assert_eq!(parse_quantity("0x1a").unwrap(), 26);
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert!(parse_quantity("0xzz").is_err());
        assert_eq!(parse_u256("0x").unwrap(), U256::ZERO);
        assert_eq!(
            parse_u256("0xde0b6b3a7640000").unwrap(),
            U256::from(1_000_000_000_000_000_000u128)
        );
    }

    #[test]
    fn test_u128_overflow_is_an_error() {
        assert_eq!(to_u128(U256::from(5u64)).unwrap(), 5);
        assert!(to_u128(U256::MAX).is_err());
    }

    #[test]
    fn test_receipt_status() {
        let ok: RpcReceipt =
            serde_json::from_value(json!({ "blockNumber": "0x10", "status": "0x1" })).unwrap();
        let failed: RpcReceipt =
            serde_json::from_value(json!({ "blockNumber": "0x10", "status": "0x0" })).unwrap();
        assert!(ok.succeeded());
        assert!(!failed.succeeded());
    }

    #[test]
    fn test_pending_block_has_null_header_fields() {
        let pending: RpcPendingBlock = serde_json::from_value(json!({
            "hash": null,
            "number": null,
            "transactions": ["0xaa", "0xbb"]
        }))
        .unwrap();
        assert_eq!(pending.transactions, vec!["0xaa", "0xbb"]);
    }
}
