//! Terra LCD REST client, with optional Tendermint RPC endpoints for head height.
//!
//! Reads race across the LCD endpoints; broadcasts walk them in order.

use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tendermint_rpc::{Client as _, HttpClient, Url};
use tracing::{debug, info};

use crate::error::{BridgeError, Result};
use crate::gateway::EndpointSet;

fn string_to_u64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    let s = String::deserialize(d)?;
    s.parse().map_err(serde::de::Error::custom)
}

fn string_to_u128<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u128, D::Error> {
    let s = String::deserialize(d)?;
    s.parse().map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeInfo {
    pub network: String,
}

#[derive(Debug, Clone, Deserialize)]
struct NodeInfoResponse {
    default_node_info: NodeInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    #[serde(deserialize_with = "string_to_u64")]
    pub height: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockData {
    /// Base64 transaction bytes.
    #[serde(default)]
    pub txs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    #[serde(default)]
    pub data: BlockData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockId {
    /// Base64 block hash.
    pub hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockResponse {
    pub block_id: BlockId,
    pub block: Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountInfo {
    pub sequence: u64,
    pub account_number: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinAmount {
    pub denom: String,
    #[serde(deserialize_with = "string_to_u128")]
    pub amount: u128,
}

#[derive(Debug, Clone, Deserialize)]
struct BalanceResponse {
    balance: Option<CoinAmount>,
}

#[derive(Debug, Clone, Deserialize)]
struct SmartQueryResponse<T> {
    data: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxBody {
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub memo: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxEnvelope {
    pub body: TxBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxResponse {
    pub txhash: String,
    #[serde(deserialize_with = "string_to_u64")]
    pub height: u64,
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub raw_log: String,
    #[serde(default)]
    pub timestamp: String,
}

/// `GET /cosmos/tx/v1beta1/txs/{hash}` response.
#[derive(Debug, Clone, Deserialize)]
pub struct GetTxResponse {
    pub tx: TxEnvelope,
    pub tx_response: TxResponse,
}

#[derive(Debug, Clone, Serialize)]
struct BroadcastRequest<'a> {
    tx_bytes: &'a str,
    mode: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
struct BroadcastTxResponse {
    txhash: String,
    #[serde(default)]
    code: u32,
    #[serde(default)]
    raw_log: String,
}

#[derive(Debug, Clone, Deserialize)]
struct BroadcastResponse {
    tx_response: BroadcastTxResponse,
}

/// Sequence and account number from an auth account body. Vesting and module
/// accounts nest them under `base_account`.
pub fn parse_account(body: &Value) -> Result<AccountInfo> {
    let account = body
        .get("account")
        .ok_or_else(|| BridgeError::Rpc("missing 'account' field in response".into()))?;
    let field = |name: &str| -> Result<u64> {
        account
            .get(name)
            .or_else(|| account.get("base_account").and_then(|b| b.get(name)))
            .and_then(|v| v.as_str())
            .unwrap_or("0")
            .parse()
            .map_err(|e| BridgeError::Encoding(format!("invalid account {}: {}", name, e)))
    };
    Ok(AccountInfo {
        sequence: field("sequence")?,
        account_number: field("account_number")?,
    })
}

pub struct TerraClient {
    http: Client,
    endpoints: EndpointSet,
    rpc_endpoints: Option<EndpointSet>,
    rpc_clients: HashMap<String, HttpClient>,
}

impl TerraClient {
    pub fn new(endpoints: EndpointSet, rpc_endpoints: Option<EndpointSet>) -> Result<Self> {
        let http = Client::builder()
            .timeout(endpoints.timeout())
            .build()
            .map_err(|e| BridgeError::InvalidConfig(format!("failed to build http client: {}", e)))?;
        let mut rpc_clients = HashMap::new();
        if let Some(rpc) = &rpc_endpoints {
            for url in rpc.urls() {
                let parsed: Url = url
                    .parse()
                    .map_err(|e| BridgeError::InvalidConfig(format!("invalid RPC URL {}: {}", url, e)))?;
                let client = HttpClient::new(parsed).map_err(|e| {
                    BridgeError::InvalidConfig(format!("failed to create RPC client {}: {}", url, e))
                })?;
                rpc_clients.insert(url.clone(), client);
            }
        }
        Ok(Self {
            http,
            endpoints,
            rpc_endpoints,
            rpc_clients,
        })
    }

    /// GET `path` on one endpoint; 404 and "not found" bodies are `None`.
    async fn get<T: DeserializeOwned>(&self, url: &str, path: &str) -> Result<Option<T>> {
        let response = self.http.get(format!("{}{}", url, path)).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if status == StatusCode::NOT_FOUND || (!status.is_success() && text.contains("not found")) {
            debug!(endpoint = %url, path, %status, "LCD reports not found");
            return Ok(None);
        }
        if !status.is_success() {
            let snippet: String = text.chars().take(200).collect();
            return Err(BridgeError::Rpc(format!("{} returned HTTP {}: {}", path, status, snippet)));
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    async fn read_optional<T: DeserializeOwned>(&self, path: String) -> Result<Option<T>> {
        self.endpoints
            .race(|url| {
                let path = path.clone();
                async move { self.get::<T>(&url, &path).await }
            })
            .await
    }

    async fn read<T: DeserializeOwned>(&self, path: String) -> Result<T> {
        let what = path.clone();
        self.read_optional(path)
            .await?
            .ok_or_else(|| BridgeError::Rpc(format!("{}: not found", what)))
    }

    pub async fn node_info(&self) -> Result<NodeInfo> {
        let resp: NodeInfoResponse = self
            .read("/cosmos/base/tendermint/v1beta1/node_info".to_string())
            .await?;
        Ok(resp.default_node_info)
    }

    pub async fn latest_block(&self) -> Result<BlockResponse> {
        self.read("/cosmos/base/tendermint/v1beta1/blocks/latest".to_string())
            .await
    }

    /// Head height, from Tendermint RPC when configured, else the LCD.
    pub async fn latest_height(&self) -> Result<u64> {
        match &self.rpc_endpoints {
            Some(rpc) => {
                rpc.race(|url| async move { self.rpc_height(&url).await })
                    .await
            }
            None => Ok(self.latest_block().await?.block.header.height),
        }
    }

    /// Head height reported by one endpoint, LCD or Tendermint RPC.
    pub async fn latest_height_at(&self, url: &str) -> Result<u64> {
        let url = url.trim_end_matches('/');
        if self.rpc_clients.contains_key(url) {
            return self.endpoints.call_one(self.rpc_height(url)).await;
        }
        let block: BlockResponse = self
            .endpoints
            .call_one(self.get(url, "/cosmos/base/tendermint/v1beta1/blocks/latest"))
            .await?
            .ok_or_else(|| BridgeError::Rpc(format!("{}: no latest block", url)))?;
        Ok(block.block.header.height)
    }

    async fn rpc_height(&self, url: &str) -> Result<u64> {
        let client = self
            .rpc_clients
            .get(url)
            .ok_or_else(|| BridgeError::InvalidConfig(format!("unknown endpoint {}", url)))?;
        let status = client
            .status()
            .await
            .map_err(|e| BridgeError::Rpc(format!("status: {}", e)))?;
        Ok(status.sync_info.latest_block_height.value())
    }

    pub async fn block(&self, height: u64) -> Result<BlockResponse> {
        self.read(format!("/cosmos/base/tendermint/v1beta1/blocks/{}", height))
            .await
    }

    pub async fn account(&self, address: &str) -> Result<AccountInfo> {
        let body: Value = self
            .read(format!("/cosmos/auth/v1beta1/accounts/{}", address))
            .await?;
        parse_account(&body)
    }

    /// Bank balance of one denom; an unknown account holds nothing.
    pub async fn balance(&self, address: &str, denom: &str) -> Result<u128> {
        let resp: Option<BalanceResponse> = self
            .read_optional(format!(
                "/cosmos/bank/v1beta1/balances/{}/by_denom?denom={}",
                address, denom
            ))
            .await?;
        Ok(resp
            .and_then(|r| r.balance)
            .map(|c| c.amount)
            .unwrap_or(0))
    }

    /// CosmWasm smart query; the message travels base64 in the path.
    pub async fn query_contract<Q: Serialize, R: DeserializeOwned>(&self, contract: &str, query: &Q) -> Result<R> {
        let query_json = serde_json::to_string(query)?;
        let query_b64 = base64::engine::general_purpose::STANDARD.encode(query_json);
        let resp: SmartQueryResponse<R> = self
            .read(format!(
                "/cosmwasm/wasm/v1/contract/{}/smart/{}",
                contract, query_b64
            ))
            .await?;
        Ok(resp.data)
    }

    pub async fn tx(&self, hash: &str) -> Result<Option<GetTxResponse>> {
        self.read_optional(format!("/cosmos/tx/v1beta1/txs/{}", hash))
            .await
    }

    /// Broadcast signed bytes in sync mode; returns the hash the node computed.
    pub async fn broadcast(&self, tx_bytes: &[u8]) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(tx_bytes);
        let request = BroadcastRequest {
            tx_bytes: &encoded,
            mode: "BROADCAST_MODE_SYNC",
        };
        let body = json!(request);
        self.endpoints
            .try_each(|url| {
                let body = body.clone();
                async move {
                    let broadcast_url = format!("{}/cosmos/tx/v1beta1/txs", url);
                    info!(url = %broadcast_url, tx_bytes_len = tx_bytes.len(), "Broadcasting transaction");
                    let response = self.http.post(&broadcast_url).json(&body).send().await?;
                    let status = response.status();
                    let text = response.text().await?;
                    if !status.is_success() {
                        return Err(BridgeError::Rpc(format!("broadcast returned HTTP {}: {}", status, text)));
                    }
                    let resp: BroadcastResponse = serde_json::from_str(&text)?;
                    if resp.tx_response.code != 0 {
                        return Err(BridgeError::Rpc(format!(
                            "broadcast failed (code {}): {}",
                            resp.tx_response.code, resp.tx_response.raw_log
                        )));
                    }
                    Ok(resp.tx_response.txhash)
                }
            })
            .await
    }
}
