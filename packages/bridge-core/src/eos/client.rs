//! EOS nodeos HTTP API client (chain and history plugins).
//!
//! Every call is a JSON `POST /v1/<plugin>/<method>`. Reads race across the configured
//! endpoints; `push_transaction` walks them in order.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::gateway::EndpointSet;
use crate::types::GatewayAuth;

/// API error names meaning "the thing you asked for does not exist".
const NOT_FOUND_ERRORS: &[&str] = &[
    "unknown_key",
    "account_query_exception",
    "tx_not_found",
    "unknown_block_exception",
];

#[derive(Debug, Clone, Deserialize)]
pub struct ChainInfo {
    pub chain_id: String,
    pub head_block_num: u64,
    pub last_irreversible_block_num: u64,
    pub head_block_id: String,
    pub head_block_time: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    pub account_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TrxRef {
    /// Deferred transactions appear as a bare id.
    Id(String),
    Full { id: String },
}

impl TrxRef {
    pub fn id(&self) -> &str {
        match self {
            TrxRef::Id(id) => id,
            TrxRef::Full { id } => id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockTransaction {
    #[serde(default)]
    pub status: String,
    pub trx: TrxRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockInfo {
    pub id: String,
    pub block_num: u64,
    #[serde(default)]
    pub transactions: Vec<BlockTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionTrace {
    pub trx_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionEntry {
    pub account_action_seq: u64,
    pub action_trace: ActionTrace,
}

#[derive(Debug, Clone, Deserialize)]
struct ActionsResponse {
    #[serde(default)]
    actions: Vec<ActionEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Receipt {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryAction {
    pub account: String,
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryTrxBody {
    #[serde(default)]
    pub actions: Vec<HistoryAction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryTrx {
    #[serde(default)]
    pub receipt: Option<Receipt>,
    #[serde(default)]
    pub trx: Option<HistoryTrxBody>,
}

/// `history/get_transaction` response.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryTransaction {
    pub id: String,
    #[serde(default)]
    pub trx: Option<HistoryTrx>,
    #[serde(default)]
    pub block_num: Option<u64>,
    #[serde(default)]
    pub block_time: Option<String>,
    #[serde(default)]
    pub last_irreversible_block: Option<u64>,
}

impl HistoryTransaction {
    pub fn receipt_status(&self) -> Option<&str> {
        self.trx
            .as_ref()
            .and_then(|t| t.receipt.as_ref())
            .map(|r| r.status.as_str())
    }

    pub fn actions(&self) -> &[HistoryAction] {
        self.trx
            .as_ref()
            .and_then(|t| t.trx.as_ref())
            .map(|b| b.actions.as_slice())
            .unwrap_or(&[])
    }
}

/// Body of `chain/push_transaction`.
#[derive(Debug, Clone, Serialize)]
pub struct PushTransaction<'a> {
    pub signatures: &'a [String],
    pub compression: &'static str,
    pub packed_context_free_data: &'static str,
    pub packed_trx: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct PushResponse {
    transaction_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ApiErrorMessage {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    name: String,
    #[serde(default)]
    what: String,
    #[serde(default)]
    details: Vec<ApiErrorMessage>,
}

/// Error body nodeos returns with a non-2xx status.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
    #[serde(default)]
    error: ApiErrorDetail,
}

impl ApiError {
    fn from_body(status: reqwest::StatusCode, body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| ApiError {
            code: status.as_u16(),
            message: body.chars().take(200).collect(),
            error: ApiErrorDetail::default(),
        })
    }

    pub fn is_not_found(&self) -> bool {
        NOT_FOUND_ERRORS.contains(&self.error.name.as_str())
    }

    pub fn into_error(self, method: &str) -> BridgeError {
        let detail = self
            .error
            .details
            .first()
            .map(|d| d.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or(self.error.what);
        BridgeError::Rpc(format!(
            "{}: {} {} {}: {}",
            method, self.code, self.message, self.error.name, detail
        ))
    }
}

type Reply<T> = std::result::Result<T, ApiError>;

pub struct EosClient {
    http: Client,
    endpoints: EndpointSet,
    auth: Option<GatewayAuth>,
}

impl EosClient {
    pub fn new(endpoints: EndpointSet, auth: Option<GatewayAuth>) -> Result<Self> {
        let http = Client::builder()
            .timeout(endpoints.timeout())
            .build()
            .map_err(|e| BridgeError::InvalidConfig(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            http,
            endpoints,
            auth,
        })
    }

    async fn post<T: DeserializeOwned>(&self, url: &str, path: &str, body: &Value) -> Result<Reply<T>> {
        let mut request = self.http.post(format!("{}{}", url, path)).json(body);
        if let Some(auth) = &self.auth {
            request = request.basic_auth(&auth.username, Some(auth.password.expose()));
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            debug!(endpoint = %url, path, %status, "Node returned an API error");
            return Ok(Err(ApiError::from_body(status, &text)));
        }
        Ok(Ok(serde_json::from_str(&text)?))
    }

    /// Race a read; API errors count as endpoint failures.
    async fn read<T: DeserializeOwned>(&self, path: &'static str, body: Value) -> Result<T> {
        self.endpoints
            .race(|url| {
                let body = body.clone();
                async move {
                    self.post::<T>(&url, path, &body)
                        .await?
                        .map_err(|e| e.into_error(path))
                }
            })
            .await
    }

    /// Race a read where "not found" is an authoritative answer.
    async fn read_optional<T: DeserializeOwned>(&self, path: &'static str, body: Value) -> Result<Option<T>> {
        self.endpoints
            .race(|url| {
                let body = body.clone();
                async move {
                    match self.post::<T>(&url, path, &body).await? {
                        Ok(value) => Ok(Some(value)),
                        Err(e) if e.is_not_found() => Ok(None),
                        Err(e) => Err(e.into_error(path)),
                    }
                }
            })
            .await
    }

    pub async fn get_info(&self) -> Result<ChainInfo> {
        self.read("/v1/chain/get_info", json!({})).await
    }

    /// `get_info` against one specific endpoint.
    pub async fn get_info_at(&self, url: &str) -> Result<ChainInfo> {
        let path = "/v1/chain/get_info";
        self.endpoints
            .call_one(async {
                self.post::<ChainInfo>(url.trim_end_matches('/'), path, &json!({}))
                    .await?
                    .map_err(|e| e.into_error(path))
            })
            .await
    }

    pub async fn get_block(&self, height: u64) -> Result<BlockInfo> {
        self.read("/v1/chain/get_block", json!({ "block_num_or_id": height }))
            .await
    }

    pub async fn get_account(&self, name: &str) -> Result<Option<AccountInfo>> {
        self.read_optional("/v1/chain/get_account", json!({ "account_name": name }))
            .await
    }

    /// Balances of `account` in `symbol` issued by `code`, in display form.
    pub async fn get_currency_balance(&self, code: &str, account: &str, symbol: &str) -> Result<Vec<String>> {
        let balances: Option<Vec<String>> = self
            .read_optional(
                "/v1/chain/get_currency_balance",
                json!({ "code": code, "account": account, "symbol": symbol }),
            )
            .await?;
        Ok(balances.unwrap_or_default())
    }

    /// Up to `limit` entries of `account`'s action log starting at sequence `pos`.
    pub async fn get_actions(&self, account: &str, pos: u64, limit: u64) -> Result<Vec<ActionEntry>> {
        let offset = limit.saturating_sub(1);
        let resp: ActionsResponse = self
            .read(
                "/v1/history/get_actions",
                json!({ "account_name": account, "pos": pos, "offset": offset }),
            )
            .await?;
        Ok(resp.actions)
    }

    pub async fn get_transaction(&self, id: &str) -> Result<HistoryTransaction> {
        self.read_optional::<HistoryTransaction>("/v1/history/get_transaction", json!({ "id": id }))
            .await?
            .ok_or_else(|| BridgeError::TxNotFound(id.to_string()))
    }

    /// Broadcast a signed transaction; returns the id the node computed.
    pub async fn push_transaction(&self, body: &PushTransaction<'_>) -> Result<String> {
        let path = "/v1/chain/push_transaction";
        let body = serde_json::to_value(body)?;
        self.endpoints
            .try_each(|url| {
                let body = body.clone();
                async move {
                    let resp: PushResponse = self
                        .post(&url, path, &body)
                        .await?
                        .map_err(|e| e.into_error(path))?;
                    Ok(resp.transaction_id)
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_transactions_accept_both_shapes() {
        let block: BlockInfo = serde_json::from_value(json!({
            "id": "0000000a",
            "block_num": 10,
            "transactions": [
                { "status": "executed", "trx": "deferredid" },
                { "status": "executed", "trx": { "id": "fullid", "signatures": [] } }
            ]
        }))
        .unwrap();
        let ids: Vec<&str> = block.transactions.iter().map(|t| t.trx.id()).collect();
        assert_eq!(ids, vec!["deferredid", "fullid"]);
    }

    #[test]
    fn test_api_error_not_found() {
        let body = r#"{"code":500,"message":"Internal Service Error","error":{"code":3060002,"name":"account_query_exception","what":"Account Query Exception","details":[{"message":"unknown key (eosio::chain::name): nosuchacct12"}]}}"#;
        let err = ApiError::from_body(reqwest::StatusCode::INTERNAL_SERVER_ERROR, body);
        assert!(err.is_not_found());
        let msg = err.into_error("/v1/chain/get_account").to_string();
        assert!(msg.contains("unknown key"));
    }

    #[test]
    fn test_api_error_unparseable_body() {
        let err = ApiError::from_body(reqwest::StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert!(!err.is_not_found());
        assert!(err.into_error("get_info").to_string().contains("502"));
    }

    #[test]
    fn test_history_transaction_accessors() {
        let tx: HistoryTransaction = serde_json::from_value(json!({
            "id": "abc",
            "trx": {
                "receipt": { "status": "executed" },
                "trx": { "actions": [ { "account": "eosio.token", "name": "transfer", "data": {} } ] }
            },
            "block_num": 5,
            "last_irreversible_block": 4
        }))
        .unwrap();
        assert_eq!(tx.receipt_status(), Some("executed"));
        assert_eq!(tx.actions().len(), 1);

        let bare: HistoryTransaction = serde_json::from_value(json!({ "id": "abc" })).unwrap();
        assert_eq!(bare.receipt_status(), None);
        assert!(bare.actions().is_empty());
    }
}
