use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{SignRequest, SignStatus, ThresholdSigner};
use crate::error::{BridgeError, Result};
use crate::gateway::{json_rpc_call, EndpointSet};

/// JSON-RPC client for a set of threshold-signer nodes.
///
/// Submissions go to the first node that accepts; the accepting node is the one polled.
pub struct HttpThresholdSigner {
    client: Client,
    nodes: EndpointSet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SignStatusResponse {
    status: String,
    #[serde(default)]
    rsv: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpThresholdSigner {
    pub fn new(nodes: &[String], timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::InvalidConfig(format!("signer http client: {}", e)))?;
        Ok(Self {
            client,
            nodes: EndpointSet::new(nodes, timeout)?,
        })
    }
}

fn status_from_response(resp: SignStatusResponse) -> Result<SignStatus> {
    match resp.status.to_lowercase().as_str() {
        "success" => Ok(SignStatus::Done(resp.rsv)),
        "pending" | "" => Ok(SignStatus::Pending),
        "failure" => Err(BridgeError::SignStatusFailed(
            resp.error.unwrap_or_else(|| "signer reported failure".into()),
        )),
        "timeout" => Err(BridgeError::SignStatusTimeout),
        other => Err(BridgeError::Rpc(format!("unknown sign status {}", other))),
    }
}

#[async_trait]
impl ThresholdSigner for HttpThresholdSigner {
    async fn submit_sign(
        &self,
        pubkey: &str,
        input_code: Option<&str>,
        msg_hash: &str,
        msg_context: &str,
    ) -> Result<SignRequest> {
        let params = serde_json::json!([{
            "pubkey": pubkey,
            "inputcode": input_code.unwrap_or_default(),
            "msghash": [msg_hash],
            "msgcontext": [msg_context],
            "keytype": "EC256K1",
        }]);
        self.nodes
            .try_each(|url| {
                let params = params.clone();
                async move {
                    let key_id: String =
                        json_rpc_call(&self.client, &url, "dcrm_sign", params).await?;
                    debug!(node = %url, key_id = %key_id, "Signer accepted request");
                    Ok(SignRequest {
                        key_id,
                        rpc_addr: url,
                    })
                }
            })
            .await
    }

    async fn poll_status(&self, request: &SignRequest) -> Result<SignStatus> {
        let resp: SignStatusResponse = json_rpc_call(
            &self.client,
            &request.rpc_addr,
            "dcrm_getSignStatus",
            serde_json::json!([request.key_id]),
        )
        .await?;
        status_from_response(resp)
    }

    async fn bip32_child_key(&self, root_pubkey: &str, input_code: &str) -> Result<String> {
        let params = serde_json::json!([root_pubkey, input_code]);
        self.nodes
            .race(|url| {
                let params = params.clone();
                async move {
                    json_rpc_call::<String>(&self.client, &url, "dcrm_getBip32ChildKey", params)
                        .await
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(status: &str, rsv: Vec<&str>) -> SignStatusResponse {
        SignStatusResponse {
            status: status.to_string(),
            rsv: rsv.into_iter().map(String::from).collect(),
            error: None,
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_from_response(resp("Success", vec!["aa"])).unwrap(),
            SignStatus::Done(vec!["aa".to_string()])
        );
        assert_eq!(
            status_from_response(resp("Pending", vec![])).unwrap(),
            SignStatus::Pending
        );
        assert!(matches!(
            status_from_response(resp("Failure", vec![])),
            Err(BridgeError::SignStatusFailed(_))
        ));
        assert!(matches!(
            status_from_response(resp("Timeout", vec![])),
            Err(BridgeError::SignStatusTimeout)
        ));
    }

    #[test]
    fn test_status_response_decodes() {
        let r: SignStatusResponse =
            serde_json::from_str(r#"{"Status":"Success","Rsv":["0xabc"],"Tip":""}"#).unwrap();
        assert_eq!(r.rsv, vec!["0xabc"]);
    }

    #[test]
    fn test_requires_nodes() {
        assert!(HttpThresholdSigner::new(&[], Duration::from_secs(5)).is_err());
    }
}
