use futures::stream::{FuturesUnordered, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::retry::{classify_error, ErrorClass};

/// Parse a comma-separated endpoint string into individual trimmed URLs.
pub fn parse_endpoint_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// The configured endpoints of one gateway plus the per-call timeout.
///
/// Reads are raced across every endpoint and the first success wins; writes walk the
/// endpoints in order until one accepts.
#[derive(Debug, Clone)]
pub struct EndpointSet {
    urls: Vec<String>,
    timeout: Duration,
}

impl EndpointSet {
    pub fn new(urls: &[String], timeout: Duration) -> Result<Self> {
        if urls.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "at least one gateway endpoint is required".into(),
            ));
        }
        let mut normalized = Vec::with_capacity(urls.len());
        for raw in urls {
            let trimmed = raw.trim().trim_end_matches('/');
            url::Url::parse(trimmed).map_err(|e| {
                BridgeError::InvalidConfig(format!("invalid endpoint url {}: {}", raw, e))
            })?;
            normalized.push(trimmed.to_string());
        }
        Ok(Self {
            urls: normalized,
            timeout,
        })
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a single call against one endpoint with the gateway timeout.
    pub async fn call_one<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(BridgeError::Timeout(self.timeout)),
        }
    }

    /// Read call raced across all endpoints; the first success wins.
    pub async fn race<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = self.timeout;
        let mut pending: FuturesUnordered<_> = self
            .urls
            .iter()
            .map(|url| {
                let url = url.clone();
                let fut = op(url.clone());
                async move { (url, tokio::time::timeout(timeout, fut).await) }
            })
            .collect();

        let mut errors = Vec::new();
        let mut last = None;
        while let Some((url, res)) = pending.next().await {
            match res {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    debug!(endpoint = %url, error = %e, "Endpoint call failed");
                    errors.push(format!("{}: {}", url, e));
                    last = Some(e);
                }
                Err(_) => {
                    debug!(endpoint = %url, ?timeout, "Endpoint call timed out");
                    errors.push(format!("{}: timed out after {:?}", url, timeout));
                    last = Some(BridgeError::Timeout(timeout));
                }
            }
        }
        Err(aggregate(errors, last))
    }

    /// Write call tried on each endpoint in order until one succeeds. Stops early on
    /// an error every node would repeat.
    pub async fn try_each<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut errors = Vec::new();
        let mut last = None;
        for url in &self.urls {
            match tokio::time::timeout(self.timeout, op(url.clone())).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    warn!(endpoint = %url, error = %e, "Endpoint rejected write");
                    let permanent = classify_error(&e.to_string()) == ErrorClass::Permanent;
                    errors.push(format!("{}: {}", url, e));
                    if permanent {
                        return Err(e);
                    }
                    last = Some(e);
                }
                Err(_) => {
                    warn!(endpoint = %url, timeout = ?self.timeout, "Endpoint write timed out");
                    errors.push(format!("{}: timed out after {:?}", url, self.timeout));
                    last = Some(BridgeError::Timeout(self.timeout));
                }
            }
        }
        Err(aggregate(errors, last))
    }
}

#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// POST a JSON-RPC 2.0 request and decode `result`. A response `error` becomes
/// [`BridgeError::Rpc`] carrying the server's message.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: serde_json::Value,
) -> Result<T> {
    let request = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });
    let response = client.post(url).json(&request).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(BridgeError::Rpc(format!("{} returned HTTP {}", method, status)));
    }
    let body: JsonRpcResponse<T> = response.json().await?;
    if let Some(err) = body.error {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(BridgeError::Rpc(format!("{}: {}", method, message)));
    }
    body.result
        .ok_or_else(|| BridgeError::Rpc(format!("{}: empty result", method)))
}

// A single endpoint keeps its typed error; several collapse into one aggregate.
fn aggregate(errors: Vec<String>, last: Option<BridgeError>) -> BridgeError {
    match last {
        Some(e) if errors.len() == 1 => e,
        _ => BridgeError::AllEndpointsFailed(errors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(urls: &[&str]) -> EndpointSet {
        let urls: Vec<String> = urls.iter().map(|s| s.to_string()).collect();
        EndpointSet::new(&urls, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_parse_multiple_endpoints() {
        let urls = parse_endpoint_list(" https://a.com/ , https://b.com ,, ");
        assert_eq!(urls, vec!["https://a.com", "https://b.com"]);
    }

    #[test]
    fn test_parse_empty_string() {
        assert!(parse_endpoint_list("").is_empty());
    }

    #[test]
    fn test_new_rejects_empty_and_malformed() {
        assert!(EndpointSet::new(&[], Duration::from_secs(1)).is_err());
        assert!(EndpointSet::new(&["not a url".to_string()], Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_race_returns_first_success() {
        let gw = set(&["http://a", "http://b", "http://c"]);
        let res = gw
            .race(|url| async move {
                if url == "http://b" {
                    Ok(7u64)
                } else {
                    Err(BridgeError::Rpc("down".into()))
                }
            })
            .await;
        assert_eq!(res.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_race_aggregates_all_failures() {
        let gw = set(&["http://a", "http://b"]);
        let res: Result<u64> = gw
            .race(|url| async move { Err(BridgeError::Rpc(format!("{} down", url))) })
            .await;
        match res {
            Err(BridgeError::AllEndpointsFailed(errs)) => assert_eq!(errs.len(), 2),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_endpoint_keeps_typed_error() {
        let gw = set(&["http://a"]);
        let res: Result<u64> = gw
            .race(|_| async move { Err(BridgeError::TxNotFound("abc".into())) })
            .await;
        assert!(matches!(res, Err(BridgeError::TxNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_times_out_slow_endpoint() {
        let gw = set(&["http://slow", "http://fast"]);
        let res = gw
            .race(|url| async move {
                if url == "http://slow" {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(1u64)
                } else {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(2u64)
                }
            })
            .await;
        assert_eq!(res.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_try_each_falls_through_to_next_endpoint() {
        let gw = set(&["http://a", "http://b"]);
        let res = gw
            .try_each(|url| async move {
                if url == "http://a" {
                    Err(BridgeError::Rpc("connection refused".into()))
                } else {
                    Ok(url)
                }
            })
            .await;
        assert_eq!(res.unwrap(), "http://b");
    }

    #[tokio::test]
    async fn test_try_each_stops_on_permanent_error() {
        let gw = set(&["http://a", "http://b"]);
        let hits = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let h = hits.clone();
        let res: Result<()> = gw
            .try_each(move |_| {
                let h = h.clone();
                async move {
                    h.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Err(BridgeError::Rpc("insufficient funds for transfer".into()))
                }
            })
            .await;
        assert!(res.is_err());
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
