use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{BridgeError, Result};
use crate::gateway::json_rpc_call;
use crate::retry::RetryPolicy;
use crate::types::SwapType;

/// External swap registration service.
///
/// Implementations answer [`BridgeError::AlreadyRegistered`] when the swap is known.
#[async_trait]
pub trait RegistrationService: Send + Sync {
    async fn register(&self, swap_type: SwapType, tx_hash: &str, pair_id: &str) -> Result<()>;
}

/// JSON-RPC client for the swap server (`swap.Swapin` / `swap.Swapout`).
pub struct JsonRpcRegistrationService {
    client: Client,
    url: String,
}

impl JsonRpcRegistrationService {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        url::Url::parse(url)
            .map_err(|e| BridgeError::InvalidConfig(format!("invalid swap server url: {}", e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::InvalidConfig(format!("swap server http client: {}", e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

fn method_for(swap_type: SwapType) -> Result<&'static str> {
    match swap_type {
        SwapType::Swapin => Ok("swap.Swapin"),
        SwapType::Swapout => Ok("swap.Swapout"),
        SwapType::None => Err(BridgeError::InvalidArgs(
            "cannot register a transaction without a swap type".into(),
        )),
    }
}

fn is_already_registered(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("already exist") || lower.contains("already registered")
}

#[async_trait]
impl RegistrationService for JsonRpcRegistrationService {
    async fn register(&self, swap_type: SwapType, tx_hash: &str, pair_id: &str) -> Result<()> {
        let method = method_for(swap_type)?;
        let params = serde_json::json!([{ "txid": tx_hash, "pairid": pair_id }]);
        match json_rpc_call::<serde_json::Value>(&self.client, &self.url, method, params).await {
            Ok(_) => Ok(()),
            Err(BridgeError::Rpc(msg)) if is_already_registered(&msg) => {
                Err(BridgeError::AlreadyRegistered)
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    AlreadyRegistered,
}

/// Idempotent registration with bounded retries.
pub struct SwapRegistrar {
    service: Arc<dyn RegistrationService>,
    retry: RetryPolicy,
}

impl SwapRegistrar {
    pub fn new(service: Arc<dyn RegistrationService>) -> Self {
        Self {
            service,
            retry: RetryPolicy {
                max_attempts: Some(3),
                initial_backoff: Duration::from_secs(1),
                max_backoff: Duration::from_secs(10),
                backoff_multiplier: 2.0,
            },
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn register(
        &self,
        swap_type: SwapType,
        tx_hash: &str,
        pair_id: &str,
    ) -> Result<RegisterOutcome> {
        let service = &self.service;
        let res = self
            .retry
            .run(
                "register_swap",
                |_| service.register(swap_type, tx_hash, pair_id),
                |e| matches!(e, BridgeError::AlreadyRegistered | BridgeError::InvalidArgs(_)),
            )
            .await;
        match res {
            Ok(()) => {
                info!(%swap_type, tx = tx_hash, pair_id, "Swap registered");
                Ok(RegisterOutcome::Registered)
            }
            Err(BridgeError::AlreadyRegistered) => {
                info!(%swap_type, tx = tx_hash, pair_id, "Swap already registered");
                Ok(RegisterOutcome::AlreadyRegistered)
            }
            Err(e) => {
                warn!(%swap_type, tx = tx_hash, pair_id, error = %e, "Swap registration failed");
                Err(BridgeError::RegisterFailed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRegistrationService;

    #[test]
    fn test_method_names() {
        assert_eq!(method_for(SwapType::Swapin).unwrap(), "swap.Swapin");
        assert_eq!(method_for(SwapType::Swapout).unwrap(), "swap.Swapout");
        assert!(method_for(SwapType::None).is_err());
    }

    #[test]
    fn test_already_registered_detection() {
        assert!(is_already_registered("swap.Swapin: mgoError: Item already exists"));
        assert!(is_already_registered("ALREADY REGISTERED"));
        assert!(!is_already_registered("tx not stable"));
    }

    #[tokio::test]
    async fn test_second_registration_is_success() {
        let service = Arc::new(MockRegistrationService::new());
        let registrar = SwapRegistrar::new(service.clone());
        assert_eq!(
            registrar.register(SwapType::Swapin, "0xabc", "usdt").await.unwrap(),
            RegisterOutcome::Registered
        );
        assert_eq!(
            registrar.register(SwapType::Swapin, "0xabc", "usdt").await.unwrap(),
            RegisterOutcome::AlreadyRegistered
        );
        assert_eq!(service.registrations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let service = Arc::new(MockRegistrationService::new());
        service.fail_next(2);
        let registrar = SwapRegistrar::new(service.clone());
        assert_eq!(
            registrar.register(SwapType::Swapout, "0xdef", "usdt").await.unwrap(),
            RegisterOutcome::Registered
        );
        assert_eq!(service.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_bound() {
        let service = Arc::new(MockRegistrationService::new());
        service.fail_next(10);
        let registrar = SwapRegistrar::new(service.clone());
        let res = registrar.register(SwapType::Swapin, "0x1", "usdt").await;
        assert!(matches!(res, Err(BridgeError::RegisterFailed(_))));
        assert_eq!(service.calls(), 3);
        assert!(service.registrations().is_empty());
    }
}
