//! Swap-detection state machine.
//!
//! fetched → transfer-matched → stable → value-checked → bind-checked → accepted.
//! Each transition either advances or ends with `Ok(None)` (not a swap) or a typed
//! [`BridgeError`]. The verifier holds no state between calls.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::bridge::Bridge;
use crate::error::{BridgeError, Result};
use crate::retry::RetryPolicy;
use crate::types::SwapInfo;

const FETCH_ATTEMPTS: u32 = 10;
const FETCH_INTERVAL: Duration = Duration::from_secs(1);

pub struct Verifier<'a, B: Bridge + ?Sized> {
    source: &'a B,
    counterpart: Arc<dyn Bridge>,
    fetch_retry: RetryPolicy,
}

impl<'a, B: Bridge + ?Sized> Verifier<'a, B> {
    /// `source` is the chain the deposit lives on; `counterpart` is the chain the
    /// bind address must be valid on.
    pub fn new(source: &'a B, counterpart: Arc<dyn Bridge>) -> Self {
        Self {
            source,
            counterpart,
            fetch_retry: RetryPolicy::fixed(FETCH_ATTEMPTS, FETCH_INTERVAL),
        }
    }

    pub fn with_fetch_retry(mut self, policy: RetryPolicy) -> Self {
        self.fetch_retry = policy;
        self
    }

    pub async fn verify(
        &self,
        pair_id: &str,
        hash: &str,
        allow_unstable: bool,
    ) -> Result<Option<SwapInfo>> {
        let token = self.source.base().token(pair_id)?;

        let record = self
            .fetch_retry
            .run(
                "get_transaction",
                |_| self.source.get_transaction(hash),
                |e| !e.is_transient(),
            )
            .await?;

        if record.transfers.is_empty() {
            debug!(tx = hash, pair_id, "No native transfer in transaction");
            return Ok(None);
        }
        let transfer = match record
            .transfers
            .iter()
            .find(|t| {
                t.to.eq_ignore_ascii_case(&token.deposit_address)
                    && same_asset(t.token.as_deref(), token.token_address.as_deref())
            })
        {
            Some(t) => t,
            None => {
                debug!(tx = hash, pair_id, "No transfer of the pair's asset to the deposit address");
                return Ok(None);
            }
        };

        let bind = transfer
            .memo
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or(BridgeError::WrongMemo)?;
        if !self.counterpart.is_valid_address(bind) {
            debug!(tx = hash, memo = bind, "Memo is not a destination address");
            return Err(BridgeError::WrongMemo);
        }

        let status = self
            .fetch_retry
            .run(
                "get_transaction_status",
                |_| self.source.get_transaction_status(hash),
                |e| !e.is_transient(),
            )
            .await?;
        let policy = self.source.stability_policy();
        let status = match status {
            Some(s) if policy.is_stable(&s) => s,
            other => {
                debug!(tx = hash, status = ?other, ?policy, "Transaction not stable");
                if allow_unstable {
                    return Ok(None);
                }
                return Err(BridgeError::TxNotStable);
            }
        };

        if bind.eq_ignore_ascii_case(&transfer.to) {
            return Err(BridgeError::SelfBind);
        }

        if !token.check_swap_value(transfer.value) {
            return Err(BridgeError::WrongValue(transfer.value));
        }

        match self.counterpart.check_bind_address(bind).await {
            Ok(()) => {}
            Err(e) if e.is_transient() => return Err(e),
            Err(_) => return Err(BridgeError::WrongBindAddress(bind.to_string())),
        }

        let timestamp = if status.timestamp > 0 {
            status.timestamp
        } else {
            record.timestamp
        };
        Ok(Some(SwapInfo {
            hash: record.hash.clone(),
            pair_id: pair_id.to_lowercase(),
            from: transfer.from.clone(),
            to: transfer.to.clone(),
            tx_to: record.tx_to.clone(),
            bind: bind.to_string(),
            value: transfer.value,
            height: status.block_height,
            timestamp,
        }))
    }
}

fn same_asset(transferred: Option<&str>, configured: Option<&str>) -> bool {
    match (transferred, configured) {
        (None, None) => true,
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockChain, MockDeposit};
    use crate::types::BridgeRole;

    const BIND: &str = "0x1111111111111111111111111111111111111111";

    fn pair() -> (Arc<MockChain>, Arc<MockChain>) {
        MockChain::wired_pair(3)
    }

    #[tokio::test]
    async fn test_accepts_valid_stable_deposit() {
        let (src, _dst) = pair();
        let hash = src.deposit(MockDeposit::new(5_000_000, Some(BIND)));
        src.advance_blocks(3);

        let info = src
            .verify_transaction("usdt", &hash, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.value, 5_000_000);
        assert_eq!(info.bind, BIND);
        assert_eq!(info.from, MockChain::DEFAULT_SENDER);
        assert_eq!(info.height, 1);
    }

    #[tokio::test]
    async fn test_wrong_recipient_is_not_a_swap() {
        let (src, _dst) = pair();
        let hash = src.deposit(MockDeposit::new(5_000_000, Some(BIND)).to("mock_other"));
        src.advance_blocks(3);
        assert!(src.verify_transaction("usdt", &hash, false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_or_invalid_memo() {
        let (src, _dst) = pair();
        let no_memo = src.deposit(MockDeposit::new(5_000_000, None));
        let bad_memo = src.deposit(MockDeposit::new(5_000_000, Some("hello")));
        src.advance_blocks(3);
        assert!(matches!(
            src.verify_transaction("usdt", &no_memo, false).await,
            Err(BridgeError::WrongMemo)
        ));
        assert!(matches!(
            src.verify_transaction("usdt", &bad_memo, false).await,
            Err(BridgeError::WrongMemo)
        ));
    }

    #[tokio::test]
    async fn test_unstable_respects_allow_flag() {
        let (src, _dst) = pair();
        let hash = src.deposit(MockDeposit::new(5_000_000, Some(BIND)));
        assert!(matches!(
            src.verify_transaction("usdt", &hash, false).await,
            Err(BridgeError::TxNotStable)
        ));
        assert!(src.verify_transaction("usdt", &hash, true).await.unwrap().is_none());

        // stability is re-evaluated on every call
        src.advance_blocks(3);
        assert!(src.verify_transaction("usdt", &hash, false).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_self_bind_rejected() {
        let (src, _dst) = pair();
        let deposit = src.base().token("usdt").unwrap().deposit_address.clone();
        let hash = src.deposit(MockDeposit::new(5_000_000, Some(&deposit)));
        src.advance_blocks(3);
        assert!(matches!(
            src.verify_transaction("usdt", &hash, false).await,
            Err(BridgeError::SelfBind)
        ));
    }

    #[tokio::test]
    async fn test_value_out_of_range() {
        let (src, _dst) = pair();
        let hash = src.deposit(MockDeposit::new(1, Some(BIND)));
        src.advance_blocks(3);
        assert!(matches!(
            src.verify_transaction("usdt", &hash, false).await,
            Err(BridgeError::WrongValue(1))
        ));
    }

    #[tokio::test]
    async fn test_bind_rejected_by_destination_check() {
        let (src, dst) = pair();
        dst.reject_bind(BIND);
        let hash = src.deposit(MockDeposit::new(5_000_000, Some(BIND)));
        src.advance_blocks(3);
        assert!(matches!(
            src.verify_transaction("usdt", &hash, false).await,
            Err(BridgeError::WrongBindAddress(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_after_bound() {
        let (src, _dst) = pair();
        let res = src.verify_transaction("usdt", "deadbeef", false).await;
        assert!(matches!(res, Err(BridgeError::TxNotFound(_))));
        assert_eq!(src.get_transaction_calls("deadbeef"), FETCH_ATTEMPTS as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_query_is_retried() {
        let (src, _dst) = pair();
        let hash = src.deposit(MockDeposit::new(5_000_000, Some(BIND)));
        src.advance_blocks(3);

        src.fail_status_queries(2);
        assert!(src.verify_transaction("usdt", &hash, false).await.unwrap().is_some());

        src.fail_status_queries(FETCH_ATTEMPTS);
        assert!(matches!(
            src.verify_transaction("usdt", &hash, false).await,
            Err(BridgeError::Rpc(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_pair() {
        let (src, _dst) = pair();
        assert!(matches!(
            src.verify_transaction("nope", "abc", false).await,
            Err(BridgeError::UnknownPairId(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_is_idempotent() {
        let (src, _dst) = pair();
        let hash = src.deposit(MockDeposit::new(5_000_000, Some(BIND)));
        src.advance_blocks(3);
        let a = src.verify_transaction("usdt", &hash, false).await.unwrap();
        let b = src.verify_transaction("usdt", &hash, false).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(src.role(), BridgeRole::Source);
    }

    #[test]
    fn test_asset_must_match_pair() {
        assert!(same_asset(None, None));
        assert!(same_asset(Some("0xAbC"), Some("0xabc")));
        assert!(!same_asset(Some("0xabc"), None));
        assert!(!same_asset(None, Some("0xabc")));
        assert!(!same_asset(Some("0xabc"), Some("0xdef")));
    }
}
