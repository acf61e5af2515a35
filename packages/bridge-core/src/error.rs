//! Error taxonomy shared by adapters, the verifier, the sign coordinator and the registrar.
//!
//! Callers branch on the kind rather than on message text:
//!
//! - configuration errors ([`BridgeError::is_fatal`]) stop the process at startup
//! - transient errors ([`BridgeError::is_transient`]) are retried by the calling loop
//! - verification rejects that still describe a swap ([`BridgeError::should_register`])
//!   are forwarded to the registration service
//! - everything else is logged and skipped

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    // ---- configuration / fatal ----
    #[error("wrong network: configured {expected}, gateway reports {actual}")]
    WrongNetwork { expected: String, actual: String },

    #[error("unknown token pair id: {0}")]
    UnknownPairId(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("operation not supported on the destination bridge")]
    BridgeDestinationNotSupported,

    // ---- transient ----
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("all endpoints failed: [{}]", .0.join("; "))]
    AllEndpointsFailed(Vec<String>),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transaction not found: {0}")]
    TxNotFound(String),

    // ---- verification rejects ----
    #[error("transaction is not stable yet")]
    TxNotStable,

    #[error("memo does not carry a valid bind address")]
    WrongMemo,

    #[error("bind address equals the deposit recipient")]
    SelfBind,

    #[error("swap value {0} is out of the configured range")]
    WrongValue(u128),

    #[error("bind address {0} is not valid on the destination chain")]
    WrongBindAddress(String),

    // ---- protocol integrity ----
    #[error("raw transaction belongs to another chain family")]
    WrongRawTx,

    #[error("invalid build arguments: {0}")]
    InvalidArgs(String),

    #[error("expected exactly one message hash, got {0}")]
    WrongCountOfMsgHashes(usize),

    #[error("message hash mismatch: local {local}, given {given}")]
    MsgHashMismatch { local: String, given: String },

    #[error("expected exactly one signature from the signer, got {0}")]
    WrongSignatureCount(usize),

    #[error("no canonical signature after {attempts} attempts")]
    NonCanonicalSignature { attempts: u32 },

    #[error("signer reported failure: {0}")]
    SignStatusFailed(String),

    #[error("signer reported timeout")]
    SignStatusTimeout,

    #[error("signing failed: {0}")]
    SignFailed(String),

    #[error("sender mismatch: expected {expected}, got {actual}")]
    SenderMismatch { expected: String, actual: String },

    #[error("transaction hash mismatch: local {local}, chain reported {remote}")]
    TxHashMismatch { local: String, remote: String },

    #[error("swap transaction built on the wrong endpoint")]
    BuildSwapTxInWrongEndpoint,

    #[error("swap type not supported by this bridge")]
    SwapTypeNotSupported,

    #[error("insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: u128, have: u128 },

    // ---- registration ----
    #[error("swap already registered")]
    AlreadyRegistered,

    #[error("swap registration failed: {0}")]
    RegisterFailed(String),

    // ---- misc ----
    #[error("{0} is not supported by this chain")]
    Unsupported(&'static str),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("cursor storage error: {0}")]
    Storage(String),
}

impl BridgeError {
    /// Errors that must stop the process; raised at startup or adapter construction only.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::WrongNetwork { .. }
                | BridgeError::UnknownPairId(_)
                | BridgeError::InvalidConfig(_)
        )
    }

    /// Errors where retrying the same unit of work later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::Rpc(_)
                | BridgeError::AllEndpointsFailed(_)
                | BridgeError::Timeout(_)
                | BridgeError::TxNotFound(_)
                | BridgeError::TxNotStable
                | BridgeError::Storage(_)
        )
    }

    /// Verification rejects that still identify a swap the registration service must know
    /// about (it re-verifies on its side and tracks the status).
    pub fn should_register(&self) -> bool {
        matches!(
            self,
            BridgeError::TxNotStable
                | BridgeError::WrongValue(_)
                | BridgeError::SelfBind
                | BridgeError::WrongBindAddress(_)
        )
    }

    /// Short machine-friendly label, used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::WrongNetwork { .. } => "wrong_network",
            BridgeError::UnknownPairId(_) => "unknown_pair_id",
            BridgeError::InvalidConfig(_) => "invalid_config",
            BridgeError::BridgeDestinationNotSupported => "destination_not_supported",
            BridgeError::Rpc(_) => "rpc",
            BridgeError::AllEndpointsFailed(_) => "all_endpoints_failed",
            BridgeError::Timeout(_) => "timeout",
            BridgeError::TxNotFound(_) => "tx_not_found",
            BridgeError::TxNotStable => "tx_not_stable",
            BridgeError::WrongMemo => "wrong_memo",
            BridgeError::SelfBind => "self_bind",
            BridgeError::WrongValue(_) => "wrong_value",
            BridgeError::WrongBindAddress(_) => "wrong_bind_address",
            BridgeError::WrongRawTx => "wrong_raw_tx",
            BridgeError::InvalidArgs(_) => "invalid_args",
            BridgeError::WrongCountOfMsgHashes(_) => "wrong_count_of_msg_hashes",
            BridgeError::MsgHashMismatch { .. } => "msg_hash_mismatch",
            BridgeError::WrongSignatureCount(_) => "wrong_signature_count",
            BridgeError::NonCanonicalSignature { .. } => "non_canonical_signature",
            BridgeError::SignStatusFailed(_) => "sign_status_failed",
            BridgeError::SignStatusTimeout => "sign_status_timeout",
            BridgeError::SignFailed(_) => "sign_failed",
            BridgeError::SenderMismatch { .. } => "sender_mismatch",
            BridgeError::TxHashMismatch { .. } => "tx_hash_mismatch",
            BridgeError::BuildSwapTxInWrongEndpoint => "build_in_wrong_endpoint",
            BridgeError::SwapTypeNotSupported => "swap_type_not_supported",
            BridgeError::InsufficientBalance { .. } => "insufficient_balance",
            BridgeError::AlreadyRegistered => "already_registered",
            BridgeError::RegisterFailed(_) => "register_failed",
            BridgeError::Unsupported(_) => "unsupported",
            BridgeError::Encoding(_) => "encoding",
            BridgeError::Storage(_) => "storage",
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BridgeError::Rpc(format!("request timed out: {}", e))
        } else {
            BridgeError::Rpc(e.to_string())
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Encoding(e.to_string())
    }
}

impl From<hex::FromHexError> for BridgeError {
    fn from(e: hex::FromHexError) -> Self {
        BridgeError::Encoding(format!("invalid hex: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_stable_is_registrable_and_transient() {
        let e = BridgeError::TxNotStable;
        assert!(e.should_register());
        assert!(e.is_transient());
        assert!(!e.is_fatal());
    }

    #[test]
    fn test_wrong_memo_is_never_registered() {
        let e = BridgeError::WrongMemo;
        assert!(!e.should_register());
        assert!(!e.is_transient());
    }

    #[test]
    fn test_configuration_errors_are_fatal() {
        assert!(BridgeError::WrongNetwork {
            expected: "a".into(),
            actual: "b".into()
        }
        .is_fatal());
        assert!(BridgeError::UnknownPairId("usdt".into()).is_fatal());
        assert!(!BridgeError::Rpc("boom".into()).is_fatal());
    }

    #[test]
    fn test_aggregate_error_lists_every_endpoint() {
        let e = BridgeError::AllEndpointsFailed(vec![
            "http://a: refused".to_string(),
            "http://b: timeout".to_string(),
        ]);
        let msg = e.to_string();
        assert!(msg.contains("http://a: refused"));
        assert!(msg.contains("http://b: timeout"));
    }
}
