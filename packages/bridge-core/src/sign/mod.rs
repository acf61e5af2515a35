//! Threshold-signing coordination.
//!
//! Flow: submit the message hash plus a JSON context to the external signer, wait,
//! poll the sign status until exactly one `rsv` arrives, and repeat the whole cycle when
//! the chain rejects the signature shape. The coordinator never edits a signature.
//!
//! ## Modules
//!
//! - `http` - JSON-RPC client for an external threshold-signer node set
//! - `local` - Directly-held key for tooling and tests

pub mod http;
pub mod local;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bridge::Bridge;
use crate::error::{BridgeError, Result};
use crate::retry::RetryPolicy;
use crate::types::{BuildTxArgs, RawTx, SignedTx, TokenConfig};

pub use http::HttpThresholdSigner;
pub use local::LocalKeySigner;

/// secp256k1 group order divided by two; signatures with a larger `s` are malleable.
const SECP256K1_HALF_ORDER: [u8; 32] = [
    0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0x5d, 0x57, 0x6e, 0x73, 0x57, 0xa4, 0x50, 0x1d, 0xdf, 0xe9, 0x2f, 0x46, 0x68, 0x1b, 0x20, 0xa0,
];

/// Low-S rule on an `r || s || v` signature.
pub fn is_low_s(rsv: &[u8; 65]) -> bool {
    rsv[32..64] <= SECP256K1_HALF_ORDER[..]
}

/// Decode one hex `rsv` string as returned by a signer.
pub fn decode_rsv(rsv: &str) -> Result<[u8; 65]> {
    let bytes = hex::decode(rsv.trim_start_matches("0x"))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| BridgeError::Encoding(format!("rsv must be 65 bytes, got {}", b.len())))
}

/// Handle returned by a sign submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub key_id: String,
    /// Signer endpoint to poll.
    pub rpc_addr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignStatus {
    Pending,
    Done(Vec<String>),
}

/// External threshold signer.
///
/// `poll_status` returns [`BridgeError::SignStatusFailed`] or
/// [`BridgeError::SignStatusTimeout`] for terminal signer-side outcomes.
#[async_trait]
pub trait ThresholdSigner: Send + Sync {
    async fn submit_sign(
        &self,
        pubkey: &str,
        input_code: Option<&str>,
        msg_hash: &str,
        msg_context: &str,
    ) -> Result<SignRequest>;

    async fn poll_status(&self, request: &SignRequest) -> Result<SignStatus>;

    async fn bip32_child_key(&self, root_pubkey: &str, input_code: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct SignConfig {
    /// Wait after submission before the first poll.
    pub initial_wait: Duration,
    pub poll: RetryPolicy,
    pub canonical: RetryPolicy,
}

impl Default for SignConfig {
    fn default() -> Self {
        Self {
            initial_wait: Duration::from_secs(10),
            poll: RetryPolicy::fixed(70, Duration::from_secs(10)),
            canonical: RetryPolicy::fixed(5, Duration::from_secs(1)),
        }
    }
}

fn is_terminal_poll_error(e: &BridgeError) -> bool {
    matches!(
        e,
        BridgeError::SignStatusFailed(_)
            | BridgeError::SignStatusTimeout
            | BridgeError::WrongSignatureCount(_)
            | BridgeError::Encoding(_)
    )
}

pub struct SignCoordinator {
    signer: Arc<dyn ThresholdSigner>,
    config: SignConfig,
}

impl SignCoordinator {
    pub fn new(signer: Arc<dyn ThresholdSigner>) -> Self {
        Self::with_config(signer, SignConfig::default())
    }

    pub fn with_config(signer: Arc<dyn ThresholdSigner>, config: SignConfig) -> Self {
        Self { signer, config }
    }

    /// One submit/poll cycle. Returns the single `rsv` of the request.
    pub async fn sign_one(
        &self,
        pubkey: &str,
        input_code: Option<&str>,
        msg_hash: &str,
        msg_context: &str,
    ) -> Result<[u8; 65]> {
        let request = self
            .signer
            .submit_sign(pubkey, input_code, msg_hash, msg_context)
            .await?;
        info!(key_id = %request.key_id, rpc = %request.rpc_addr, msg_hash, "Sign request submitted");

        tokio::time::sleep(self.config.initial_wait).await;

        let signer = &self.signer;
        let pending = &request;
        let rsvs = self
            .config
            .poll
            .run(
                "get_sign_status",
                |_| async move {
                    match signer.poll_status(pending).await? {
                        SignStatus::Pending => {
                            Err(BridgeError::SignFailed("signature still pending".into()))
                        }
                        SignStatus::Done(rsvs) if rsvs.len() == 1 => Ok(rsvs),
                        SignStatus::Done(rsvs) => Err(BridgeError::WrongSignatureCount(rsvs.len())),
                    }
                },
                is_terminal_poll_error,
            )
            .await
            .map_err(|e| {
                if is_terminal_poll_error(&e) {
                    e
                } else {
                    BridgeError::SignFailed(format!(
                        "no signature for key id {}: {}",
                        request.key_id, e
                    ))
                }
            })?;

        debug!(key_id = %request.key_id, "Signature received");
        decode_rsv(&rsvs[0])
    }

    /// Repeat [`sign_one`](Self::sign_one) until `is_canonical` accepts the signature.
    pub async fn sign_canonical<P>(
        &self,
        pubkey: &str,
        input_code: Option<&str>,
        msg_hash: &str,
        msg_context: &str,
        is_canonical: P,
    ) -> Result<[u8; 65]>
    where
        P: Fn(&[u8; 65]) -> bool + Send + Sync,
    {
        let is_canonical = &is_canonical;
        self.config
            .canonical
            .run(
                "sign_canonical",
                |attempt| async move {
                    let rsv = self.sign_one(pubkey, input_code, msg_hash, msg_context).await?;
                    if is_canonical(&rsv) {
                        Ok(rsv)
                    } else {
                        warn!(attempt = attempt + 1, msg_hash, "Non-canonical signature, requesting a fresh one");
                        Err(BridgeError::NonCanonicalSignature {
                            attempts: attempt + 1,
                        })
                    }
                },
                |e| !matches!(e, BridgeError::NonCanonicalSignature { .. }),
            )
            .await
    }

    /// Resolve the public key to sign with and check `args.from` against it.
    pub async fn prepare_signer<B: Bridge + ?Sized>(
        &self,
        bridge: &B,
        token: &TokenConfig,
        args: &BuildTxArgs,
    ) -> Result<String> {
        let input_code = args.input_code.as_deref().filter(|c| !c.is_empty());
        match input_code {
            None => {
                if !args.from.is_empty() && !args.from.eq_ignore_ascii_case(&token.dcrm_address) {
                    return Err(BridgeError::SenderMismatch {
                        expected: token.dcrm_address.clone(),
                        actual: args.from.clone(),
                    });
                }
                Ok(token.dcrm_pubkey.clone())
            }
            Some(code) => {
                if !token.use_bip32 {
                    return Err(BridgeError::InvalidArgs(
                        "input code given for a pair without bip32 keys".into(),
                    ));
                }
                let child = self.signer.bip32_child_key(&token.dcrm_pubkey, code).await?;
                let address = bridge.public_key_to_address(&child)?;
                if !address.eq_ignore_ascii_case(&args.from) {
                    return Err(BridgeError::SenderMismatch {
                        expected: address,
                        actual: args.from.clone(),
                    });
                }
                Ok(child)
            }
        }
    }

    /// Full threshold path: prepare, hash, sign canonically and assemble.
    pub async fn sign_transaction<B: Bridge + ?Sized>(
        &self,
        bridge: &B,
        raw: &RawTx,
        args: &BuildTxArgs,
    ) -> Result<SignedTx> {
        let token = bridge.base().token(&args.pair_id)?;
        let pubkey = self.prepare_signer(bridge, token, args).await?;
        let msg_hash = bridge.msg_hash(raw)?;
        let msg_context = serde_json::to_string(args)?;

        let rsv = self
            .sign_canonical(
                &pubkey,
                args.input_code.as_deref(),
                &msg_hash,
                &msg_context,
                |rsv| bridge.is_canonical_signature(rsv),
            )
            .await?;

        let signed = bridge.assemble_signed(raw, &rsv)?;
        info!(
            family = bridge.family(),
            pair_id = %args.pair_id,
            swap_id = %args.swap_id,
            tx_hash = %signed.tx_hash,
            "Transaction signed"
        );
        Ok(signed)
    }
}
