//! Bridge-Core: Chain-Agnostic Swap Bridge Pipeline
//!
//! This crate holds everything between "a deposit landed on the source chain" and
//! "a signed release transaction was broadcast on the destination chain":
//!
//! - **Bridge** - The capability trait every chain adapter implements, plus
//!   construction by chain-family prefix
//! - **Scanner** - Parallel catch-up, tail-follow and action-log scanning with
//!   block/transaction de-duplication
//! - **Verifier** - The swap-detection state machine turning a transaction hash into
//!   a [`SwapInfo`](types::SwapInfo) or a typed rejection
//! - **SignCoordinator** - Threshold-signer request, status polling and
//!   canonical-signature retries
//! - **SwapRegistrar** - Idempotent reporting of verified swaps
//! - **Adapters** - EOS, EVM and Terra chain adapters (feature-gated)
//! - **Testing Module** - In-memory chain, signer and registration mocks
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! bridge-core = { path = "../bridge-core" }
//! ```
//!
//! ## Feature Flags
//!
//! - `eos` - Enable the EOS adapter (default)
//! - `evm` - Enable the EVM adapter (default)
//! - `terra` - Enable the Terra adapter (default)
//! - `testing` - Enable mock collaborators for integration tests
//! - `full` - Enable all features

// Core modules (always available)
pub mod bridge;
pub mod build;
pub mod dedup;
pub mod error;
pub mod gateway;
pub mod redact;
pub mod registrar;
pub mod retry;
pub mod scanner;
pub mod sign;
pub mod stability;
pub mod types;
pub mod verifier;

// Chain-specific modules (feature-gated)
#[cfg(feature = "eos")]
pub mod eos;

#[cfg(feature = "evm")]
pub mod evm;

#[cfg(feature = "terra")]
pub mod terra;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used items at the crate root
pub use bridge::{new_cross_chain_bridge, Bridge, BridgeBase, BridgeRole, CrossChainBridges, ScanMode};
pub use dedup::{DedupCache, DedupEntry};
pub use error::{BridgeError, Result};
pub use registrar::{
    JsonRpcRegistrationService, RegisterOutcome, RegistrationService, SwapRegistrar,
};
pub use retry::RetryPolicy;
pub use scanner::{MemoryCursorStore, ScanCursorStore, ScanObserver, Scanner, ScannerConfig};
pub use sign::{SignCoordinator, SignRequest, SignStatus, ThresholdSigner};
pub use stability::StabilityPolicy;
pub use types::{
    BuildTxArgs, ChainConfig, ExtraArgs, GatewayConfig, RawTx, SignedTx, SwapInfo, SwapType,
    TokenPairConfig, TokenPairs, TxRecord, TxStatus,
};
pub use verifier::Verifier;
