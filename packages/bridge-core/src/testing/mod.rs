//! Testing Utilities Module
//!
//! In-memory collaborators for unit and integration tests of the pipeline.
//!
//! ## Submodules
//!
//! - `mock_chain` - A `Bridge` over a local ledger with controllable head and faults
//! - `mock_signer` - Scripted threshold signer
//! - `mock_registry` - Idempotent in-memory registration service

pub mod mock_chain;
pub mod mock_registry;
pub mod mock_signer;

// Re-export commonly used items
pub use mock_chain::*;
pub use mock_registry::*;
pub use mock_signer::*;
