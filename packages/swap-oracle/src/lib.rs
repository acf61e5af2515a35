//! Swap Oracle
//!
//! Long-running process that scans the enabled sides of a bridge for deposit
//! transactions and registers verified swaps with the swap server. Scan cursors are
//! persisted in Postgres when a database is configured.
//!
//! - `config` - Environment configuration and token pair loading
//! - `runner` - Bridge, registrar and scanner wiring
//! - `db` - Scan cursor persistence
//! - `metrics` - Prometheus metrics and scan statistics
//! - `api` - Health, status and metrics endpoints

pub mod api;
pub mod config;
pub mod db;
pub mod metrics;
pub mod runner;

pub use config::Config;
pub use runner::Oracle;
