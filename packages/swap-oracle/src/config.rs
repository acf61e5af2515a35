use bridge_core::bridge::BridgeSideConfig;
use bridge_core::gateway::parse_endpoint_list;
use bridge_core::redact::Redacted;
use bridge_core::types::GatewayAuth;
use bridge_core::{new_cross_chain_bridge, BridgeRole, ChainConfig, GatewayConfig, TokenPairConfig, TokenPairs};
use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::Path;

/// Main configuration for the swap oracle
#[derive(Debug, Clone)]
pub struct Config {
    pub src: BridgeSideConfig,
    pub dst: BridgeSideConfig,
    pub token_pairs_file: String,
    /// Pairs to scan; empty means every configured pair
    pub scan_pair_ids: Vec<String>,
    pub swap_server_url: String,
    pub database: Option<DatabaseConfig>,
    pub scan_workers: usize,
    pub api: ApiConfig,
    pub rpc_timeout_secs: u64,
}

/// Database configuration
#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

/// Health/status/metrics server
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_address: String,
    pub port: u16,
}

fn default_scan_workers() -> usize {
    4
}

fn default_api_port() -> u16 {
    9090
}

fn default_rpc_timeout() -> u64 {
    10
}

fn default_confirmations() -> u64 {
    1
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from a key lookup (the process environment in
    /// production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| eyre!("{} environment variable is required", key))
        };
        let parsed = |key: &str| -> Result<Option<u64>> {
            lookup(key)
                .map(|v| {
                    v.trim()
                        .parse::<u64>()
                        .wrap_err_with(|| format!("{} must be a valid u64", key))
                })
                .transpose()
        };

        let rpc_timeout_secs = parsed("RPC_TIMEOUT_SECS")?.unwrap_or(default_rpc_timeout());

        let side = |prefix: &str| -> Result<BridgeSideConfig> {
            let key = |name: &str| format!("{}_{}", prefix, name);
            let flag = |name: &str| {
                lookup(&key(name))
                    .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                    .unwrap_or(false)
            };
            let chain = ChainConfig {
                blockchain: required(&key("BLOCKCHAIN"))?,
                network_id: required(&key("NETWORK_ID"))?,
                confirmations: parsed(&key("CONFIRMATIONS"))?.unwrap_or(default_confirmations()),
                initial_height: parsed(&key("INITIAL_HEIGHT"))?.unwrap_or(0),
                enable_scan: flag("ENABLE_SCAN"),
                scan_pool: flag("SCAN_POOL"),
                native_asset: lookup(&key("NATIVE_ASSET")).filter(|v| !v.trim().is_empty()),
            };
            let auth = match (lookup(&key("API_USERNAME")), lookup(&key("API_PASSWORD"))) {
                (Some(username), Some(password)) => Some(GatewayAuth {
                    username,
                    password: Redacted(password),
                }),
                _ => None,
            };
            let gateway = GatewayConfig {
                api_addresses: parse_endpoint_list(&required(&key("API_URLS"))?),
                ext_api_addresses: lookup(&key("EXT_API_URLS"))
                    .map(|v| parse_endpoint_list(&v))
                    .unwrap_or_default(),
                auth,
                timeout_secs: rpc_timeout_secs,
            };
            Ok(BridgeSideConfig { chain, gateway })
        };

        let config = Config {
            src: side("SRC")?,
            dst: side("DST")?,
            token_pairs_file: required("TOKEN_PAIRS_FILE")?,
            scan_pair_ids: lookup("SCAN_PAIR_IDS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            swap_server_url: required("SWAP_SERVER_URL")?,
            database: lookup("DATABASE_URL")
                .filter(|v| !v.trim().is_empty())
                .map(|url| DatabaseConfig { url }),
            scan_workers: parsed("SCAN_WORKERS")?
                .map(|v| v as usize)
                .unwrap_or(default_scan_workers()),
            api: ApiConfig {
                bind_address: lookup("API_BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: lookup("API_PORT")
                    .map(|v| v.trim().parse().wrap_err("API_PORT must be a valid port"))
                    .transpose()?
                    .unwrap_or(default_api_port()),
            },
            rpc_timeout_secs,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (name, side, role) in [
            ("SRC", &self.src, BridgeRole::Source),
            ("DST", &self.dst, BridgeRole::Destination),
        ] {
            if side.gateway.api_addresses.is_empty() {
                return Err(eyre!("{}_API_URLS cannot be empty", name));
            }
            if new_cross_chain_bridge(&side.chain.blockchain, role).is_err() {
                return Err(eyre!(
                    "{}_BLOCKCHAIN {} is not a supported chain family",
                    name,
                    side.chain.blockchain
                ));
            }
        }

        if self.scan_workers == 0 {
            return Err(eyre!("SCAN_WORKERS must be at least 1"));
        }

        if !self.swap_server_url.starts_with("http://") && !self.swap_server_url.starts_with("https://") {
            return Err(eyre!("SWAP_SERVER_URL must be an http(s) URL"));
        }

        if let Some(db) = &self.database {
            if !db.url.starts_with("postgres://") && !db.url.starts_with("postgresql://") {
                return Err(eyre!("DATABASE_URL must be a postgres:// URL"));
            }
        }

        Ok(())
    }
}

/// Load and validate the token pair table (a JSON array of pair configs).
pub fn load_token_pairs(path: &str) -> Result<TokenPairs> {
    let raw = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read token pairs file {}", path))?;
    parse_token_pairs(&raw).wrap_err_with(|| format!("Invalid token pairs file {}", path))
}

pub fn parse_token_pairs(raw: &str) -> Result<TokenPairs> {
    let list: Vec<TokenPairConfig> = serde_json::from_str(raw).wrap_err("Failed to parse token pairs")?;
    if list.is_empty() {
        return Err(eyre!("token pairs file contains no pairs"));
    }
    TokenPairs::new(list).map_err(|e| eyre!("{}", e))
}
