//! Wires bridges, registrar, cursor store and scanners into one running oracle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bridge_core::{
    Bridge, BridgeRole, CrossChainBridges, JsonRpcRegistrationService, MemoryCursorStore,
    ScanCursorStore, Scanner, ScannerConfig, SwapRegistrar,
};
use eyre::{eyre, Result, WrapErr};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::api::{AppState, ServiceInfo};
use crate::config::{load_token_pairs, Config};
use crate::db;
use crate::metrics::{Metrics, OracleObserver, ScanStats, SharedMetrics, SharedStats};

/// Scanners for the enabled sides plus the state the HTTP server reads.
pub struct Oracle {
    /// Both sides stay owned here; each bridge links to the other only weakly.
    bridges: [Arc<dyn Bridge>; 2],
    scanners: Vec<Arc<Scanner>>,
    stats: SharedStats,
    metrics: SharedMetrics,
    info: ServiceInfo,
    started_at: Instant,
}

impl Oracle {
    /// Build everything from configuration: token pairs, both bridges (which checks
    /// the networks), the registration client and the cursor store.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let token_pairs = load_token_pairs(&config.token_pairs_file)?;
        info!(pairs = ?token_pairs.pair_ids(), "Token pairs loaded");

        let bridges = CrossChainBridges::init(config.src.clone(), config.dst.clone(), token_pairs)
            .await
            .wrap_err("Failed to initialize bridges")?;

        let service = JsonRpcRegistrationService::new(
            &config.swap_server_url,
            Duration::from_secs(config.rpc_timeout_secs),
        )
        .wrap_err("Failed to create swap server client")?;
        let registrar = Arc::new(SwapRegistrar::new(Arc::new(service)));

        let cursor: Arc<dyn ScanCursorStore> = match &config.database {
            Some(database) => {
                let pool = db::create_pool(&database.url).await?;
                info!("Database connected");
                db::run_migrations(&pool).await?;
                info!("Database migrations complete");
                Arc::new(db::PgCursorStore::new(pool))
            }
            None => {
                warn!("DATABASE_URL not set; scan cursors are kept in memory and lost on restart");
                Arc::new(MemoryCursorStore::new())
            }
        };

        let scanner_config = ScannerConfig {
            workers: config.scan_workers,
            pair_ids: config.scan_pair_ids.clone(),
            ..Default::default()
        };

        Self::new(bridges.src, bridges.dst, registrar, cursor, scanner_config)
    }

    /// Create a scanner for each side whose chain config has scanning enabled.
    pub fn new(
        src: Arc<dyn Bridge>,
        dst: Arc<dyn Bridge>,
        registrar: Arc<SwapRegistrar>,
        cursor: Arc<dyn ScanCursorStore>,
        scanner_config: ScannerConfig,
    ) -> Result<Self> {
        let metrics = Arc::new(Metrics::new());
        let stats = Arc::new(ScanStats::default());
        let observer = Arc::new(OracleObserver::new(metrics.clone(), stats.clone()));

        let mut scanners = Vec::new();
        for bridge in [&src, &dst] {
            let chain = bridge.base().chain().map_err(|e| eyre!("{}", e))?;
            if !chain.enable_scan {
                info!(role = %bridge.role(), family = bridge.family(), "Scanning disabled");
                continue;
            }
            let scanner = Scanner::new(
                bridge.clone(),
                registrar.clone(),
                cursor.clone(),
                scanner_config.clone(),
            )
            .with_observer(observer.clone());
            scanners.push(Arc::new(scanner));
        }

        let info = ServiceInfo {
            src_family: src.family().to_string(),
            dst_family: dst.family().to_string(),
            scanning: scanners.iter().map(|s| s.role().to_string()).collect(),
            pair_ids: src.base().token_pairs().pair_ids(),
        };

        Ok(Self {
            bridges: [src, dst],
            scanners,
            stats,
            metrics,
            info,
            started_at: Instant::now(),
        })
    }

    pub fn bridge(&self, role: BridgeRole) -> &Arc<dyn Bridge> {
        match role {
            BridgeRole::Source => &self.bridges[0],
            BridgeRole::Destination => &self.bridges[1],
        }
    }

    pub fn scanning_roles(&self) -> Vec<BridgeRole> {
        self.scanners.iter().map(|s| s.role()).collect()
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            stats: self.stats.clone(),
            metrics: self.metrics.clone(),
            info: self.info.clone(),
            started_at: self.started_at,
        }
    }

    /// Run every scanner until `shutdown` flips to `true`. A scanner that stops with
    /// an error aborts the rest and the error is returned.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.scanners.is_empty() {
            warn!("No side has scanning enabled; waiting for shutdown");
            let mut shutdown = shutdown;
            let _ = shutdown.wait_for(|stop| *stop).await;
            return Ok(());
        }

        let mut tasks = JoinSet::new();
        for scanner in &self.scanners {
            let scanner = scanner.clone();
            let rx = shutdown.clone();
            tasks.spawn(async move {
                let role = scanner.role();
                (role, scanner.run(rx).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((role, Ok(()))) => info!(%role, "Scanner stopped"),
                Ok((role, Err(e))) => {
                    error!(%role, error = %e, "Scanner failed");
                    tasks.abort_all();
                    return Err(eyre!("{} scanner failed: {}", role, e));
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(eyre!("scanner task panicked: {}", e));
                }
            }
        }
        Ok(())
    }
}
