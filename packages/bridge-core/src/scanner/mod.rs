//! Chain scanner: discovers deposit transactions and hands them to the registrar.
//!
//! Three discovery modes, chosen by [`Bridge::scan_mode`]:
//!
//! - **Blocks**: a tail-follow loop walks heights up to the current head. When it
//!   falls more than `max_lag` behind, the gap is handed to a parallel catch-up job
//!   and the tail jumps ahead. A newer catch-up cancels and supersedes the previous
//!   one, restarting from the older start so no height is skipped.
//! - **AccountActions**: pages through each deposit account's action log by sequence.
//! - **Pool**: polls the node's pending transactions. Chains with `scan_pool` set run
//!   this next to their primary mode.
//!
//! A block, action or pending transaction whose processing hit a transient failure is
//! retried after `retry_interval`; neither the block cache nor a cursor moves past it.
//!
//! Every candidate is verified for each configured pair. Accepted swaps, and rejections
//! the swap server still wants to see, are registered and remembered in the
//! [`DedupCache`] so catch-up and tail overlap register each `(tx, pair)` once.

mod catchup;
mod cursor;

pub use catchup::{partition_range, CatchUpJob};
pub use cursor::{sequence_cursor, MemoryCursorStore, ScanCursorStore, HEIGHT_CURSOR};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::bridge::{Bridge, ScanMode};
use crate::dedup::DedupCache;
use crate::error::{BridgeError, Result};
use crate::registrar::{RegisterOutcome, SwapRegistrar};
use crate::types::{BridgeRole, ScannedBlock, SwapType};

/// Scanner tuning.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Catch-up worker count
    pub workers: usize,
    /// Ranges shorter than this are scanned by one worker
    pub min_batch: u64,
    /// How far the tail may trail the head before a catch-up is started
    pub max_lag: u64,
    pub retry_interval: Duration,
    pub rest_interval: Duration,
    pub action_page_size: u64,
    /// Wait after an empty action-log page
    pub empty_page_backoff: Duration,
    pub block_cache_capacity: usize,
    pub tx_cache_capacity: usize,
    /// Pairs to verify candidates against; empty means every configured pair.
    pub pair_ids: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            min_batch: 10,
            max_lag: 100,
            retry_interval: Duration::from_secs(3),
            rest_interval: Duration::from_secs(3),
            action_page_size: 10,
            empty_page_backoff: Duration::from_secs(15),
            block_cache_capacity: 67,
            tx_cache_capacity: 300,
            pair_ids: Vec::new(),
        }
    }
}

/// Hooks for metrics and status reporting. All methods default to no-ops.
pub trait ScanObserver: Send + Sync {
    fn on_block_scanned(&self, _role: BridgeRole, _height: u64) {}
    fn on_cursor_advanced(&self, _role: BridgeRole, _value: u64) {}
    fn on_swap_registered(&self, _role: BridgeRole, _pair_id: &str, _outcome: RegisterOutcome) {}
    fn on_verify_rejected(&self, _role: BridgeRole, _pair_id: &str, _kind: &'static str) {}
    fn on_scan_error(&self, _role: BridgeRole, _kind: &'static str) {}
    fn on_catch_up_started(&self, _role: BridgeRole, _start: u64, _end: u64) {}
}

struct NoopObserver;

impl ScanObserver for NoopObserver {}

/// State shared by the tail loop and catch-up workers.
#[derive(Clone)]
pub(crate) struct ScanContext {
    pub(crate) bridge: Arc<dyn Bridge>,
    registrar: Arc<SwapRegistrar>,
    cache: Arc<DedupCache>,
    pub(crate) observer: Arc<dyn ScanObserver>,
    pub(crate) config: ScannerConfig,
    pair_ids: Vec<String>,
}

impl ScanContext {
    pub(crate) fn role(&self) -> BridgeRole {
        self.bridge.role()
    }

    /// Verify and register every transaction of `block`. The block is remembered only
    /// when every transaction reached a final outcome; `false` means the height must be
    /// scanned again.
    pub(crate) async fn process_block(&self, block: &ScannedBlock) -> bool {
        if self.cache.is_block_scanned(&block.id) {
            debug!(role = %self.role(), height = block.height, "Block already scanned");
            return true;
        }
        let mut complete = true;
        for tx in &block.tx_hashes {
            complete &= self.process_transaction(tx).await;
        }
        if !complete {
            return false;
        }
        self.cache.cache_scanned_block(&block.id, block.height);
        self.observer.on_block_scanned(self.role(), block.height);
        true
    }

    /// Verify `tx_hash` against every scanned pair and register what qualifies.
    ///
    /// Returns `false` when a pair ended on a transient verification error or a failed
    /// registration, so the caller retries the transaction instead of moving past it.
    pub(crate) async fn process_transaction(&self, tx_hash: &str) -> bool {
        let role = self.role();
        let swap_type = SwapType::for_role(role);
        let mut complete = true;
        for pair_id in &self.pair_ids {
            if self.cache.is_tx_scanned(tx_hash, pair_id) {
                continue;
            }
            let register = match self.bridge.verify_transaction(pair_id, tx_hash, false).await {
                Ok(Some(swap)) => {
                    debug!(%role, tx = tx_hash, pair_id = %pair_id, value = swap.value, bind = %swap.bind, "Swap found");
                    true
                }
                Ok(None) => false,
                Err(e) if e.should_register() => {
                    debug!(%role, tx = tx_hash, pair_id = %pair_id, reason = e.kind(), "Registering rejected swap for server-side review");
                    self.observer.on_verify_rejected(role, pair_id, e.kind());
                    true
                }
                Err(e) if e.is_transient() => {
                    warn!(%role, tx = tx_hash, pair_id = %pair_id, error = %e, "Verification failed");
                    self.observer.on_scan_error(role, e.kind());
                    complete = false;
                    false
                }
                Err(e) => {
                    debug!(%role, tx = tx_hash, pair_id = %pair_id, reason = e.kind(), "Not a swap");
                    self.observer.on_verify_rejected(role, pair_id, e.kind());
                    false
                }
            };
            if !register {
                continue;
            }
            match self.registrar.register(swap_type, tx_hash, pair_id).await {
                Ok(outcome) => {
                    self.cache.cache_scanned_tx(tx_hash, pair_id);
                    self.observer.on_swap_registered(role, pair_id, outcome);
                }
                Err(e) => {
                    warn!(%role, tx = tx_hash, pair_id = %pair_id, error = %e, "Registration failed");
                    self.observer.on_scan_error(role, e.kind());
                    complete = false;
                }
            }
        }
        complete
    }
}

/// Scanner for one bridge.
pub struct Scanner {
    ctx: Arc<ScanContext>,
    cursor: Arc<dyn ScanCursorStore>,
}

impl Scanner {
    pub fn new(
        bridge: Arc<dyn Bridge>,
        registrar: Arc<SwapRegistrar>,
        cursor: Arc<dyn ScanCursorStore>,
        config: ScannerConfig,
    ) -> Self {
        let pair_ids = if config.pair_ids.is_empty() {
            bridge.base().token_pairs().pair_ids()
        } else {
            config.pair_ids.iter().map(|p| p.to_lowercase()).collect()
        };
        let cache = Arc::new(DedupCache::new(
            config.block_cache_capacity,
            config.tx_cache_capacity,
        ));
        Self {
            ctx: Arc::new(ScanContext {
                bridge,
                registrar,
                cache,
                observer: Arc::new(NoopObserver),
                config,
                pair_ids,
            }),
            cursor,
        }
    }

    /// Install an observer. Catch-up jobs already running keep reporting to the
    /// previous one.
    pub fn with_observer(self, observer: Arc<dyn ScanObserver>) -> Self {
        let ctx = ScanContext {
            observer,
            ..ScanContext::clone(&self.ctx)
        };
        Self {
            ctx: Arc::new(ctx),
            cursor: self.cursor,
        }
    }

    pub fn role(&self) -> BridgeRole {
        self.ctx.role()
    }

    pub fn pair_ids(&self) -> &[String] {
        &self.ctx.pair_ids
    }

    pub fn dedup_cache(&self) -> &Arc<DedupCache> {
        &self.ctx.cache
    }

    /// Verify and register one transaction by hash. Returns `false` if it must be
    /// retried.
    pub async fn process_transaction(&self, tx_hash: &str) -> bool {
        self.ctx.process_transaction(tx_hash).await
    }

    /// Start a catch-up over `[start, end)`.
    pub fn catch_up(&self, start: u64, end: u64, shutdown: watch::Receiver<bool>) -> CatchUpJob {
        self.ctx.observer.on_catch_up_started(self.role(), start, end);
        CatchUpJob::spawn(self.ctx.clone(), start, end, shutdown)
    }

    /// Run until `shutdown` flips to `true`.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.ctx.pair_ids.is_empty() {
            return Err(BridgeError::InvalidConfig("no token pairs to scan".into()));
        }
        info!(
            role = %self.role(),
            family = self.ctx.bridge.family(),
            pairs = ?self.ctx.pair_ids,
            "Scanner started"
        );
        let mode = self.ctx.bridge.scan_mode();
        let with_pool = mode != ScanMode::Pool && self.ctx.bridge.base().chain()?.scan_pool;
        let primary = async {
            match mode {
                ScanMode::Blocks => self.run_blocks(shutdown.clone()).await,
                ScanMode::AccountActions => self.run_action_log(shutdown.clone()).await,
                ScanMode::Pool => self.run_pool(shutdown.clone()).await,
            }
        };
        if with_pool {
            let (primary, pool) = tokio::join!(primary, self.run_pool(shutdown.clone()));
            primary.and(pool)
        } else {
            primary.await
        }
    }

    async fn start_height(&self, latest: u64) -> Result<u64> {
        let chain = self.ctx.bridge.base().chain()?;
        let stored = self.cursor.load(self.role(), HEIGHT_CURSOR).await?;
        let start = match stored {
            Some(h) => h,
            None if chain.initial_height > 0 => chain.initial_height,
            None => latest.saturating_sub(chain.confirmations),
        };
        Ok(start.max(chain.initial_height))
    }

    /// Latest height, retried until it answers or shutdown.
    async fn wait_latest(&self, shutdown: &mut watch::Receiver<bool>) -> Option<u64> {
        loop {
            if *shutdown.borrow() {
                return None;
            }
            match self.ctx.bridge.get_latest_block_number().await {
                Ok(h) => return Some(h),
                Err(e) => {
                    warn!(role = %self.role(), error = %e, "Failed to get latest block number");
                    self.ctx.observer.on_scan_error(self.role(), e.kind());
                    if !sleep_or_shutdown(self.ctx.config.retry_interval, shutdown).await {
                        return None;
                    }
                }
            }
        }
    }

    async fn run_blocks(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let Some(latest) = self.wait_latest(&mut shutdown).await else {
            return Ok(());
        };
        let mut stable = self.start_height(latest).await?;
        let mut job: Option<CatchUpJob> = None;
        info!(role = %self.role(), start = stable, latest, "Tail scan starting");

        loop {
            let Some(latest) = self.wait_latest(&mut shutdown).await else {
                break;
            };

            if stable + self.ctx.config.max_lag < latest {
                let start = match job.take() {
                    Some(prev) if !prev.is_finished() => {
                        info!(role = %self.role(), prev_start = prev.start, prev_end = prev.end, "Superseding catch-up");
                        let start = prev.start.min(stable);
                        prev.cancel();
                        prev.join().await;
                        start
                    }
                    _ => stable,
                };
                job = Some(self.catch_up(start, latest, shutdown.clone()));
                stable = latest;
            }

            let mut height = stable;
            while height <= latest {
                if *shutdown.borrow() {
                    break;
                }
                match self.ctx.bridge.get_block_by_number(height).await {
                    Ok(block) => {
                        if self.ctx.process_block(&block).await {
                            height += 1;
                            continue;
                        }
                        warn!(role = %self.role(), height, "Block not fully processed, retrying");
                        if !sleep_or_shutdown(self.ctx.config.retry_interval, &mut shutdown).await {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(role = %self.role(), height, error = %e, "Failed to fetch block, retrying");
                        self.ctx.observer.on_scan_error(self.role(), e.kind());
                        if !sleep_or_shutdown(self.ctx.config.retry_interval, &mut shutdown).await {
                            break;
                        }
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
            stable = latest;

            let catching_up = job.as_ref().map(|j| !j.is_finished()).unwrap_or(false);
            if !catching_up {
                job = None;
                if let Err(e) = self.cursor.store(self.role(), HEIGHT_CURSOR, stable).await {
                    error!(role = %self.role(), error = %e, "Failed to persist scan cursor");
                } else {
                    self.ctx.observer.on_cursor_advanced(self.role(), stable);
                }
            }

            if !sleep_or_shutdown(self.ctx.config.rest_interval, &mut shutdown).await {
                break;
            }
        }

        if let Some(job) = job {
            job.cancel();
            job.join().await;
        }
        info!(role = %self.role(), "Tail scan stopped");
        Ok(())
    }

    async fn run_action_log(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut accounts: Vec<(String, u64)> = Vec::new();
        for pair_id in &self.ctx.pair_ids {
            let token = self.ctx.bridge.base().token(pair_id)?;
            if !accounts.iter().any(|(a, _)| a == &token.deposit_address) {
                accounts.push((
                    token.deposit_address.clone(),
                    token.initial_sequence.unwrap_or(0),
                ));
            }
        }

        let mut loops = Vec::with_capacity(accounts.len());
        for (account, initial) in accounts {
            loops.push(self.follow_account(account, initial, shutdown.clone()));
        }
        for res in futures::future::join_all(loops).await {
            res?;
        }
        info!(role = %self.role(), "Action log scan stopped");
        Ok(())
    }

    async fn follow_account(
        &self,
        account: String,
        initial: u64,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let role = self.role();
        let key = sequence_cursor(&account);
        let mut next = self.cursor.load(role, &key).await?.unwrap_or(initial).max(initial);
        info!(%role, account = %account, start_sequence = next, "Following account action log");

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            let page = self
                .ctx
                .bridge
                .get_account_actions(&account, next, self.ctx.config.action_page_size)
                .await;
            let mut actions = match page {
                Ok(actions) => actions,
                Err(e) => {
                    warn!(%role, account = %account, sequence = next, error = %e, "Failed to fetch account actions");
                    self.ctx.observer.on_scan_error(role, e.kind());
                    if !sleep_or_shutdown(self.ctx.config.retry_interval, &mut shutdown).await {
                        return Ok(());
                    }
                    continue;
                }
            };
            actions.retain(|a| a.sequence >= next);
            if actions.is_empty() {
                if !sleep_or_shutdown(self.ctx.config.empty_page_backoff, &mut shutdown).await {
                    return Ok(());
                }
                continue;
            }
            actions.sort_by_key(|a| a.sequence);

            // stop at the first action that has to be retried
            let mut seen = HashSet::new();
            let mut done = next;
            let mut stalled = false;
            for action in &actions {
                if seen.insert(action.tx_hash.as_str())
                    && !self.ctx.process_transaction(&action.tx_hash).await
                {
                    stalled = true;
                    break;
                }
                done = action.sequence + 1;
            }
            if done > next {
                next = done;
                if let Err(e) = self.cursor.store(role, &key, next).await {
                    error!(%role, account = %account, error = %e, "Failed to persist action cursor");
                } else {
                    self.ctx.observer.on_cursor_advanced(role, next);
                }
            }
            if stalled {
                warn!(%role, account = %account, sequence = next, "Action not fully processed, retrying");
                if !sleep_or_shutdown(self.ctx.config.retry_interval, &mut shutdown).await {
                    return Ok(());
                }
            }
        }
    }

    /// Poll the node's pending transactions. Each fully processed hash is remembered
    /// for every scanned pair, so it is not verified again while it stays pending.
    async fn run_pool(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let role = self.role();
        info!(%role, "Pool transaction scan starting");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.ctx.bridge.pending_transactions().await {
                Ok(hashes) => {
                    for hash in &hashes {
                        if *shutdown.borrow() {
                            break;
                        }
                        if self.ctx.process_transaction(hash).await {
                            for pair_id in &self.ctx.pair_ids {
                                self.ctx.cache.cache_scanned_tx(hash, pair_id);
                            }
                        }
                    }
                }
                Err(e @ BridgeError::Unsupported(_)) => return Err(e),
                Err(e) => {
                    warn!(%role, error = %e, "Failed to get pending transactions");
                    self.ctx.observer.on_scan_error(role, e.kind());
                    if !sleep_or_shutdown(self.ctx.config.retry_interval, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            }
            if !sleep_or_shutdown(self.ctx.config.rest_interval, &mut shutdown).await {
                break;
            }
        }
        info!(%role, "Pool transaction scan stopped");
        Ok(())
    }
}

/// Sleep for `duration`; returns `false` if shutdown was signalled first.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        res = shutdown.changed() => {
            if res.is_err() {
                return false;
            }
        }
    }
    !*shutdown.borrow()
}
