//! Prometheus metrics and scan statistics for the swap oracle
//!
//! [`OracleObserver`] is installed on every scanner; it feeds both the Prometheus
//! registry served on `/metrics` and the [`ScanStats`] shown on `/status`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bridge_core::{BridgeRole, RegisterOutcome, ScanObserver};
use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};

/// Prometheus metrics
pub struct Metrics {
    pub blocks_scanned_total: IntCounterVec,
    pub latest_scanned_height: IntGaugeVec,
    pub scan_cursor: IntGaugeVec,
    pub swaps_registered_total: IntCounterVec,
    pub verify_rejected_total: IntCounterVec,
    pub scan_errors_total: IntCounterVec,
    pub catch_ups_started_total: IntCounterVec,
    pub registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    IntCounterVec::new(Opts::new(name, help), labels).expect("constant metric name is valid")
}

fn gauge_vec(name: &str, help: &str, labels: &[&str]) -> IntGaugeVec {
    IntGaugeVec::new(Opts::new(name, help), labels).expect("constant metric name is valid")
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let blocks_scanned_total = counter_vec(
            "swap_oracle_blocks_scanned_total",
            "Total number of blocks scanned",
            &["role"],
        );
        let latest_scanned_height = gauge_vec(
            "swap_oracle_latest_scanned_height",
            "Highest block height scanned",
            &["role"],
        );
        let scan_cursor = gauge_vec(
            "swap_oracle_scan_cursor",
            "Last persisted scan cursor",
            &["role"],
        );
        let swaps_registered_total = counter_vec(
            "swap_oracle_swaps_registered_total",
            "Swaps reported to the swap server",
            &["role", "pair_id", "outcome"],
        );
        let verify_rejected_total = counter_vec(
            "swap_oracle_verify_rejected_total",
            "Candidate transactions rejected by verification",
            &["role", "pair_id", "reason"],
        );
        let scan_errors_total = counter_vec(
            "swap_oracle_scan_errors_total",
            "Transient scanner errors",
            &["role", "type"],
        );
        let catch_ups_started_total = counter_vec(
            "swap_oracle_catch_ups_started_total",
            "Parallel catch-up jobs started",
            &["role"],
        );

        // Names are unique constants and registration happens once per registry
        for collector in [
            Box::new(blocks_scanned_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(latest_scanned_height.clone()),
            Box::new(scan_cursor.clone()),
            Box::new(swaps_registered_total.clone()),
            Box::new(verify_rejected_total.clone()),
            Box::new(scan_errors_total.clone()),
            Box::new(catch_ups_started_total.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric registration must not be called twice");
        }

        Self {
            blocks_scanned_total,
            latest_scanned_height,
            scan_cursor,
            swaps_registered_total,
            verify_rejected_total,
            scan_errors_total,
            catch_ups_started_total,
            registry,
        }
    }
}

/// Counters for one side of the bridge.
#[derive(Debug, Default)]
pub struct SideStats {
    pub latest_height: AtomicU64,
    pub cursor: AtomicU64,
    pub registered: AtomicU64,
    pub rejected: AtomicU64,
    pub errors: AtomicU64,
}

/// Scan statistics shared between the scanners and the HTTP server
#[derive(Debug, Default)]
pub struct ScanStats {
    pub src: SideStats,
    pub dst: SideStats,
}

impl ScanStats {
    pub fn side(&self, role: BridgeRole) -> &SideStats {
        match role {
            BridgeRole::Source => &self.src,
            BridgeRole::Destination => &self.dst,
        }
    }

    /// True once any scanner has processed a block.
    pub fn is_ready(&self) -> bool {
        self.src.latest_height.load(Ordering::Relaxed) > 0
            || self.dst.latest_height.load(Ordering::Relaxed) > 0
    }
}

pub type SharedStats = Arc<ScanStats>;
pub type SharedMetrics = Arc<Metrics>;

/// Scanner observer recording into [`Metrics`] and [`ScanStats`].
#[derive(Clone)]
pub struct OracleObserver {
    metrics: SharedMetrics,
    stats: SharedStats,
}

impl OracleObserver {
    pub fn new(metrics: SharedMetrics, stats: SharedStats) -> Self {
        Self { metrics, stats }
    }
}

impl ScanObserver for OracleObserver {
    fn on_block_scanned(&self, role: BridgeRole, height: u64) {
        self.metrics
            .blocks_scanned_total
            .with_label_values(&[role.as_str()])
            .inc();
        // Catch-up workers finish out of order; keep the maximum.
        let previous = self
            .stats
            .side(role)
            .latest_height
            .fetch_max(height, Ordering::Relaxed);
        if height > previous {
            self.metrics
                .latest_scanned_height
                .with_label_values(&[role.as_str()])
                .set(height as i64);
        }
    }

    fn on_cursor_advanced(&self, role: BridgeRole, value: u64) {
        self.stats.side(role).cursor.fetch_max(value, Ordering::Relaxed);
        self.metrics
            .scan_cursor
            .with_label_values(&[role.as_str()])
            .set(value as i64);
    }

    fn on_swap_registered(&self, role: BridgeRole, pair_id: &str, outcome: RegisterOutcome) {
        let outcome = match outcome {
            RegisterOutcome::Registered => "registered",
            RegisterOutcome::AlreadyRegistered => "already_registered",
        };
        self.stats.side(role).registered.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .swaps_registered_total
            .with_label_values(&[role.as_str(), pair_id, outcome])
            .inc();
    }

    fn on_verify_rejected(&self, role: BridgeRole, pair_id: &str, kind: &'static str) {
        self.stats.side(role).rejected.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .verify_rejected_total
            .with_label_values(&[role.as_str(), pair_id, kind])
            .inc();
    }

    fn on_scan_error(&self, role: BridgeRole, kind: &'static str) {
        self.stats.side(role).errors.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .scan_errors_total
            .with_label_values(&[role.as_str(), kind])
            .inc();
    }

    fn on_catch_up_started(&self, role: BridgeRole, _start: u64, _end: u64) {
        self.metrics
            .catch_ups_started_total
            .with_label_values(&[role.as_str()])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observer() -> (OracleObserver, SharedMetrics, SharedStats) {
        let metrics = Arc::new(Metrics::new());
        let stats = Arc::new(ScanStats::default());
        (
            OracleObserver::new(metrics.clone(), stats.clone()),
            metrics,
            stats,
        )
    }

    #[test]
    fn test_latest_height_keeps_maximum() {
        let (obs, metrics, stats) = observer();
        assert!(!stats.is_ready());
        obs.on_block_scanned(BridgeRole::Source, 120);
        obs.on_block_scanned(BridgeRole::Source, 100);

        assert!(stats.is_ready());
        assert_eq!(stats.src.latest_height.load(Ordering::Relaxed), 120);
        assert_eq!(
            metrics
                .latest_scanned_height
                .with_label_values(&["src"])
                .get(),
            120
        );
        assert_eq!(
            metrics.blocks_scanned_total.with_label_values(&["src"]).get(),
            2
        );
    }

    #[test]
    fn test_outcomes_are_labelled() {
        let (obs, metrics, stats) = observer();
        obs.on_swap_registered(BridgeRole::Destination, "eos", RegisterOutcome::Registered);
        obs.on_swap_registered(BridgeRole::Destination, "eos", RegisterOutcome::AlreadyRegistered);
        obs.on_verify_rejected(BridgeRole::Source, "eos", "wrong_memo");
        obs.on_scan_error(BridgeRole::Source, "rpc");

        assert_eq!(stats.dst.registered.load(Ordering::Relaxed), 2);
        assert_eq!(stats.src.rejected.load(Ordering::Relaxed), 1);
        assert_eq!(stats.src.errors.load(Ordering::Relaxed), 1);
        assert_eq!(
            metrics
                .swaps_registered_total
                .with_label_values(&["dst", "eos", "already_registered"])
                .get(),
            1
        );
    }

    #[test]
    fn test_registry_gathers_all_families() {
        let (obs, metrics, _) = observer();
        obs.on_catch_up_started(BridgeRole::Source, 1, 500);
        obs.on_cursor_advanced(BridgeRole::Source, 500);
        let names: Vec<String> = metrics
            .registry
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        assert!(names.contains(&"swap_oracle_catch_ups_started_total".to_string()));
        assert!(names.contains(&"swap_oracle_scan_cursor".to_string()));
    }
}
