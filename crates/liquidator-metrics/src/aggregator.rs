//! Per-block metric collection from the shared cache.

use std::collections::BTreeMap;
use std::sync::Arc;

use liquidator_autoscale::Scaler;
use liquidator_core::{Metric, keys};
use liquidator_store::Cache;
use tracing::{debug, warn};

pub const GENERAL_BLOCK_HEIGHT: &str = "general.block_height";
pub const SCANNER_CONTRACT_ITEMS_MISSED: &str = "scanner.contract_items.missed";
pub const HEALTH_CHECKER_ACCOUNTS_MISSED: &str = "health_checker.accounts.missed";
pub const HEALTH_CHECKER_HEALTHY_TOTAL: &str = "health_checker.healthy.total";
pub const EXECUTOR_LIQUIDATIONS_MISSED: &str = "executor.liquidations.missed";

/// Instance count gauge name for a worker role.
pub fn scaler_count_metric(role: &str) -> String {
    format!("manager.scaler.{role}.count")
}

/// Reads pipeline counters and derives the per-block figures.
pub struct MetricsAggregator {
    chain: String,
}

impl MetricsAggregator {
    pub fn new(chain: impl Into<String>) -> Self {
        Self {
            chain: chain.into(),
        }
    }

    /// Collect the metrics describing the work done for `height`.
    ///
    /// Per-block counters are read and cleared together. A value that cannot be
    /// read is left out, along with every figure derived from it.
    pub async fn collect(
        &self,
        height: u64,
        scalers: &BTreeMap<String, Arc<dyn Scaler>>,
        cache: &dyn Cache,
    ) -> Vec<Metric> {
        let now = chrono::Utc::now().timestamp();
        let mut out = MetricSet {
            chain: &self.chain,
            timestamp: now,
            metrics: Vec::new(),
        };

        out.push(GENERAL_BLOCK_HEIGHT, height as f64);

        for (name, scaler) in scalers {
            match scaler.count().await {
                Ok(count) => out.push(&scaler_count_metric(name), count as f64),
                Err(e) => warn!(height, scaler = %name, error = %e, "unable to get service count"),
            }
        }

        let contract_items = self.read(cache, height, keys::SCANNER_CONTRACT_ITEMS_TOTAL).await;
        let scanned_items = self.read(cache, height, keys::SCANNER_CONTRACT_ITEMS_SCANNED).await;
        let accounts = self.read(cache, height, keys::HEALTH_CHECKER_ACCOUNTS_TOTAL).await;
        let scanned_accounts = self.read(cache, height, keys::HEALTH_CHECKER_ACCOUNTS_SCANNED).await;
        let unhealthy = self.read(cache, height, keys::HEALTH_CHECKER_UNHEALTHY_TOTAL).await;
        let liquidations = self.read(cache, height, keys::EXECUTOR_LIQUIDATIONS_TOTAL).await;
        let executed = self.read(cache, height, keys::EXECUTOR_LIQUIDATIONS_EXECUTED).await;

        out.push_opt(keys::SCANNER_CONTRACT_ITEMS_TOTAL, contract_items);
        out.push_opt(keys::SCANNER_CONTRACT_ITEMS_SCANNED, scanned_items);
        out.push_opt(SCANNER_CONTRACT_ITEMS_MISSED, shortfall(contract_items, scanned_items));

        out.push_opt(keys::HEALTH_CHECKER_ACCOUNTS_TOTAL, accounts);
        out.push_opt(keys::HEALTH_CHECKER_ACCOUNTS_SCANNED, scanned_accounts);
        out.push_opt(HEALTH_CHECKER_ACCOUNTS_MISSED, shortfall(accounts, scanned_accounts));
        out.push_opt(HEALTH_CHECKER_HEALTHY_TOTAL, shortfall(scanned_accounts, unhealthy));
        out.push_opt(keys::HEALTH_CHECKER_UNHEALTHY_TOTAL, unhealthy);

        out.push_opt(keys::EXECUTOR_LIQUIDATIONS_TOTAL, liquidations);
        out.push_opt(keys::EXECUTOR_LIQUIDATIONS_EXECUTED, executed);
        out.push_opt(EXECUTOR_LIQUIDATIONS_MISSED, shortfall(liquidations, executed));

        out.metrics
    }

    /// Read `key`. Per-block counters are read and cleared in one step so
    /// increments landing during the read are kept for the next block.
    async fn read(&self, cache: &dyn Cache, height: u64, key: &str) -> Option<f64> {
        let value = if keys::is_per_block(key) {
            cache.take_f64(key).await
        } else {
            cache.get_f64(key).await
        };

        match value {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(height, metric = key, error = %e, "unable to get metric from cache");
                None
            }
        }
    }
}

struct MetricSet<'a> {
    chain: &'a str,
    timestamp: i64,
    metrics: Vec<Metric>,
}

impl MetricSet<'_> {
    fn push(&mut self, name: &str, value: f64) {
        debug!(metric = name, value, "collected metric");
        self.metrics
            .push(Metric::new(name, value, self.timestamp, self.chain));
    }

    fn push_opt(&mut self, name: &str, value: Option<f64>) {
        if let Some(value) = value {
            self.push(name, value);
        }
    }
}

/// `max(0, whole - part)`, absent when either input is.
fn shortfall(whole: Option<f64>, part: Option<f64>) -> Option<f64> {
    Some((whole? - part?).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquidator_autoscale::{QueueWatermark, WatermarkConfig};
    use liquidator_deployer::MockDeployer;
    use liquidator_store::{MemoryCache, MemoryQueue};

    fn value(metrics: &[Metric], name: &str) -> Option<f64> {
        metrics.iter().find(|m| m.name == name).map(|m| m.value)
    }

    fn scalers(running: usize) -> BTreeMap<String, Arc<dyn Scaler>> {
        let scaler = QueueWatermark::new(
            Arc::new(MemoryQueue::new()),
            "scanner",
            Arc::new(MockDeployer::with_count("scanner", running)),
            WatermarkConfig::default(),
        )
        .unwrap();
        BTreeMap::from([("scanner".to_string(), Arc::new(scaler) as Arc<dyn Scaler>)])
    }

    #[tokio::test]
    async fn derives_pipeline_figures() {
        let cache = MemoryCache::new();
        cache.set(keys::SCANNER_CONTRACT_ITEMS_TOTAL, 500.0).await.unwrap();
        cache.increment_by(keys::SCANNER_CONTRACT_ITEMS_SCANNED, 420).await.unwrap();
        cache.increment_by(keys::HEALTH_CHECKER_ACCOUNTS_TOTAL, 80).await.unwrap();
        cache.increment_by(keys::HEALTH_CHECKER_ACCOUNTS_SCANNED, 75).await.unwrap();
        cache.increment_by(keys::HEALTH_CHECKER_UNHEALTHY_TOTAL, 3).await.unwrap();
        cache.increment_by(keys::EXECUTOR_LIQUIDATIONS_TOTAL, 3).await.unwrap();
        cache.increment_by(keys::EXECUTOR_LIQUIDATIONS_EXECUTED, 2).await.unwrap();

        let metrics = MetricsAggregator::new("osmosis-1")
            .collect(99, &scalers(2), &cache)
            .await;

        assert_eq!(value(&metrics, GENERAL_BLOCK_HEIGHT), Some(99.0));
        assert_eq!(value(&metrics, "manager.scaler.scanner.count"), Some(2.0));
        assert_eq!(value(&metrics, SCANNER_CONTRACT_ITEMS_MISSED), Some(80.0));
        assert_eq!(value(&metrics, HEALTH_CHECKER_ACCOUNTS_MISSED), Some(5.0));
        assert_eq!(value(&metrics, HEALTH_CHECKER_HEALTHY_TOTAL), Some(72.0));
        assert_eq!(value(&metrics, EXECUTOR_LIQUIDATIONS_MISSED), Some(1.0));
        assert!(metrics.iter().all(|m| m.chain == "osmosis-1"));
    }

    #[tokio::test]
    async fn per_block_counters_are_cleared() {
        let cache = MemoryCache::new();
        cache.set(keys::SCANNER_CONTRACT_ITEMS_TOTAL, 10.0).await.unwrap();
        cache.increment_by(keys::SCANNER_CONTRACT_ITEMS_SCANNED, 10).await.unwrap();

        MetricsAggregator::new("c").collect(1, &BTreeMap::new(), &cache).await;

        assert!(cache.contains(keys::SCANNER_CONTRACT_ITEMS_TOTAL).await);
        assert!(!cache.contains(keys::SCANNER_CONTRACT_ITEMS_SCANNED).await);
    }

    #[tokio::test]
    async fn increments_after_a_read_count_toward_the_next_block() {
        let cache = MemoryCache::new();
        let aggregator = MetricsAggregator::new("c");
        cache.increment_by(keys::SCANNER_CONTRACT_ITEMS_SCANNED, 10).await.unwrap();

        let first = aggregator.collect(1, &BTreeMap::new(), &cache).await;
        cache.increment_by(keys::SCANNER_CONTRACT_ITEMS_SCANNED, 5).await.unwrap();
        let second = aggregator.collect(2, &BTreeMap::new(), &cache).await;

        assert_eq!(value(&first, keys::SCANNER_CONTRACT_ITEMS_SCANNED), Some(10.0));
        assert_eq!(value(&second, keys::SCANNER_CONTRACT_ITEMS_SCANNED), Some(5.0));
    }

    #[tokio::test]
    async fn missing_counters_read_as_zero() {
        let cache = MemoryCache::new();
        cache.set(keys::SCANNER_CONTRACT_ITEMS_TOTAL, 30.0).await.unwrap();

        let metrics = MetricsAggregator::new("c").collect(1, &BTreeMap::new(), &cache).await;
        assert_eq!(value(&metrics, keys::SCANNER_CONTRACT_ITEMS_SCANNED), Some(0.0));
        assert_eq!(value(&metrics, SCANNER_CONTRACT_ITEMS_MISSED), Some(30.0));
    }

    #[tokio::test]
    async fn missed_never_negative() {
        let cache = MemoryCache::new();
        cache.increment_by(keys::EXECUTOR_LIQUIDATIONS_EXECUTED, 4).await.unwrap();

        let metrics = MetricsAggregator::new("c").collect(1, &BTreeMap::new(), &cache).await;
        assert_eq!(value(&metrics, EXECUTOR_LIQUIDATIONS_MISSED), Some(0.0));
    }

    #[tokio::test]
    async fn unreadable_value_skips_dependents() {
        let cache = MemoryCache::new();
        cache.increment_by(keys::HEALTH_CHECKER_ACCOUNTS_SCANNED, 7).await.unwrap();
        cache.fail_reads_for(keys::HEALTH_CHECKER_ACCOUNTS_SCANNED).await;

        let metrics = MetricsAggregator::new("c").collect(1, &BTreeMap::new(), &cache).await;
        assert_eq!(value(&metrics, keys::HEALTH_CHECKER_ACCOUNTS_SCANNED), None);
        assert_eq!(value(&metrics, HEALTH_CHECKER_ACCOUNTS_MISSED), None);
        assert_eq!(value(&metrics, HEALTH_CHECKER_HEALTHY_TOTAL), None);
        assert_eq!(value(&metrics, keys::HEALTH_CHECKER_ACCOUNTS_TOTAL), Some(0.0));
        // Not read, so not cleared.
        assert!(cache.contains(keys::HEALTH_CHECKER_ACCOUNTS_SCANNED).await);
    }

    #[tokio::test]
    async fn failing_scaler_count_is_skipped() {
        let deployer = Arc::new(MockDeployer::new("executor"));
        deployer.fail_counts(true);
        let scaler = QueueWatermark::new(
            Arc::new(MemoryQueue::new()),
            "executor",
            deployer,
            WatermarkConfig::default(),
        )
        .unwrap();
        let scalers = BTreeMap::from([("executor".to_string(), Arc::new(scaler) as Arc<dyn Scaler>)]);

        let metrics = MetricsAggregator::new("c")
            .collect(1, &scalers, &MemoryCache::new())
            .await;
        assert_eq!(value(&metrics, "manager.scaler.executor.count"), None);
        assert_eq!(value(&metrics, GENERAL_BLOCK_HEIGHT), Some(1.0));
    }
}
