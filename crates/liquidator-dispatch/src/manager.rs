//! The per-block orchestration loop.

use std::collections::BTreeMap;
use std::sync::Arc;

use liquidator_autoscale::Scaler;
use liquidator_chain::{BlockStream, BlockWatcher, ContractStorage};
use liquidator_core::{NewBlockEvent, WorkItem};
use liquidator_metrics::{
    LogSink, MetricsAggregator, MetricsReporter, MetricsSink, ReportWorker,
};
use liquidator_store::{Cache, Queue};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ManagerConfig;
use crate::error::{ManagerError, ManagerResult};
use crate::monitor::{self, SharedState};
use crate::partition::partition;

/// Scalers keyed by worker role.
pub type ScalerMap = BTreeMap<String, Arc<dyn Scaler>>;

/// Watches the chain and turns every new block into scanner work.
pub struct Manager {
    config: ManagerConfig,
    queue: Arc<dyn Queue>,
    cache: Arc<dyn Cache>,
    storage: Arc<dyn ContractStorage>,
    scalers: ScalerMap,
    aggregator: MetricsAggregator,
    reporter: Option<MetricsReporter>,
    report_worker: Mutex<Option<ReportWorker>>,
    state: Arc<RwLock<SharedState>>,
    shutdown: watch::Sender<bool>,
    /// Held for each scaling check and for the whole of scale-to-zero.
    scaling: Mutex<()>,
}

impl Manager {
    pub fn new(
        config: ManagerConfig,
        queue: Arc<dyn Queue>,
        cache: Arc<dyn Cache>,
        storage: Arc<dyn ContractStorage>,
        scalers: ScalerMap,
    ) -> ManagerResult<Self> {
        config.validate()?;
        if scalers.is_empty() {
            return Err(ManagerError::InvalidConfig(
                "at least one scaler is required".to_string(),
            ));
        }

        let (reporter, report_worker) = metrics_channel(config.metrics_enabled, Arc::new(LogSink));
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            aggregator: MetricsAggregator::new(config.chain_id.clone()),
            config,
            queue,
            cache,
            storage,
            scalers,
            reporter,
            report_worker: Mutex::new(report_worker),
            state: Arc::new(RwLock::new(SharedState::default())),
            shutdown,
            scaling: Mutex::new(()),
        })
    }

    /// Submit metrics to `sink` instead of the log.
    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        let (reporter, worker) = metrics_channel(self.config.metrics_enabled, sink);
        self.reporter = reporter;
        self.report_worker = Mutex::new(worker);
        self
    }

    /// True once [`Manager::stop`] was called or the loop has ended.
    pub fn is_stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Snapshot of the state shared with the monitors.
    pub async fn shared_state(&self) -> SharedState {
        *self.state.read().await
    }

    /// Connect to the stores, subscribe to new blocks and dispatch until
    /// stopped or until something fatal happens.
    pub async fn run(&self) -> ManagerResult<()> {
        self.queue.connect().await?;
        self.cache.connect().await?;

        let result = match BlockWatcher::new(&self.config.rpc_websocket_endpoint)
            .subscribe(self.shutdown.subscribe())
            .await
        {
            Ok(stream) => self.serve(stream).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = self.queue.disconnect().await {
            warn!(error = %e, "unable to disconnect queue");
        }
        if let Err(e) = self.cache.disconnect().await {
            warn!(error = %e, "unable to disconnect cache");
        }
        result
    }

    /// [`Manager::run`] until `signal` resolves, then [`Manager::stop`].
    /// Returns once the loop has ended and every role is scaled to zero.
    pub async fn run_until<F>(&self, signal: F) -> ManagerResult<()>
    where
        F: Future<Output = ()>,
    {
        self.stop_on(self.run(), signal).await
    }

    /// [`Manager::serve`] until `signal` resolves, then [`Manager::stop`].
    pub async fn serve_until<F>(&self, stream: BlockStream, signal: F) -> ManagerResult<()>
    where
        F: Future<Output = ()>,
    {
        self.stop_on(self.serve(stream), signal).await
    }

    async fn stop_on<R, F>(&self, running: R, signal: F) -> ManagerResult<()>
    where
        R: Future<Output = ManagerResult<()>>,
        F: Future<Output = ()>,
    {
        tokio::pin!(running);
        tokio::select! {
            biased;
            () = signal => info!("shutdown signal received"),
            result = &mut running => return result,
        }

        // The loop winds down while the roles are scaled to zero.
        let (result, ()) = tokio::join!(running, self.stop());
        result
    }

    /// Dispatch every block from `stream` while the monitors run alongside.
    pub async fn serve(&self, stream: BlockStream) -> ManagerResult<()> {
        self.state.write().await.last_block_time = Instant::now();

        let mut monitors = JoinSet::new();
        monitors.spawn(monitor::watch_liveness(
            self.state.clone(),
            self.config.liveness_timeout,
            self.config.monitor_interval,
            self.shutdown.subscribe(),
        ));
        monitors.spawn(monitor::watch_storage_size(
            self.storage.clone(),
            self.config.contract_address.clone(),
            self.cache.clone(),
            self.state.clone(),
            self.config.monitor_interval,
            self.shutdown.subscribe(),
        ));

        let worker = self
            .report_worker
            .lock()
            .await
            .take()
            .map(|worker| tokio::spawn(worker.run(self.shutdown.subscribe())));

        let result = self.dispatch_loop(stream, &mut monitors).await;

        // Whatever ended the loop, the background tasks stop with it.
        self.shutdown.send_replace(true);
        while let Some(joined) = monitors.join_next().await {
            if let Ok(Err(e)) = joined {
                debug!(error = %e, "monitor ended during shutdown");
            }
        }
        if let Some(worker) = worker {
            let _ = worker.await;
        }

        info!("manager stopped");
        result
    }

    async fn dispatch_loop(
        &self,
        mut stream: BlockStream,
        monitors: &mut JoinSet<ManagerResult<()>>,
    ) -> ManagerResult<()> {
        loop {
            tokio::select! {
                event = stream.events.recv() => match event {
                    Some(event) => {
                        self.process_block(&event).await?;
                    }
                    None => break,
                },
                Some(joined) = monitors.join_next(), if !monitors.is_empty() => {
                    match joined {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            error!(error = %e, "monitor failed");
                            return Err(e);
                        }
                        Err(e) => return Err(ManagerError::Task(e.to_string())),
                    }
                }
            }
        }

        match stream.reader.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if self.is_stopping() => {
                debug!(error = %e, "block stream ended during shutdown");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "block stream failed");
                Err(e.into())
            }
            Err(e) => Err(ManagerError::Task(e.to_string())),
        }
    }

    /// Run one dispatch cycle. Returns the number of work packets queued.
    pub async fn process_block(&self, event: &NewBlockEvent) -> ManagerResult<usize> {
        let height = match event.height.parse::<u64>() {
            Ok(height) => Some(height),
            Err(e) => {
                error!(height = %event.height, error = %e, "unable to parse new height value");
                None
            }
        };

        let previous = height.and_then(|height| height.checked_sub(1));
        if let (Some(previous), Some(reporter)) = (previous, &self.reporter) {
            let metrics = self
                .aggregator
                .collect(previous, &self.scalers, self.cache.as_ref())
                .await;
            reporter.report(previous, metrics);
        }

        debug!(height = %event.height, timestamp = %event.time, "processing new block");

        let block_time = {
            let mut state = self.state.write().await;
            let elapsed = state.last_block_time.elapsed();
            state.last_block_time = Instant::now();
            elapsed
        };

        // Scaling while stopping would fight the scale-to-zero.
        if !self.is_stopping() {
            self.scale_all(&event.height).await;
        }

        // Unclaimed work refers to the previous block's state.
        for queue in self.config.queues() {
            self.queue.purge(queue).await?;
        }

        let total = self.state.read().await.total_items;
        let mut queued = 0;
        for (offset, limit) in partition(total, self.config.items_per_packet) {
            let item = self.work_item(offset, limit);
            let bytes = match item.to_bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(offset, limit, error = %e, "unable to encode scanner work item");
                    continue;
                }
            };
            // TODO: decide whether a failed push should be retried or fail
            // the cycle instead of dropping the packet.
            if let Err(e) = self.queue.push(&self.config.scanner_queue, &bytes).await {
                error!(offset, limit, error = %e, "unable to push work to scanner queue");
                continue;
            }
            debug!(offset, limit, "submitted work to scanner queue");
            queued += 1;
        }

        info!(
            height = %event.height,
            timestamp = %event.time,
            block_time_ms = block_time.as_millis() as u64,
            packets = queued,
            total_items = total,
            "block processed"
        );
        Ok(queued)
    }

    async fn scale_all(&self, height: &str) {
        for (name, scaler) in &self.scalers {
            let _scaling = self.scaling.lock().await;
            if self.is_stopping() {
                debug!(scaler = %name, height, "stopping, skipping scaling");
                break;
            }
            match scaler.scale_automatic().await {
                Ok(outcome) if outcome.scaled => {
                    info!(scaler = %name, height, direction = %outcome.direction, "service is scaling");
                }
                Ok(outcome) => {
                    debug!(scaler = %name, height, direction = %outcome.direction, "no scaling applied");
                }
                Err(e) => warn!(scaler = %name, height, error = %e, "scaling check failed"),
            }
        }
    }

    fn work_item(&self, offset: u64, limit: u64) -> WorkItem {
        WorkItem {
            hive_endpoint: self.config.hive_endpoint.clone(),
            rpc_endpoint: self.config.rpc_endpoint.clone(),
            lcd_endpoint: self.config.lcd_endpoint.clone(),
            contract_address: self.config.contract_address.clone(),
            contract_item_prefix: self.config.contract_item_prefix.clone(),
            work_item_type: self.config.work_item_type,
            contract_page_offset: offset,
            contract_page_limit: limit,
        }
    }

    /// Query the contract's storage size now instead of waiting for the
    /// storage monitor.
    pub async fn refresh_total_items(&self) -> ManagerResult<u64> {
        monitor::refresh_total_items(
            self.storage.as_ref(),
            &self.config.contract_address,
            self.cache.as_ref(),
            &self.state,
        )
        .await
    }

    /// Stop dispatching and remove every worker instance. The running
    /// loop exits once the block subscription has closed.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        info!("stopping manager");

        // Wait out a scaling check already in flight.
        let _scaling = self.scaling.lock().await;

        for (name, scaler) in &self.scalers {
            if let Err(e) = scaler.scale_to_zero().await {
                error!(scaler = %name, error = %e, "unable to scale to zero");
            }
        }
    }
}

fn metrics_channel(
    enabled: bool,
    sink: Arc<dyn MetricsSink>,
) -> (Option<MetricsReporter>, Option<ReportWorker>) {
    if !enabled {
        return (None, None);
    }
    let (reporter, worker) = MetricsReporter::new(sink);
    (Some(reporter), Some(worker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use async_trait::async_trait;
    use liquidator_autoscale::{
        QueueWatermark, ScaleDirection, ScaleOutcome, ScalerResult, WatermarkConfig,
    };
    use liquidator_chain::MemoryStorage;
    use liquidator_deployer::MockDeployer;
    use liquidator_metrics::MemorySink;
    use liquidator_store::{MemoryCache, MemoryQueue};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};

    /// Scaler that takes `delay` for every call and records
    /// `<role>:<call>` once the call completes.
    struct RecordingScaler {
        role: &'static str,
        delay: Duration,
        calls: Arc<StdMutex<Vec<String>>>,
    }

    impl RecordingScaler {
        async fn record(&self, call: &str) {
            tokio::time::sleep(self.delay).await;
            self.calls.lock().unwrap().push(format!("{}:{call}", self.role));
        }
    }

    #[async_trait]
    impl Scaler for RecordingScaler {
        fn role(&self) -> &str {
            self.role
        }

        async fn scale_automatic(&self) -> ScalerResult<ScaleOutcome> {
            self.record("automatic").await;
            Ok(ScaleOutcome {
                direction: ScaleDirection::Up,
                scaled: true,
            })
        }

        async fn scale_up(&self) -> ScalerResult<bool> {
            Ok(true)
        }

        async fn scale_down(&self) -> ScalerResult<bool> {
            Ok(true)
        }

        async fn scale_to_zero(&self) -> ScalerResult<()> {
            self.record("zero").await;
            Ok(())
        }

        async fn count(&self) -> ScalerResult<usize> {
            Ok(0)
        }
    }

    fn recording_manager(delay: Duration) -> (Manager, Arc<StdMutex<Vec<String>>>) {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let scalers: ScalerMap = ["executor", "health-checker", "scanner"]
            .into_iter()
            .map(|role| {
                let scaler = RecordingScaler {
                    role,
                    delay,
                    calls: calls.clone(),
                };
                (role.to_string(), Arc::new(scaler) as Arc<dyn Scaler>)
            })
            .collect();

        let manager = Manager::new(
            test_config(),
            Arc::new(MemoryQueue::new()),
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryStorage::new(0)),
            scalers,
        )
        .unwrap();
        (manager, calls)
    }

    struct Harness {
        manager: Manager,
        queue: Arc<MemoryQueue>,
        deployer: Arc<MockDeployer>,
    }

    fn harness(total: u64) -> Harness {
        let queue = Arc::new(MemoryQueue::new());
        let deployer = Arc::new(MockDeployer::new("scanner"));
        let scaler = QueueWatermark::new(
            queue.clone(),
            "scanner",
            deployer.clone(),
            WatermarkConfig::default(),
        )
        .unwrap();
        let scalers: ScalerMap =
            BTreeMap::from([("scanner".to_string(), Arc::new(scaler) as Arc<dyn Scaler>)]);

        let manager = Manager::new(
            test_config(),
            queue.clone(),
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryStorage::new(total)),
            scalers,
        )
        .unwrap();
        Harness {
            manager,
            queue,
            deployer,
        }
    }

    fn block(height: &str) -> NewBlockEvent {
        NewBlockEvent::new(height, chrono::Utc::now())
    }

    #[test]
    fn requires_scalers() {
        let result = Manager::new(
            test_config(),
            Arc::new(MemoryQueue::new()),
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryStorage::new(0)),
            BTreeMap::new(),
        );
        assert!(matches!(result, Err(ManagerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn malformed_height_still_dispatches() {
        let h = harness(50);
        h.manager.refresh_total_items().await.unwrap();

        let queued = h.manager.process_block(&block("not-a-height")).await.unwrap();
        assert_eq!(queued, 1);
        assert_eq!(h.queue.count_items("scanner").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn block_triggers_scaling() {
        let h = harness(0);
        h.manager.process_block(&block("10")).await.unwrap();
        // Minimum of one instance enforced on the first block.
        assert_eq!(h.deployer.current(), 1);
    }

    #[tokio::test]
    async fn no_scaling_once_stopping() {
        let h = harness(0);
        h.manager.stop().await;
        h.manager.process_block(&block("10")).await.unwrap();
        assert_eq!(h.deployer.increase_calls(), 0);
        assert_eq!(h.deployer.remove_all_calls(), 1);
    }

    #[tokio::test]
    async fn block_resets_liveness_clock() {
        let h = harness(0);
        let before = h.manager.shared_state().await.last_block_time;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        h.manager.process_block(&block("11")).await.unwrap();
        assert!(h.manager.shared_state().await.last_block_time > before);
    }

    #[tokio::test]
    async fn out_of_range_height_skips_metrics_only() {
        let h = harness(0);
        let sink = Arc::new(MemorySink::new());
        let mut config = test_config();
        config.metrics_enabled = true;
        let manager = Manager::new(
            config,
            h.queue.clone(),
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryStorage::new(0)),
            BTreeMap::from([(
                "scanner".to_string(),
                Arc::new(
                    QueueWatermark::new(
                        h.queue.clone(),
                        "scanner",
                        h.deployer.clone(),
                        WatermarkConfig::default(),
                    )
                    .unwrap(),
                ) as Arc<dyn Scaler>,
            )]),
        )
        .unwrap()
        .with_metrics_sink(sink.clone());

        for height in ["-9223372036854775808", "-1", "0"] {
            assert_eq!(manager.process_block(&block(height)).await.unwrap(), 1);
        }
        assert_eq!(h.queue.count_items("scanner").await.unwrap(), 1);
        assert_eq!(h.deployer.current(), 1);
    }

    #[tokio::test]
    async fn stop_waits_for_scaling_in_flight() {
        let (manager, calls) = recording_manager(Duration::from_millis(100));

        let b = block("10");
        let (processed, ()) = tokio::join!(manager.process_block(&b), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            manager.stop().await;
        });
        processed.unwrap();

        // The first check finishes before any scale-to-zero; no check
        // starts once stopping.
        let calls = calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "executor:automatic",
                "executor:zero",
                "health-checker:zero",
                "scanner:zero",
            ]
        );
    }

    #[tokio::test]
    async fn signal_returns_after_every_role_is_scaled_to_zero() {
        let (manager, calls) = recording_manager(Duration::from_millis(200));
        let (events_tx, events) = mpsc::channel(1);
        let stream = BlockStream {
            events,
            reader: tokio::spawn(async { Ok(()) }),
        };

        // The stream closes right after the signal, so the loop ends well
        // before scale-to-zero has finished.
        let (signal_tx, signal_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = signal_tx.send(());
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(events_tx);
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            manager.serve_until(stream, async {
                let _ = signal_rx.await;
            }),
        )
        .await
        .unwrap();
        assert!(result.is_ok());

        let zeroed = calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.ends_with(":zero"))
            .count();
        assert_eq!(zeroed, 3);
    }

    #[tokio::test]
    async fn fatal_error_returns_without_signal() {
        let (manager, calls) = recording_manager(Duration::ZERO);
        let (events_tx, events) = mpsc::channel(1);
        let stream = BlockStream {
            events,
            reader: tokio::spawn(async move {
                drop(events_tx);
                Err(liquidator_chain::ChainError::Disconnected("read failed".to_string()))
            }),
        };

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            manager.serve_until(stream, std::future::pending()),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(ManagerError::Chain(_))));
        assert!(calls.lock().unwrap().is_empty());
    }
}
