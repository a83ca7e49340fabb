//! Detached metric submission.
//!
//! The dispatch loop hands each block's metrics to [`MetricsReporter`] and
//! moves on; a [`ReportWorker`] drains the channel into the sink. When the
//! channel is full the batch is dropped rather than delaying dispatch.

use std::sync::Arc;

use liquidator_core::Metric;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::sink::MetricsSink;

/// Batches waiting for submission.
pub const REPORT_QUEUE_CAPACITY: usize = 32;

type Batch = (u64, Vec<Metric>);

/// Sending half of the report channel.
#[derive(Clone)]
pub struct MetricsReporter {
    tx: mpsc::Sender<Batch>,
}

/// Receiving half; submits batches one at a time.
pub struct ReportWorker {
    rx: mpsc::Receiver<Batch>,
    sink: Arc<dyn MetricsSink>,
}

impl MetricsReporter {
    pub fn new(sink: Arc<dyn MetricsSink>) -> (Self, ReportWorker) {
        let (tx, rx) = mpsc::channel(REPORT_QUEUE_CAPACITY);
        (Self { tx }, ReportWorker { rx, sink })
    }

    /// Queue `metrics` for submission without waiting.
    pub fn report(&self, height: u64, metrics: Vec<Metric>) {
        if let Err(e) = self.tx.try_send((height, metrics)) {
            warn!(height, error = %e, "dropping metrics batch");
        }
    }
}

impl ReportWorker {
    /// Submit batches until shutdown or until every reporter is dropped.
    /// Batches already queued at shutdown are still submitted.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                batch = self.rx.recv() => match batch {
                    Some(batch) => self.submit(batch).await,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.rx.close();
                        while let Some(batch) = self.rx.recv().await {
                            self.submit(batch).await;
                        }
                        break;
                    }
                }
            }
        }
        info!("metrics reporter stopped");
    }

    async fn submit(&self, (height, metrics): Batch) {
        match self.sink.submit(&metrics).await {
            Ok(()) => debug!(height, count = metrics.len(), "metrics submitted"),
            Err(e) => error!(height, error = %e, "unable to submit metrics"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use std::time::Duration;

    fn height_metric(height: u64) -> Vec<Metric> {
        vec![Metric::new("general.block_height", height as f64, 0, "c")]
    }

    #[tokio::test]
    async fn batches_reach_the_sink() {
        let sink = Arc::new(MemorySink::new());
        let (_tx, rx) = watch::channel(false);
        let (reporter, worker) = MetricsReporter::new(sink.clone());
        let handle = tokio::spawn(worker.run(rx));

        reporter.report(10, height_metric(10));
        reporter.report(11, height_metric(11));
        drop(reporter);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        let batches = sink.batches().await;
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1][0].value, 11.0);
    }

    #[tokio::test]
    async fn shutdown_drains_queued_batches() {
        let sink = Arc::new(MemorySink::new());
        let (tx, rx) = watch::channel(false);
        let (reporter, worker) = MetricsReporter::new(sink.clone());

        reporter.report(7, height_metric(7));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), worker.run(rx))
            .await
            .unwrap();

        assert_eq!(sink.batches().await.len(), 1);
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_waiting() {
        let (reporter, _worker) = MetricsReporter::new(Arc::new(MemorySink::new()));
        for height in 0..(REPORT_QUEUE_CAPACITY as u64 + 5) {
            reporter.report(height, height_metric(height));
        }
    }
}
