//! Destinations for collected metrics.

use std::time::Duration;

use async_trait::async_trait;
use liquidator_core::Metric;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{MetricsError, MetricsResult};

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Receives one block's worth of metrics.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn submit(&self, metrics: &[Metric]) -> MetricsResult<()>;
}

// ── Datadog ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SeriesPayload<'a> {
    series: [Series<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Series<'a> {
    metric: &'a str,
    /// 0 leaves the intake type unspecified.
    #[serde(rename = "type")]
    kind: u8,
    points: [Point; 1],
    resources: [Resource<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Point {
    timestamp: i64,
    value: f64,
}

#[derive(Debug, Serialize)]
struct Resource<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
}

impl<'a> SeriesPayload<'a> {
    fn for_metric(metric: &'a Metric) -> Self {
        Self {
            series: [Series {
                metric: &metric.name,
                kind: 0,
                points: [Point {
                    timestamp: metric.timestamp,
                    value: metric.value,
                }],
                resources: [Resource {
                    name: &metric.chain,
                    kind: "chain",
                }],
            }],
        }
    }
}

/// Submits each metric as its own series to the Datadog v2 intake.
pub struct DatadogSink {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl DatadogSink {
    /// Sink for the given Datadog site, e.g. `datadoghq.com`.
    pub fn new(api_key: impl Into<String>, site: &str) -> MetricsResult<Self> {
        Self::with_base_url(api_key, &format!("https://api.{site}"))
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: &str) -> MetricsResult<Self> {
        let client = reqwest::Client::builder().timeout(SUBMIT_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: format!("{}/api/v2/series", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
        })
    }

    async fn submit_one(&self, metric: &Metric) -> MetricsResult<()> {
        let response = self
            .client
            .post(&self.url)
            .header("DD-API-KEY", &self.api_key)
            .json(&SeriesPayload::for_metric(metric))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MetricsError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MetricsSink for DatadogSink {
    async fn submit(&self, metrics: &[Metric]) -> MetricsResult<()> {
        let mut failed = 0;
        for metric in metrics {
            match self.submit_one(metric).await {
                Ok(()) => debug!(metric = %metric.name, value = metric.value, "submitted metric"),
                Err(e) => {
                    failed += 1;
                    warn!(metric = %metric.name, error = %e, "unable to submit metric");
                }
            }
        }

        if failed > 0 && failed == metrics.len() {
            return Err(MetricsError::Rejected {
                failed,
                total: metrics.len(),
            });
        }
        Ok(())
    }
}

// ── Log ────────────────────────────────────────────────────────────

/// Writes metrics to the log instead of an external service.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl MetricsSink for LogSink {
    async fn submit(&self, metrics: &[Metric]) -> MetricsResult<()> {
        for metric in metrics {
            info!(
                metric = %metric.name,
                value = metric.value,
                timestamp = metric.timestamp,
                chain = %metric.chain,
                "metric"
            );
        }
        Ok(())
    }
}

// ── Memory ─────────────────────────────────────────────────────────

/// Records submitted batches for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<Metric>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn batches(&self) -> Vec<Vec<Metric>> {
        self.batches.lock().await.clone()
    }
}

#[async_trait]
impl MetricsSink for MemorySink {
    async fn submit(&self, metrics: &[Metric]) -> MetricsResult<()> {
        self.batches.lock().await.push(metrics.to_vec());
        Ok(())
    }
}
