//! Contract storage size queries.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{ChainError, ChainResult};

/// Upper bound for one storage size query.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Reports how many items a contract keeps in storage.
#[async_trait]
pub trait ContractStorage: Send + Sync {
    async fn total_items(&self, contract_address: &str) -> ChainResult<u64>;
}

#[derive(Debug, Deserialize)]
struct StateResponse {
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    /// Decimal string; absent when the node does not count.
    #[serde(default)]
    total: Option<String>,
}

/// Queries raw contract state through the node's LCD REST API.
///
/// Fetches a single entry with `count_total` so the node only reports
/// the size without streaming the whole state.
#[derive(Debug, Clone)]
pub struct LcdStorage {
    client: reqwest::Client,
    endpoint: String,
}

impl LcdStorage {
    pub fn new(endpoint: &str) -> ChainResult<Self> {
        let client = reqwest::Client::builder().timeout(QUERY_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ContractStorage for LcdStorage {
    async fn total_items(&self, contract_address: &str) -> ChainResult<u64> {
        let url = format!(
            "{}/cosmwasm/wasm/v1/contract/{contract_address}/state",
            self.endpoint
        );
        let response = self
            .client
            .get(&url)
            .query(&[("pagination.limit", "1"), ("pagination.count_total", "true")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChainError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        let state: StateResponse = response.json().await?;
        let raw = state.pagination.total.unwrap_or_default();
        let total = raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ChainError::InvalidTotal(raw.clone()))?;
        debug!(contract = %contract_address, total, "queried contract storage size");
        Ok(total)
    }
}

/// In-memory [`ContractStorage`] with a settable total.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    total: AtomicU64,
    failing: AtomicBool,
}

impl MemoryStorage {
    pub fn new(total: u64) -> Self {
        Self {
            total: AtomicU64::new(total),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    /// Make queries fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContractStorage for MemoryStorage {
    async fn total_items(&self, _contract_address: &str) -> ChainResult<u64> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChainError::Disconnected("storage query failed".to_string()));
        }
        Ok(self.total.load(Ordering::SeqCst))
    }
}
