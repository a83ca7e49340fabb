//! Background monitors sharing state with the dispatch loop.
//!
//! Both loops return an error when the manager can no longer work
//! safely; the dispatch loop treats that as fatal.

use std::sync::Arc;
use std::time::Duration;

use liquidator_chain::ContractStorage;
use liquidator_core::keys;
use liquidator_store::Cache;
use tokio::sync::{RwLock, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ManagerError, ManagerResult};

/// State written by the monitors and the dispatch loop.
#[derive(Debug, Clone, Copy)]
pub struct SharedState {
    pub last_block_time: Instant,
    /// Items in the monitored contract's storage.
    pub total_items: u64,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            last_block_time: Instant::now(),
            total_items: 0,
        }
    }
}

/// Fail once no block has arrived for `timeout`.
///
/// The websocket can stay open while the node silently stops sending
/// events, so the read loop alone cannot detect this.
pub async fn watch_liveness(
    state: Arc<RwLock<SharedState>>,
    timeout: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> ManagerResult<()> {
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let since_last_block = state.read().await.last_block_time.elapsed();
        debug!(since_last_block_ms = since_last_block.as_millis() as u64, "checking block liveness");
        if since_last_block >= timeout {
            return Err(ManagerError::Stalled(since_last_block));
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

/// Query the contract's storage size and publish it to the cache and the
/// shared state.
pub async fn refresh_total_items(
    storage: &dyn ContractStorage,
    contract_address: &str,
    cache: &dyn Cache,
    state: &RwLock<SharedState>,
) -> ManagerResult<u64> {
    let start = Instant::now();
    let total = storage.total_items(contract_address).await?;

    if let Err(e) = cache.set(keys::SCANNER_CONTRACT_ITEMS_TOTAL, total as f64).await {
        warn!(total, error = %e, "unable to store contract item total");
    }
    state.write().await.total_items = total;

    info!(
        contract = %contract_address,
        total,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "fetched contract items"
    );
    Ok(total)
}

/// Keep the contract's storage size current. A failed query ends the
/// loop with an error since packets cannot be sized without it.
pub async fn watch_storage_size(
    storage: Arc<dyn ContractStorage>,
    contract_address: String,
    cache: Arc<dyn Cache>,
    state: Arc<RwLock<SharedState>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> ManagerResult<()> {
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        refresh_total_items(storage.as_ref(), &contract_address, cache.as_ref(), &state).await?;

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
        }
    }
}
