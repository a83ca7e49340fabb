//! Manager configuration.

use std::time::Duration;

use liquidator_core::WorkItemType;

use crate::error::{ManagerError, ManagerResult};

/// Longest gap between blocks before the subscription is considered dead.
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(60);

/// How often the liveness and storage size monitors run.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub chain_id: String,
    pub hive_endpoint: String,
    pub rpc_endpoint: String,
    pub rpc_websocket_endpoint: String,
    pub lcd_endpoint: String,

    pub scanner_queue: String,
    pub health_check_queue: String,
    pub executor_queue: String,

    pub contract_address: String,
    pub contract_item_prefix: String,
    pub work_item_type: WorkItemType,
    pub items_per_packet: u64,

    pub metrics_enabled: bool,

    pub liveness_timeout: Duration,
    pub monitor_interval: Duration,
}

impl ManagerConfig {
    pub fn validate(&self) -> ManagerResult<()> {
        let required = [
            ("rpc endpoint", &self.rpc_endpoint),
            ("rpc websocket endpoint", &self.rpc_websocket_endpoint),
            ("scanner queue name", &self.scanner_queue),
            ("health check queue name", &self.health_check_queue),
            ("executor queue name", &self.executor_queue),
            ("contract address", &self.contract_address),
        ];
        for (what, value) in required {
            if value.trim().is_empty() {
                return Err(ManagerError::InvalidConfig(format!("{what} must not be blank")));
            }
        }

        if self.items_per_packet == 0 {
            return Err(ManagerError::InvalidConfig(
                "items per packet must be larger than zero".to_string(),
            ));
        }
        if self.liveness_timeout.is_zero() || self.monitor_interval.is_zero() {
            return Err(ManagerError::InvalidConfig(
                "monitor intervals must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Queues purged at the start of every block.
    pub fn queues(&self) -> [&str; 3] {
        [
            &self.scanner_queue,
            &self.health_check_queue,
            &self.executor_queue,
        ]
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> ManagerConfig {
    ManagerConfig {
        chain_id: "osmosis-1".to_string(),
        hive_endpoint: "http://hive:8085/graphql".to_string(),
        rpc_endpoint: "http://rpc:26657".to_string(),
        rpc_websocket_endpoint: "ws://rpc:26657/websocket".to_string(),
        lcd_endpoint: "http://lcd:1317".to_string(),
        scanner_queue: "scanner".to_string(),
        health_check_queue: "health_check".to_string(),
        executor_queue: "executor".to_string(),
        contract_address: "osmo1redbank".to_string(),
        contract_item_prefix: "debts".to_string(),
        work_item_type: WorkItemType::Redbank,
        items_per_packet: 100,
        metrics_enabled: false,
        liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
        monitor_interval: DEFAULT_MONITOR_INTERVAL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_complete_config() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn rejects_blank_queue_and_zero_packet() {
        let mut config = test_config();
        config.executor_queue = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ManagerError::InvalidConfig(msg)) if msg.contains("executor")
        ));

        let mut config = test_config();
        config.items_per_packet = 0;
        assert!(config.validate().is_err());
    }
}
