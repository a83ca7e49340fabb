//! Cache keys for pipeline counters.
//!
//! Cumulative keys are written by the manager and never cleared. Per-block
//! keys are incremented by the workers during a block and cleared by the
//! manager once it has read them.

/// Total items in the monitored contract's storage (cumulative).
pub const SCANNER_CONTRACT_ITEMS_TOTAL: &str = "scanner.contract_items.total";

/// Contract items read by scanners during the last block.
pub const SCANNER_CONTRACT_ITEMS_SCANNED: &str = "scanner.contract_items.scanned";

/// Accounts handed to the health checkers during the last block.
pub const HEALTH_CHECKER_ACCOUNTS_TOTAL: &str = "health_checker.accounts.total";

/// Accounts whose health factor was fetched during the last block.
pub const HEALTH_CHECKER_ACCOUNTS_SCANNED: &str = "health_checker.accounts.scanned";

/// Accounts found unhealthy during the last block.
pub const HEALTH_CHECKER_UNHEALTHY_TOTAL: &str = "health_checker.unhealthy.total";

/// Liquidations queued for the executors during the last block.
pub const EXECUTOR_LIQUIDATIONS_TOTAL: &str = "executor.liquidations.total";

/// Liquidations the executors completed during the last block.
pub const EXECUTOR_LIQUIDATIONS_EXECUTED: &str = "executor.liquidations.executed";

/// Keys the manager clears after every read.
pub const PER_BLOCK: &[&str] = &[
    SCANNER_CONTRACT_ITEMS_SCANNED,
    HEALTH_CHECKER_ACCOUNTS_TOTAL,
    HEALTH_CHECKER_ACCOUNTS_SCANNED,
    HEALTH_CHECKER_UNHEALTHY_TOTAL,
    EXECUTOR_LIQUIDATIONS_TOTAL,
    EXECUTOR_LIQUIDATIONS_EXECUTED,
];

/// Returns true when `key` is cleared after being read.
pub fn is_per_block(key: &str) -> bool {
    PER_BLOCK.contains(&key)
}
