//! Domain types shared across the pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ── Work items ─────────────────────────────────────────────────────

/// Protocol variant of the contract a work item points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkItemType {
    Redbank,
    Rover,
}

impl WorkItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemType::Redbank => "Redbank",
            WorkItemType::Rover => "Rover",
        }
    }
}

impl fmt::Display for WorkItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkItemType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redbank" => Ok(WorkItemType::Redbank),
            "rover" => Ok(WorkItemType::Rover),
            _ => Err(CoreError::UnknownWorkItemType(s.to_string())),
        }
    }
}

/// A page of contract storage for a scanner to read.
///
/// `contract_page_limit` is an upper bound: the last page of a partition
/// may ask for more items than remain in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub hive_endpoint: String,
    pub rpc_endpoint: String,
    pub lcd_endpoint: String,
    pub contract_address: String,
    pub contract_item_prefix: String,
    pub work_item_type: WorkItemType,
    pub contract_page_offset: u64,
    pub contract_page_limit: u64,
}

impl WorkItem {
    /// Encode into the JSON wire format consumed by scanners.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the JSON wire format.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// ── Blocks ─────────────────────────────────────────────────────────

/// A newly committed block.
///
/// `height` is kept as the raw string from the event stream; the
/// dispatcher parses it and tolerates malformed values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlockEvent {
    pub height: String,
    pub time: DateTime<Utc>,
}

impl NewBlockEvent {
    pub fn new(height: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            height: height.into(),
            time,
        }
    }
}

// ── Metrics ────────────────────────────────────────────────────────

/// A single metric value reported for one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// Chain identifier the value belongs to.
    pub chain: String,
}

impl Metric {
    pub fn new(name: impl Into<String>, value: f64, timestamp: i64, chain: &str) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp,
            chain: chain.to_string(),
        }
    }
}

// ── Worker roles ───────────────────────────────────────────────────

/// The horizontally scaled services fed by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkerRole {
    /// Reads contract storage pages and emits accounts to check.
    Scanner,
    /// Fetches health factors and emits liquidatable positions.
    HealthChecker,
    /// Submits liquidation transactions.
    Executor,
}

impl WorkerRole {
    pub const ALL: [WorkerRole; 3] = [
        WorkerRole::Scanner,
        WorkerRole::HealthChecker,
        WorkerRole::Executor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Scanner => "scanner",
            WorkerRole::HealthChecker => "health-checker",
            WorkerRole::Executor => "executor",
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerRole {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scanner" => Ok(WorkerRole::Scanner),
            "health-checker" => Ok(WorkerRole::HealthChecker),
            "executor" => Ok(WorkerRole::Executor),
            _ => Err(CoreError::UnknownWorkerRole(s.to_string())),
        }
    }
}
