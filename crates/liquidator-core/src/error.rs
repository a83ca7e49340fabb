//! Core error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown work item type: {0}")]
    UnknownWorkItemType(String),

    #[error("unknown worker role: {0}")]
    UnknownWorkerRole(String),

    #[error("work item encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}
