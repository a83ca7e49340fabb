use std::time::Duration;

use liquidator_chain::ChainError;
use liquidator_store::StoreError;

pub type ManagerResult<T> = Result<T, ManagerError>;

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("invalid manager configuration: {0}")]
    InvalidConfig(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("no new block received in {0:?}")]
    Stalled(Duration),

    #[error("background task failed: {0}")]
    Task(String),
}
