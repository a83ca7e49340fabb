//! Deployer error types.

use thiserror::Error;

pub type DeployerResult<T> = Result<T, DeployerError>;

#[derive(Debug, Error)]
pub enum DeployerError {
    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("failed to run container engine: {0}")]
    Io(#[from] std::io::Error),

    #[error("cluster backend error: {0}")]
    Backend(String),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("invalid deployer config: {0}")]
    InvalidConfig(String),
}
